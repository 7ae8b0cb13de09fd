use crate::image::{InputTensor, INPUT_SIZE};
use crate::models::{BackboneKind, BackboneSpec, ModelVariant, RetinaModel};
use crate::utils::error::RetinaError;
use crate::{Config, Result};
use candle_core::Device;
use std::sync::Arc;

/// 模型管理器：进程启动时加载一次，之后只读共享
pub struct ModelManager {
    model: Arc<RetinaModel>,
    config: Config,
}

impl ModelManager {
    /// 按配置构建模型并加载检查点；任何失败都应终止启动
    pub fn load(config: Config) -> Result<Self> {
        tracing::info!(
            "Initializing model manager: variant={}, backbone={:?}",
            config.variant,
            config.backbone
        );

        let model = Self::build_model(&config)?;
        let checkpoint = config.checkpoint_path();
        model.load_weights(&checkpoint, None)?;

        tracing::info!("Model manager initialized successfully");
        Ok(Self::from_model(model, config))
    }

    /// 使用已构建的模型（跳过检查点加载）
    pub fn from_model(model: RetinaModel, config: Config) -> Self {
        Self {
            model: Arc::new(model),
            config,
        }
    }

    fn build_model(config: &Config) -> Result<RetinaModel> {
        let backbone_path = config.backbone_path();
        let spec = match config.backbone {
            BackboneKind::Onnx => BackboneSpec::Onnx {
                path: &backbone_path,
                config: &config.onnx_config,
            },
            BackboneKind::Conv => BackboneSpec::Conv,
        };
        RetinaModel::build(config.variant, spec, Device::Cpu)
    }

    /// 获取模型引用
    pub fn model(&self) -> Arc<RetinaModel> {
        Arc::clone(&self.model)
    }

    /// 获取配置引用
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn variant(&self) -> ModelVariant {
        self.model.variant()
    }

    /// 模型健康检查：用全零图像跑一次推理，输出必须完整且有限
    pub fn health_check(&self) -> Result<()> {
        tracing::debug!("Performing model health check...");

        let size = INPUT_SIZE as usize;
        let warmup = InputTensor::zeros((1, size, size, 3));
        let raw = self.model.predict_raw(&warmup)?;

        if raw.iter().any(|v| !v.is_finite()) {
            return Err(RetinaError::Inference(
                "Model produced non-finite outputs".to_string(),
            ));
        }

        tracing::debug!("Model health check passed");
        Ok(())
    }

    /// 获取模型统计信息
    pub fn get_stats(&self) -> ModelStats {
        ModelStats {
            variant: self.model.variant(),
            backbone: self.model.backbone_name().to_string(),
            feature_dim: self.model.feature_dim(),
            output_len: self.model.variant().output_len(),
            parameters: self.model.parameter_count(),
            intra_threads: self.config.onnx_config.intra_threads,
            session_pool_size: self.config.onnx_config.session_pool_size,
            optimization_level: self.config.onnx_config.optimization_level,
        }
    }
}

/// 模型统计信息
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelStats {
    pub variant: ModelVariant,
    pub backbone: String,
    pub feature_dim: usize,
    pub output_len: usize,
    pub parameters: usize,
    pub intra_threads: usize,
    pub session_pool_size: usize,
    pub optimization_level: i32,
}
