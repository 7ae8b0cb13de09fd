use crate::config::OnnxConfig;
use crate::image::INPUT_SIZE;
use crate::models::backbone::Backbone;
use crate::models::pool::SessionPool;
use crate::models::InputLayout;
use crate::utils::error::RetinaError;
use crate::Result;
use candle_core::{Device, Tensor};
use ndarray::{Array4, ArrayD, Axis};
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor as OrtTensor,
};
use std::path::Path;

/// 基于 ONNX Runtime 的冻结主干网络
pub struct OnnxBackbone {
    sessions: SessionPool<Session>,
    input_name: String,
    output_name: String, // 动态发现的输出名称
    layout: InputLayout,
    feature_dim: usize,
}

impl OnnxBackbone {
    pub fn new(model_path: &Path, config: &OnnxConfig) -> Result<Self> {
        if !model_path.exists() {
            return Err(RetinaError::ModelLoad(format!(
                "Backbone model not found: {}",
                model_path.display()
            )));
        }

        tracing::info!(
            "Loading backbone model from: {} ({} sessions)",
            model_path.display(),
            config.session_pool_size
        );

        let sessions = (0..config.session_pool_size.max(1))
            .map(|_| build_session(model_path, config))
            .collect::<Result<Vec<Session>>>()?;

        let input_name = match sessions[0].inputs.first() {
            Some(input) => input.name.clone(),
            None => {
                return Err(RetinaError::ModelLoad(
                    "Backbone model has no inputs".to_string(),
                ))
            }
        };

        let output_name = match sessions[0].outputs.first() {
            Some(output) => output.name.clone(),
            None => {
                return Err(RetinaError::ModelLoad(
                    "Backbone model has no outputs".to_string(),
                ))
            }
        };

        for (i, output) in sessions[0].outputs.iter().enumerate() {
            tracing::debug!("Backbone output[{}]: '{}'", i, output.name);
        }

        let mut backbone = Self {
            sessions: SessionPool::new(sessions)?,
            input_name,
            output_name,
            layout: config.input_layout,
            feature_dim: 0,
        };

        // 用全零输入探测特征维度，模型不可用时在启动阶段即失败
        let size = INPUT_SIZE as usize;
        let warmup = Array4::<f32>::zeros((1, size, size, 3));
        let (_, values) = backbone.run(&warmup).map_err(|e| {
            RetinaError::ModelLoad(format!("Backbone warmup inference failed: {}", e))
        })?;
        if values.is_empty() {
            return Err(RetinaError::ModelLoad(
                "Backbone produced an empty feature vector".to_string(),
            ));
        }
        backbone.feature_dim = values.len();

        tracing::info!(
            "Backbone ready: input='{}', output='{}', layout={:?}, feature_dim={}",
            backbone.input_name,
            backbone.output_name,
            backbone.layout,
            backbone.feature_dim
        );

        Ok(backbone)
    }

    /// 执行推理并返回 (batch, 展平后的特征)
    fn run(&self, batch: &Array4<f32>) -> Result<(usize, Vec<f32>)> {
        let input = match self.layout {
            InputLayout::Nhwc => batch.clone(),
            InputLayout::Nchw => batch
                .view()
                .permuted_axes([0, 3, 1, 2])
                .as_standard_layout()
                .into_owned(),
        };
        let input_tensor = OrtTensor::from_array(input)?;

        let output = self.sessions.with(|session| -> Result<ArrayD<f32>> {
            let outputs = session.run(inputs![self.input_name.as_str() => input_tensor])?;

            match outputs.get(self.output_name.as_str()) {
                Some(output) => Ok(output.try_extract_array::<f32>()?.into_owned()),
                None => {
                    let available: Vec<String> = outputs.keys().map(|s| s.to_string()).collect();
                    Err(RetinaError::Inference(format!(
                        "Backbone output '{}' not found. Available outputs: {:?}",
                        self.output_name, available
                    )))
                }
            }
        })?;

        pool_features(output, self.layout)
    }
}

impl Backbone for OnnxBackbone {
    fn name(&self) -> &str {
        "onnx"
    }

    fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    fn is_trainable(&self) -> bool {
        false
    }

    fn extract(&self, batch: &Array4<f32>, device: &Device) -> Result<Tensor> {
        let (n, values) = self.run(batch)?;
        if n == 0 || values.len() != n * self.feature_dim {
            return Err(RetinaError::Inference(format!(
                "Backbone returned {} values for batch of {}, expected feature_dim {}",
                values.len(),
                n,
                self.feature_dim
            )));
        }
        Ok(Tensor::from_vec(values, (n, self.feature_dim), device)?)
    }
}

fn build_session(model_path: &Path, config: &OnnxConfig) -> Result<Session> {
    let mut builder = Session::builder().map_err(|e| load_error(model_path, e))?;
    if config.enable_optimization {
        builder = builder
            .with_optimization_level(optimization_level(config.optimization_level))
            .map_err(|e| load_error(model_path, e))?;
    }
    builder
        .with_intra_threads(config.intra_threads)
        .map_err(|e| load_error(model_path, e))?
        .commit_from_file(model_path)
        .map_err(|e| load_error(model_path, e))
}

fn load_error(path: &Path, e: impl std::fmt::Display) -> RetinaError {
    RetinaError::ModelLoad(format!("Failed to build session for {}: {}", path.display(), e))
}

fn optimization_level(level: i32) -> GraphOptimizationLevel {
    match level {
        i32::MIN..=0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}

/// 将主干输出规整为 (N, D)；4 维特征图做全局平均池化
fn pool_features(output: ArrayD<f32>, layout: InputLayout) -> Result<(usize, Vec<f32>)> {
    match output.ndim() {
        2 => {
            let n = output.shape()[0];
            Ok((n, output.iter().copied().collect()))
        }
        4 => {
            let (first, second) = match layout {
                InputLayout::Nchw => (2, 3),
                InputLayout::Nhwc => (1, 2),
            };
            let pooled = output
                .mean_axis(Axis(second))
                .and_then(|a| a.mean_axis(Axis(first)))
                .ok_or_else(|| {
                    RetinaError::Inference("Backbone returned an empty feature map".to_string())
                })?;
            let n = pooled.shape()[0];
            Ok((n, pooled.iter().copied().collect()))
        }
        rank => Err(RetinaError::Inference(format!(
            "Unexpected backbone output rank {}",
            rank
        ))),
    }
}
