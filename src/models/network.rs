use crate::image::InputTensor;
use crate::models::backbone::{Backbone, BackboneSpec, ConvBackbone};
use crate::models::head::Head;
use crate::models::onnx::OnnxBackbone;
use crate::models::ModelVariant;
use crate::utils::error::RetinaError;
use crate::Result;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Module, VarBuilder, VarMap};
use ndarray::Array4;
use std::collections::HashMap;
use std::path::Path;

const HEAD_PREFIX: &str = "head.";
const BACKBONE_PREFIX: &str = "backbone.";

/// 主干 + 任务头的组合网络。
///
/// 服务期间权重只读；`RetinaModel` 通过 `Arc` 在请求间共享。
pub struct RetinaModel {
    variant: ModelVariant,
    backbone: Box<dyn Backbone>,
    head: Head,
    varmap: VarMap,
    device: Device,
    freeze_backbone: bool,
}

impl RetinaModel {
    /// 构建网络；头部（以及卷积主干）参数随机初始化
    pub fn build(variant: ModelVariant, spec: BackboneSpec<'_>, device: Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let backbone: Box<dyn Backbone> = match spec {
            BackboneSpec::Onnx { path, config } => Box::new(OnnxBackbone::new(path, config)?),
            BackboneSpec::Conv => Box::new(ConvBackbone::new(vb.pp("backbone"))?),
        };
        let head = Head::new(variant, backbone.feature_dim(), vb.pp("head"))?;

        tracing::info!(
            "Built {} model: backbone={}, feature_dim={}, outputs={}",
            variant,
            backbone.name(),
            backbone.feature_dim(),
            variant.output_len()
        );

        Ok(Self {
            variant,
            backbone,
            head,
            varmap,
            device,
            freeze_backbone: true,
        })
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn backbone_name(&self) -> &str {
        self.backbone.name()
    }

    pub fn feature_dim(&self) -> usize {
        self.backbone.feature_dim()
    }

    pub fn is_backbone_frozen(&self) -> bool {
        self.freeze_backbone
    }

    /// 冻结或解冻主干；不可训练的主干不能解冻
    pub fn set_freeze_backbone(&mut self, freeze: bool) -> Result<()> {
        if !freeze && !self.backbone.is_trainable() {
            return Err(RetinaError::Config(format!(
                "Backbone '{}' is not trainable and cannot be fine-tuned",
                self.backbone.name()
            )));
        }
        self.freeze_backbone = freeze;
        Ok(())
    }

    /// 批量前向：(N, 224, 224, 3) -> (N, output_len)
    pub fn forward_batch(&self, batch: &Array4<f32>) -> Result<Tensor> {
        let features = self.backbone.extract(batch, &self.device)?;
        let features = if self.freeze_backbone {
            features.detach()
        } else {
            features
        };
        Ok(self.head.forward(&features)?)
    }

    /// 单张图像推理，返回原始输出向量
    pub fn predict_raw(&self, input: &InputTensor) -> Result<Vec<f32>> {
        if input.shape()[0] != 1 {
            return Err(RetinaError::InvalidInput(format!(
                "Expected a single-image tensor, got batch of {}",
                input.shape()[0]
            )));
        }

        let output = self.forward_batch(input)?;
        let raw = output
            .to_vec2::<f32>()?
            .into_iter()
            .next()
            .ok_or_else(|| RetinaError::Inference("Model returned no output rows".to_string()))?;

        if raw.len() != self.variant.output_len() {
            return Err(RetinaError::Inference(format!(
                "Expected {} outputs, got {}",
                self.variant.output_len(),
                raw.len()
            )));
        }

        Ok(raw)
    }

    /// 训练时需要更新的参数：头部始终包含，主干仅在解冻时包含
    pub fn trainable_vars(&self) -> Result<Vec<Var>> {
        let data = self.lock_vars()?;
        let mut names: Vec<&String> = data
            .keys()
            .filter(|name| {
                name.starts_with(HEAD_PREFIX)
                    || (!self.freeze_backbone && name.starts_with(BACKBONE_PREFIX))
            })
            .collect();
        names.sort();
        Ok(names.into_iter().map(|name| data[name].clone()).collect())
    }

    /// 参数总数（标量个数）
    pub fn parameter_count(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|var| var.elem_count())
            .sum()
    }

    /// 从 safetensors 文件加载权重。
    ///
    /// `prefix` 为 None 时要求所有参数都存在；形状不符或缺失都返回 `ModelLoad`。
    pub fn load_weights(&self, path: &Path, prefix: Option<&str>) -> Result<usize> {
        if !path.exists() {
            return Err(RetinaError::ModelLoad(format!(
                "Checkpoint not found: {}",
                path.display()
            )));
        }

        let tensors = candle_core::safetensors::load(path, &self.device).map_err(|e| {
            RetinaError::ModelLoad(format!("Failed to read checkpoint {}: {}", path.display(), e))
        })?;

        let data = self.lock_vars()?;
        let mut loaded = 0;
        for (name, var) in data.iter() {
            if let Some(prefix) = prefix {
                if !name.starts_with(prefix) {
                    continue;
                }
            }

            let tensor = tensors.get(name).ok_or_else(|| {
                RetinaError::ModelLoad(format!(
                    "Checkpoint {} is missing tensor '{}'",
                    path.display(),
                    name
                ))
            })?;

            if tensor.dims() != var.dims() {
                return Err(RetinaError::ModelLoad(format!(
                    "Shape mismatch for '{}': checkpoint {:?}, model {:?}",
                    name,
                    tensor.dims(),
                    var.dims()
                )));
            }

            var.set(tensor).map_err(|e| {
                RetinaError::ModelLoad(format!("Failed to assign '{}': {}", name, e))
            })?;
            loaded += 1;
        }

        if loaded == 0 {
            return Err(RetinaError::ModelLoad(format!(
                "No matching parameters found in {}",
                path.display()
            )));
        }

        tracing::info!("Loaded {} tensors from {}", loaded, path.display());
        Ok(loaded)
    }

    /// 保存全部参数到单个 safetensors 文件（覆盖已有文件）
    pub fn save_weights(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.varmap.save(path)?;
        tracing::info!("Saved checkpoint to {}", path.display());
        Ok(())
    }

    fn lock_vars(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Var>>> {
        self.varmap
            .data()
            .lock()
            .map_err(|_| RetinaError::Internal("Model parameter store is poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn conv_model(variant: ModelVariant) -> RetinaModel {
        RetinaModel::build(variant, BackboneSpec::Conv, Device::Cpu).unwrap()
    }

    fn single_input() -> InputTensor {
        Array4::<f32>::zeros((1, 224, 224, 3))
    }

    #[test]
    fn predict_raw_matches_variant_length() {
        let cls = conv_model(ModelVariant::Classification);
        assert_eq!(cls.predict_raw(&single_input()).unwrap().len(), 5);

        let reg = conv_model(ModelVariant::Regression);
        assert_eq!(reg.predict_raw(&single_input()).unwrap().len(), 14);
    }

    #[test]
    fn predict_raw_rejects_batches() {
        let model = conv_model(ModelVariant::Regression);
        let batch = Array4::<f32>::zeros((2, 224, 224, 3));
        assert!(matches!(
            model.predict_raw(&batch),
            Err(RetinaError::InvalidInput(_))
        ));
    }

    #[test]
    fn trainable_vars_follow_freeze_flag() {
        let mut model = conv_model(ModelVariant::Regression);
        // 头部：fc1/fc2 的 weight + bias
        assert_eq!(model.trainable_vars().unwrap().len(), 4);

        model.set_freeze_backbone(false).unwrap();
        assert_eq!(model.trainable_vars().unwrap().len(), 10);
    }

    #[test]
    fn checkpoint_round_trips_parameters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/model.safetensors");

        let source = conv_model(ModelVariant::Regression);
        source.save_weights(&path).unwrap();

        let target = conv_model(ModelVariant::Regression);
        let loaded = target.load_weights(&path, None).unwrap();
        assert_eq!(loaded, 10);

        let input = single_input();
        assert_eq!(
            source.predict_raw(&input).unwrap(),
            target.predict_raw(&input).unwrap()
        );
    }

    #[test]
    fn incompatible_checkpoint_is_a_load_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("classifier.safetensors");

        conv_model(ModelVariant::Classification)
            .save_weights(&path)
            .unwrap();

        // 分类检查点缺少回归头的 fc1/fc2
        let result = conv_model(ModelVariant::Regression).load_weights(&path, None);
        assert!(matches!(result, Err(RetinaError::ModelLoad(_))));
    }

    #[test]
    fn shape_mismatch_is_a_load_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad_shape.safetensors");

        let model = conv_model(ModelVariant::Regression);
        let mut tensors: HashMap<String, Tensor> = model
            .lock_vars()
            .unwrap()
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        tensors.insert(
            "head.fc2.weight".to_string(),
            Tensor::zeros((3, 256), DType::F32, &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let err = model.load_weights(&path, None).unwrap_err();
        assert!(err.to_string().contains("Shape mismatch"));
    }

    #[test]
    fn prefixed_load_only_touches_backbone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("classifier.safetensors");
        conv_model(ModelVariant::Classification)
            .save_weights(&path)
            .unwrap();

        let model = conv_model(ModelVariant::Regression);
        assert_eq!(model.load_weights(&path, Some("backbone.")).unwrap(), 6);
    }

    #[test]
    fn missing_checkpoint_fails_fast() {
        let model = conv_model(ModelVariant::Classification);
        let result = model.load_weights(Path::new("/nonexistent/ckpt.safetensors"), None);
        assert!(matches!(result, Err(RetinaError::ModelLoad(_))));
    }
}
