use crate::models::{ModelVariant, RetinaModel};
use crate::training::dataset::{Labels, RetinaDataset};
use crate::utils::error::RetinaError;
use crate::Result;
use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, trace};

/// 训练超参数
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// 每个 epoch 开始前打乱样本顺序
    pub shuffle: bool,
    /// 同时更新主干参数（仅卷积主干支持）
    pub fine_tune_backbone: bool,
    pub seed: Option<u64>,
    /// 预训练主干权重（safetensors，`backbone.*`）
    pub pretrained_backbone: Option<PathBuf>,
    pub checkpoint: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            epochs: 10,
            learning_rate: 1e-4,
            shuffle: true,
            fine_tune_backbone: false,
            seed: None,
            pretrained_backbone: None,
            // 与服务端默认 `--models-dir models` 加载的路径一致
            checkpoint: PathBuf::from("models").join(ModelVariant::Regression.checkpoint_file()),
        }
    }
}

impl TrainingConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RetinaError::Config("batch_size must be at least 1".to_string()));
        }
        if self.epochs == 0 {
            return Err(RetinaError::Config("epochs must be at least 1".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RetinaError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// 训练循环所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Init,
    Forward,
    LossCompute,
    Backward,
    ParamUpdate,
    Checkpoint,
    Done,
}

/// 一次训练的汇总
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// 每个 epoch 的平均批次损失
    pub epoch_losses: Vec<f32>,
    pub samples: usize,
    pub steps: usize,
    pub checkpoint: PathBuf,
}

pub struct Trainer {
    model: RetinaModel,
    config: TrainingConfig,
    phase: TrainingPhase,
}

impl Trainer {
    /// 只接受回归变体；按配置加载预训练主干并设置冻结状态
    pub fn new(mut model: RetinaModel, config: TrainingConfig) -> Result<Self> {
        if model.variant() != ModelVariant::Regression {
            return Err(RetinaError::Config(format!(
                "Training supports the regression variant only, got {}",
                model.variant()
            )));
        }
        config.validate()?;

        if let Some(path) = &config.pretrained_backbone {
            let loaded = model.load_weights(path, Some("backbone."))?;
            info!("Initialized backbone from {} ({} tensors)", path.display(), loaded);
        }
        model.set_freeze_backbone(!config.fine_tune_backbone)?;

        Ok(Self {
            model,
            config,
            phase: TrainingPhase::Init,
        })
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn model(&self) -> &RetinaModel {
        &self.model
    }

    pub fn into_model(self) -> RetinaModel {
        self.model
    }

    fn enter(&mut self, phase: TrainingPhase) {
        match phase {
            TrainingPhase::Forward
            | TrainingPhase::LossCompute
            | TrainingPhase::Backward
            | TrainingPhase::ParamUpdate => trace!("Training phase: {:?}", phase),
            _ => info!("Training phase: {:?}", phase),
        }
        self.phase = phase;
    }

    /// 运行完整训练并在结束时写入唯一的检查点
    pub fn run(&mut self, dataset: &RetinaDataset) -> Result<TrainingReport> {
        self.enter(TrainingPhase::Init);
        let start = Instant::now();

        if dataset.is_empty() {
            return Err(RetinaError::TrainingData("Dataset has no samples".to_string()));
        }
        dataset.verify_images()?;

        let vars = self.model.trainable_vars()?;
        info!(
            "Training {} tensors on {} samples: epochs={}, batch_size={}, lr={}, fine_tune_backbone={}",
            vars.len(),
            dataset.len(),
            self.config.epochs,
            self.config.batch_size,
            self.config.learning_rate,
            self.config.fine_tune_backbone
        );

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(vars, params)?;

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        let batches_per_epoch = indices.len().div_ceil(self.config.batch_size);
        let mut epoch_losses = Vec::with_capacity(self.config.epochs);
        let mut steps = 0;

        for epoch in 1..=self.config.epochs {
            if self.config.shuffle {
                indices.shuffle(&mut rng);
            }

            let bar = progress_bar(batches_per_epoch, epoch, self.config.epochs)?;
            let mut total_loss = 0.0f32;

            for chunk in indices.chunks(self.config.batch_size) {
                let loss = self.step(&mut optimizer, dataset, chunk)?;
                total_loss += loss;
                steps += 1;

                bar.set_message(format!("loss={:.4}", loss));
                bar.inc(1);
            }
            bar.finish_and_clear();

            let mean_loss = total_loss / batches_per_epoch as f32;
            info!(
                "Epoch {}/{}  Total Loss: {:.4}",
                epoch, self.config.epochs, mean_loss
            );
            epoch_losses.push(mean_loss);
        }

        self.enter(TrainingPhase::Checkpoint);
        self.model.save_weights(&self.config.checkpoint)?;

        self.enter(TrainingPhase::Done);
        info!(
            "Training finished in {:?}; checkpoint saved to {}",
            start.elapsed(),
            self.config.checkpoint.display()
        );

        Ok(TrainingReport {
            epoch_losses,
            samples: dataset.len(),
            steps,
            checkpoint: self.config.checkpoint.clone(),
        })
    }

    fn step(
        &mut self,
        optimizer: &mut AdamW,
        dataset: &RetinaDataset,
        indices: &[usize],
    ) -> Result<f32> {
        let (images, labels) = dataset.batch(indices)?;

        self.enter(TrainingPhase::Forward);
        let outputs = self.model.forward_batch(&images)?;

        self.enter(TrainingPhase::LossCompute);
        let targets = targets_tensor(&labels, self.model.device())?;
        let loss = candle_nn::loss::mse(&outputs, &targets)?;

        self.enter(TrainingPhase::Backward);
        let grads = loss.backward()?;

        self.enter(TrainingPhase::ParamUpdate);
        optimizer.step(&grads)?;

        let loss = loss.to_scalar::<f32>()?;
        if !loss.is_finite() {
            return Err(RetinaError::Internal(format!(
                "Training diverged: loss is {}",
                loss
            )));
        }
        Ok(loss)
    }
}

fn targets_tensor(labels: &[Labels], device: &candle_core::Device) -> Result<Tensor> {
    let flat: Vec<f32> = labels.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(flat, (labels.len(), ModelVariant::Regression.output_len()), device)?)
}

fn progress_bar(len: usize, epoch: usize, epochs: usize) -> Result<ProgressBar> {
    let style = ProgressStyle::with_template("{prefix} [{bar:40}] {pos}/{len} {msg}")
        .map_err(|e| RetinaError::Internal(format!("Invalid progress template: {}", e)))?
        .progress_chars("=> ");

    let bar = ProgressBar::new(len as u64);
    bar.set_style(style);
    bar.set_prefix(format!("Epoch {}/{}", epoch, epochs));
    Ok(bar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::InputTensor;
    use crate::models::BackboneSpec;
    use crate::training::dataset::tests::write_fixture;
    use crate::training::LabelPolicy;
    use candle_core::Device;

    const ROWS: [&str; 5] = [
        "a.png,63,1,3,145,233,1,0,150,0,2.3,0,0,1,0.7",
        "b.png,41,0,1,130,204,0,1,172,0,1.4,2,0,2,0.1",
        "c.png,56,1,1,120,236,0,1,178,0,0.8,2,0,2,0.3",
        "d.png,57,0,0,120,354,0,1,163,1,0.6,2,0,2,0.9",
        "e.png,,1,0,140,192,0,1,148,0,0.4,1,0,1,0.5",
    ];
    const IMAGES: [&str; 5] = ["a.png", "b.png", "c.png", "d.png", "e.png"];

    fn regression_model() -> RetinaModel {
        RetinaModel::build(ModelVariant::Regression, BackboneSpec::Conv, Device::Cpu).unwrap()
    }

    fn config(checkpoint: PathBuf) -> TrainingConfig {
        TrainingConfig {
            batch_size: 2,
            epochs: 2,
            learning_rate: 1e-3,
            seed: Some(7),
            checkpoint,
            ..Default::default()
        }
    }

    #[test]
    fn default_hyperparameters() {
        let config = TrainingConfig::default();
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.epochs, 10);
        assert_eq!(config.learning_rate, 1e-4);
        assert!(config.shuffle);
        assert!(!config.fine_tune_backbone);

        let serving = crate::Config::new(
            "127.0.0.1:0".to_string(),
            "models".to_string(),
            Some(1),
            false,
            ModelVariant::Regression,
        )
        .unwrap();
        assert_eq!(config.checkpoint, serving.checkpoint_path());
    }

    #[test]
    fn short_run_writes_reloadable_checkpoint() {
        let (dir, csv_path, folder) = write_fixture(&ROWS, &IMAGES);
        let dataset = RetinaDataset::from_csv(&csv_path, &folder, LabelPolicy::ZeroFill).unwrap();
        let checkpoint = dir.path().join("out/retina_multioutput.safetensors");

        let sample_input = InputTensor::zeros((1, 224, 224, 3));
        let mut trainer = Trainer::new(regression_model(), config(checkpoint.clone())).unwrap();
        let before = trainer.model().predict_raw(&sample_input).unwrap();

        let report = trainer.run(&dataset).unwrap();
        assert_eq!(trainer.phase(), TrainingPhase::Done);
        assert_eq!(report.epoch_losses.len(), 2);
        assert!(report.epoch_losses.iter().all(|l| l.is_finite() && *l >= 0.0));
        assert_eq!(report.samples, 5);
        // 5个样本、批大小2：每个 epoch 3 步
        assert_eq!(report.steps, 6);
        assert!(checkpoint.exists());

        let trained = trainer.into_model();
        let after = trained.predict_raw(&sample_input).unwrap();
        assert_ne!(before, after);

        let reloaded = regression_model();
        reloaded.load_weights(&checkpoint, None).unwrap();
        assert_eq!(reloaded.predict_raw(&sample_input).unwrap(), after);
    }

    #[test]
    fn frozen_backbone_is_left_untouched() {
        let (dir, csv_path, folder) = write_fixture(&ROWS[..2], &IMAGES[..2]);
        let dataset = RetinaDataset::from_csv(&csv_path, &folder, LabelPolicy::ZeroFill).unwrap();

        let model = regression_model();
        let backbone_ckpt = dir.path().join("initial.safetensors");
        model.save_weights(&backbone_ckpt).unwrap();

        let mut trainer = Trainer::new(model, config(dir.path().join("ckpt.safetensors"))).unwrap();
        trainer.run(&dataset).unwrap();

        let initial = candle_core::safetensors::load(&backbone_ckpt, &Device::Cpu).unwrap();
        let trained = candle_core::safetensors::load(dir.path().join("ckpt.safetensors"), &Device::Cpu)
            .unwrap();
        for (name, tensor) in initial.iter().filter(|(n, _)| n.starts_with("backbone.")) {
            let diff = (tensor - &trained[name])
                .unwrap()
                .abs()
                .unwrap()
                .sum_all()
                .unwrap()
                .to_scalar::<f32>()
                .unwrap();
            assert_eq!(diff, 0.0, "{} changed", name);
        }
    }

    #[test]
    fn fine_tuning_trains_conv_backbone() {
        let (dir, csv_path, folder) = write_fixture(&ROWS[..2], &IMAGES[..2]);
        let dataset = RetinaDataset::from_csv(&csv_path, &folder, LabelPolicy::ZeroFill).unwrap();

        let mut cfg = config(dir.path().join("ckpt.safetensors"));
        cfg.fine_tune_backbone = true;
        cfg.epochs = 1;

        let mut trainer = Trainer::new(regression_model(), cfg).unwrap();
        assert!(!trainer.model().is_backbone_frozen());
        assert_eq!(trainer.run(&dataset).unwrap().steps, 1);
    }

    #[test]
    fn pretrained_backbone_is_loaded() {
        let (dir, _csv, _folder) = write_fixture(&[], &[]);
        let donor = regression_model();
        let donor_path = dir.path().join("donor.safetensors");
        donor.save_weights(&donor_path).unwrap();

        let mut cfg = config(dir.path().join("ckpt.safetensors"));
        cfg.pretrained_backbone = Some(donor_path.clone());
        assert!(Trainer::new(regression_model(), cfg).is_ok());

        let mut bad = config(dir.path().join("ckpt.safetensors"));
        bad.pretrained_backbone = Some(dir.path().join("absent.safetensors"));
        assert!(matches!(
            Trainer::new(regression_model(), bad),
            Err(RetinaError::ModelLoad(_))
        ));
    }

    #[test]
    fn missing_images_abort_before_training() {
        let (dir, csv_path, folder) = write_fixture(&ROWS[..3], &IMAGES[..2]);
        let dataset = RetinaDataset::from_csv(&csv_path, &folder, LabelPolicy::ZeroFill).unwrap();
        let checkpoint = dir.path().join("ckpt.safetensors");

        let mut trainer = Trainer::new(regression_model(), config(checkpoint.clone())).unwrap();
        let err = trainer.run(&dataset).unwrap_err();
        assert!(matches!(err, RetinaError::TrainingData(_)));
        assert!(err.to_string().contains("c.png"));
        assert!(!checkpoint.exists());
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let (dir, csv_path, folder) = write_fixture(&[], &[]);
        let dataset = RetinaDataset::from_csv(&csv_path, &folder, LabelPolicy::ZeroFill).unwrap();

        let mut trainer =
            Trainer::new(regression_model(), config(dir.path().join("c.safetensors"))).unwrap();
        assert!(matches!(
            trainer.run(&dataset),
            Err(RetinaError::TrainingData(_))
        ));
    }

    #[test]
    fn invalid_setups_are_config_errors() {
        let classifier =
            RetinaModel::build(ModelVariant::Classification, BackboneSpec::Conv, Device::Cpu)
                .unwrap();
        assert!(matches!(
            Trainer::new(classifier, TrainingConfig::default()),
            Err(RetinaError::Config(_))
        ));

        let zero_batch = TrainingConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            Trainer::new(regression_model(), zero_batch),
            Err(RetinaError::Config(_))
        ));
    }
}
