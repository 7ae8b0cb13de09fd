use anyhow::Result;
use candle_core::Device;
use clap::Parser;
use retina_screen::{
    config::OnnxConfig,
    models::{BackboneKind, BackboneSpec, ModelVariant, RetinaModel},
    training::{LabelPolicy, RetinaDataset, Trainer, TrainingConfig},
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retina-train")]
#[command(about = "Train the 14-output retina risk regression model")]
struct Args {
    /// CSV file with a filename column and 14 feature columns
    #[arg(long, default_value = "pateint.csv")]
    csv: PathBuf,

    /// Folder containing the referenced images
    #[arg(long, default_value = "Processed_Images")]
    images: PathBuf,

    /// Output checkpoint path (the server loads <models-dir>/retina_multioutput.safetensors)
    #[arg(long, default_value = "models/retina_multioutput.safetensors")]
    checkpoint: PathBuf,

    /// Feature extractor backend
    #[arg(long, value_enum, default_value_t = BackboneKind::Onnx)]
    backbone: BackboneKind,

    /// ONNX backbone model path
    #[arg(long, default_value = "models/backbone/resnet50.onnx")]
    backbone_path: PathBuf,

    /// Safetensors file with pretrained backbone.* weights (conv backbone)
    #[arg(long)]
    pretrained: Option<PathBuf>,

    /// Update backbone weights as well as the head
    #[arg(long)]
    fine_tune: bool,

    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 16)]
    batch_size: usize,

    #[arg(long, default_value_t = 1e-4)]
    lr: f64,

    /// How to treat unparsable label cells
    #[arg(long, value_enum, default_value_t = LabelPolicy::ZeroFill)]
    label_policy: LabelPolicy,

    /// Seed for reproducible shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    let variant = ModelVariant::Regression;
    let onnx_config = OnnxConfig::for_variant(variant);
    let spec = match args.backbone {
        BackboneKind::Onnx => BackboneSpec::Onnx {
            path: &args.backbone_path,
            config: &onnx_config,
        },
        BackboneKind::Conv => BackboneSpec::Conv,
    };
    let model = RetinaModel::build(variant, spec, Device::Cpu)?;

    let dataset = RetinaDataset::from_csv(&args.csv, &args.images, args.label_policy)?;

    let config = TrainingConfig {
        batch_size: args.batch_size,
        epochs: args.epochs,
        learning_rate: args.lr,
        fine_tune_backbone: args.fine_tune,
        seed: args.seed,
        pretrained_backbone: args.pretrained,
        checkpoint: args.checkpoint,
        ..Default::default()
    };

    let mut trainer = Trainer::new(model, config)?;
    let report = trainer.run(&dataset)?;

    tracing::info!(
        "Training finished: samples={}, steps={}, final loss={:.4}, checkpoint={}",
        report.samples,
        report.steps,
        report.epoch_losses.last().copied().unwrap_or_default(),
        report.checkpoint.display()
    );

    Ok(())
}
