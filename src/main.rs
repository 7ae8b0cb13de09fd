use anyhow::Result;
use clap::Parser;
use retina_screen::{
    config::Config,
    models::{BackboneKind, InputLayout, ModelVariant},
    web::serve,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retina-screen")]
#[command(about = "Retina image severity classification and risk regression service")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "0.0.0.0:5005")]
    bind: String,

    /// Number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Model directory path
    #[arg(long, default_value = "models")]
    models_dir: String,

    /// Directory where uploaded images are saved
    #[arg(long, default_value = "static/uploads")]
    upload_dir: String,

    /// Model variant to serve
    #[arg(long, value_enum, default_value_t = ModelVariant::Classification)]
    variant: ModelVariant,

    /// Feature extractor backend
    #[arg(long, value_enum, default_value_t = BackboneKind::Onnx)]
    backbone: BackboneKind,

    /// Override the ONNX backbone input layout
    #[arg(long, value_enum)]
    input_layout: Option<InputLayout>,

    /// Enable development mode
    #[arg(long)]
    dev: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting retina screening service...");
    tracing::info!("Bind address: {}", args.bind);
    tracing::info!("Models directory: {}", args.models_dir);

    let mut config = Config::new(args.bind, args.models_dir, args.workers, args.dev, args.variant)?
        .with_backbone(args.backbone)
        .with_upload_dir(args.upload_dir);
    if let Some(layout) = args.input_layout {
        config = config.with_input_layout(layout);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()?;

    runtime.block_on(serve(config))?;

    Ok(())
}
