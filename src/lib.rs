pub mod config;
pub mod image;
pub mod models;
pub mod prediction;
pub mod training;
pub mod utils;
pub mod web;

// 重新导出主要类型
pub use config::Config;
pub use prediction::{PredictionService, PredictionStore, ResultRecord};
pub use utils::error::RetinaError;

pub type Result<T> = std::result::Result<T, RetinaError>;
