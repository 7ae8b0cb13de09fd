pub mod dataset;
pub mod trainer;

pub use dataset::{LabelPolicy, Labels, RetinaDataset};
pub use trainer::{Trainer, TrainingConfig, TrainingPhase, TrainingReport};
