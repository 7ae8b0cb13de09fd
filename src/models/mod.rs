pub mod backbone;
pub mod head;
pub mod manager;
pub mod network;
pub mod onnx;
pub mod pool;
pub mod variant;

pub use backbone::{Backbone, BackboneKind, BackboneSpec, ConvBackbone};
pub use head::Head;
pub use manager::{ModelManager, ModelStats};
pub use network::RetinaModel;
pub use onnx::OnnxBackbone;
pub use pool::SessionPool;
pub use variant::{InputLayout, LevelRange, ModelVariant};
