pub mod deriver;
pub mod service;
pub mod store;
pub mod types;

pub use deriver::ResultDeriver;
pub use service::{PredictionService, UPLOAD_URL_PREFIX};
pub use store::PredictionStore;
pub use types::{
    ClinicalFeatures, ResultRecord, RiskRecord, Severity, SeverityRecord, FEATURE_NAMES,
    RISK_INDEX,
};
