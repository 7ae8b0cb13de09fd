use crate::prediction::types::ResultRecord;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 进程内预测结果存储：按 ID 写入一次，之后只读
#[derive(Default)]
pub struct PredictionStore {
    records: RwLock<HashMap<String, Arc<ResultRecord>>>,
}

impl PredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 生成新的随机 ID（UUID v4 文本）
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// 写入结果。ID 已存在时保留原记录并返回它
    pub fn put(&self, id: impl Into<String>, record: ResultRecord) -> Arc<ResultRecord> {
        let id = id.into();
        let mut records = self.records.write();
        if let Some(existing) = records.get(&id) {
            tracing::warn!("Prediction {} already stored, keeping original record", id);
            return Arc::clone(existing);
        }
        let record = Arc::new(record);
        records.insert(id, Arc::clone(&record));
        record
    }

    pub fn get(&self, id: &str) -> Option<Arc<ResultRecord>> {
        self.records.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
