use crate::image::ImagePreprocessor;
use crate::models::{ModelVariant, RetinaModel};
use crate::prediction::deriver::ResultDeriver;
use crate::prediction::store::PredictionStore;
use crate::prediction::types::ResultRecord;
use crate::Result;
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// 上传图像对外的 URL 前缀
pub const UPLOAD_URL_PREFIX: &str = "/static/uploads";

/// 预测服务：预处理 -> 推理 -> 结果推导 -> 存储
#[derive(Clone)]
pub struct PredictionService {
    model: Arc<RetinaModel>,
    store: Arc<PredictionStore>,
    upload_dir: Option<PathBuf>,
}

impl PredictionService {
    pub fn new(model: Arc<RetinaModel>, store: Arc<PredictionStore>) -> Self {
        Self {
            model,
            store,
            upload_dir: None,
        }
    }

    /// 设置后，提交的图像会以 `{id}.jpg` 保存到该目录
    pub fn with_upload_dir(mut self, upload_dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Some(upload_dir.into());
        self
    }

    pub fn variant(&self) -> ModelVariant {
        self.model.variant()
    }

    pub fn store(&self) -> &Arc<PredictionStore> {
        &self.store
    }

    pub fn upload_dir(&self) -> Option<&Path> {
        self.upload_dir.as_deref()
    }

    /// 对单张图像推理并推导结果（不写入存储）
    pub fn predict(&self, image: &DynamicImage, image_url: &str) -> Result<ResultRecord> {
        let start = Instant::now();
        let variant = self.model.variant();

        let input = ImagePreprocessor::preprocess(image, variant)?;
        let raw = self.model.predict_raw(&input)?;
        let record = ResultDeriver::derive(variant, &raw, image_url)?;

        debug!(
            "{} prediction finished in {:?}: level={}",
            variant,
            start.elapsed(),
            record.level()
        );
        Ok(record)
    }

    /// 完整的提交流程：分配 ID、推理、保存图像、写入存储
    pub fn submit(&self, image: DynamicImage) -> Result<(String, Arc<ResultRecord>)> {
        let id = PredictionStore::generate_id();
        let filename = format!("{}.jpg", id);
        let image_url = format!("{}/{}", UPLOAD_URL_PREFIX, filename);

        let record = self.predict(&image, &image_url)?;

        if let Some(dir) = &self.upload_dir {
            std::fs::create_dir_all(dir)?;
            image
                .to_rgb8()
                .save_with_format(dir.join(&filename), ImageFormat::Jpeg)?;
        }

        let stored = self.store.put(id.clone(), record);
        info!(
            "Stored prediction {} (variant={}, level={})",
            id,
            stored.variant(),
            stored.level()
        );
        Ok((id, stored))
    }

    pub fn get_result(&self, id: &str) -> Option<Arc<ResultRecord>> {
        self.store.get(id)
    }

    /// 建议页面的等级：钳制到当前变体的有效范围
    pub fn advice_level(&self, requested: i64) -> u8 {
        ResultDeriver::clamp_level(requested, self.variant().level_range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackboneSpec;
    use candle_core::Device;
    use image::{Rgb, RgbImage};
    use regex::Regex;
    use tempfile::tempdir;

    fn service(variant: ModelVariant) -> PredictionService {
        let model = RetinaModel::build(variant, BackboneSpec::Conv, Device::Cpu).unwrap();
        PredictionService::new(Arc::new(model), Arc::new(PredictionStore::new()))
    }

    fn black_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 50, Rgb([0, 0, 0])))
    }

    #[test]
    fn classification_submission_produces_valid_record() {
        let dir = tempdir().unwrap();
        let service = service(ModelVariant::Classification).with_upload_dir(dir.path());

        let (id, record) = service.submit(black_image()).unwrap();

        match record.as_ref() {
            ResultRecord::Severity(r) => {
                assert!(r.level <= 4);
                assert!(Regex::new(r"^\d\.\d{3}$").unwrap().is_match(&r.probability));
                assert!((0.0..=100.0).contains(&r.display_pct));
                assert_eq!(r.image_url, format!("/static/uploads/{}.jpg", id));
            }
            other => panic!("unexpected record: {:?}", other),
        }

        assert!(dir.path().join(format!("{}.jpg", id)).exists());
        assert_eq!(service.get_result(&id).unwrap(), record);
    }

    #[test]
    fn regression_submission_produces_valid_record() {
        let service = service(ModelVariant::Regression);
        let (id, record) = service.submit(black_image()).unwrap();

        match record.as_ref() {
            ResultRecord::Risk(r) => {
                assert!((1..=5).contains(&r.level));
                assert_eq!(r.risk_label, format!("Level {}", r.level));
                assert!((0.0..=100.0).contains(&r.display_pct));
            }
            other => panic!("unexpected record: {:?}", other),
        }
        assert!(service.get_result(&id).is_some());
    }

    #[test]
    fn unknown_result_is_absent() {
        let service = service(ModelVariant::Classification);
        assert!(service.get_result("missing").is_none());
    }

    #[test]
    fn advice_level_is_clamped_per_variant() {
        assert_eq!(service(ModelVariant::Classification).advice_level(9), 4);
        assert_eq!(service(ModelVariant::Regression).advice_level(-2), 1);
    }
}
