use crate::image::{ImageLoader, ImagePreprocessor, InputTensor};
use crate::models::ModelVariant;
use crate::prediction::FEATURE_NAMES;
use crate::utils::error::RetinaError;
use crate::Result;
use ndarray::Array4;
use std::path::{Path, PathBuf};

/// 一条训练标签：按 `FEATURE_NAMES` 顺序排列的14个数值
pub type Labels = [f32; 14];

const FILENAME_COLUMN: &str = "filename";

/// 标签单元格无法解析时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LabelPolicy {
    /// 空值、非数值、非有限值一律记为 0
    #[default]
    ZeroFill,
    /// 遇到无法解析的单元格直接报错
    Strict,
}

#[derive(Debug, Clone)]
struct Row {
    filename: String,
    labels: Labels,
}

/// CSV + 图像目录组成的回归训练集
#[derive(Debug, Clone)]
pub struct RetinaDataset {
    image_folder: PathBuf,
    rows: Vec<Row>,
}

impl RetinaDataset {
    /// 读取 CSV（需含 `filename` 及全部特征列，顺序任意，多余列忽略）
    pub fn from_csv(csv_path: &Path, image_folder: &Path, policy: LabelPolicy) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(csv_path)
            .map_err(|e| {
                RetinaError::TrainingData(format!(
                    "Failed to open dataset {}: {}",
                    csv_path.display(),
                    e
                ))
            })?;

        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                RetinaError::TrainingData(format!(
                    "Dataset {} is missing column '{}'",
                    csv_path.display(),
                    name
                ))
            })
        };

        let filename_idx = column(FILENAME_COLUMN)?;
        let feature_idx = FEATURE_NAMES
            .iter()
            .map(|name| column(name))
            .collect::<Result<Vec<usize>>>()?;

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            // 表头占第1行
            let line = i + 2;

            let filename = record.get(filename_idx).unwrap_or_default();
            if filename.is_empty() {
                return Err(RetinaError::TrainingData(format!(
                    "Row {} has an empty filename",
                    line
                )));
            }

            let mut labels = [0.0f32; 14];
            for (slot, (&idx, name)) in labels.iter_mut().zip(feature_idx.iter().zip(FEATURE_NAMES)) {
                let cell = record.get(idx).unwrap_or_default();
                *slot = parse_label(cell, policy).ok_or_else(|| {
                    RetinaError::TrainingData(format!(
                        "Row {} column '{}': cannot parse '{}' as a number",
                        line, name, cell
                    ))
                })?;
            }

            rows.push(Row {
                filename: filename.to_string(),
                labels,
            });
        }

        tracing::info!(
            "Loaded dataset {} with {} samples",
            csv_path.display(),
            rows.len()
        );

        Ok(Self {
            image_folder: image_folder.to_path_buf(),
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn image_path(&self, idx: usize) -> Option<PathBuf> {
        self.rows.get(idx).map(|row| self.image_folder.join(&row.filename))
    }

    pub fn labels(&self, idx: usize) -> Option<&Labels> {
        self.rows.get(idx).map(|row| &row.labels)
    }

    /// 训练开始前确认所有引用的图像都存在
    pub fn verify_images(&self) -> Result<()> {
        let missing: Vec<&str> = self
            .rows
            .iter()
            .filter(|row| !self.image_folder.join(&row.filename).is_file())
            .map(|row| row.filename.as_str())
            .collect();

        if let Some(first) = missing.first() {
            return Err(RetinaError::TrainingData(format!(
                "{} image(s) missing from {} (first: {})",
                missing.len(),
                self.image_folder.display(),
                first
            )));
        }
        Ok(())
    }

    /// 加载单个样本，预处理与服务端回归推理完全一致
    pub fn sample(&self, idx: usize) -> Result<(InputTensor, Labels)> {
        let row = self.rows.get(idx).ok_or_else(|| {
            RetinaError::TrainingData(format!(
                "Sample index {} out of range ({} samples)",
                idx,
                self.rows.len()
            ))
        })?;

        let path = self.image_folder.join(&row.filename);
        let image = ImageLoader::from_path(&path).map_err(|e| {
            RetinaError::TrainingData(format!("Failed to load {}: {}", path.display(), e))
        })?;
        let tensor = ImagePreprocessor::preprocess(&image, ModelVariant::Regression)?;

        Ok((tensor, row.labels))
    }

    /// 组装一个批次：(N, 224, 224, 3) 图像与 N 组标签
    pub fn batch(&self, indices: &[usize]) -> Result<(Array4<f32>, Vec<Labels>)> {
        let mut images = Vec::with_capacity(indices.len());
        let mut labels = Vec::with_capacity(indices.len());
        for &idx in indices {
            let (image, label) = self.sample(idx)?;
            images.push(image);
            labels.push(label);
        }
        Ok((ImagePreprocessor::stack(&images)?, labels))
    }
}

fn parse_label(cell: &str, policy: LabelPolicy) -> Option<f32> {
    match (cell.parse::<f32>(), policy) {
        (Ok(value), _) if value.is_finite() => Some(value),
        (_, LabelPolicy::ZeroFill) => Some(0.0),
        (_, LabelPolicy::Strict) => None,
    }
}
