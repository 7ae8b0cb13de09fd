use crate::models::ModelVariant;
use crate::utils::error::RetinaError;
use crate::Result;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::{Array4, ArrayView4, Axis};

/// 网络输入边长
pub const INPUT_SIZE: u32 = 224;

/// 回归变体的逐通道归一化参数
const NORM_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// 网络输入张量 (N, 224, 224, 3)
pub type InputTensor = Array4<f32>;

pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// 将任意尺寸/颜色模式的图像转换为固定形状的输入张量。
    ///
    /// 不修改源图像；同一输入始终得到逐位相同的张量。
    pub fn preprocess(image: &DynamicImage, variant: ModelVariant) -> Result<InputTensor> {
        match variant {
            ModelVariant::Classification => Self::preprocess_classification(image),
            ModelVariant::Regression => Self::preprocess_regression(image),
        }
    }

    /// 分类变体：Lanczos3 缩放，保留 0-255 整数取值
    fn preprocess_classification(image: &DynamicImage) -> Result<InputTensor> {
        let resized = image
            .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Lanczos3)
            .to_rgb8();

        Self::to_tensor(&resized, |_, value| value as f32)
    }

    /// 回归变体：先转RGB，双线性缩放，再按 mean/std 归一化
    fn preprocess_regression(image: &DynamicImage) -> Result<InputTensor> {
        let rgb = image.to_rgb8();
        let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

        Self::to_tensor(&resized, |channel, value| {
            (value as f32 / 255.0 - NORM_MEAN[channel]) / NORM_STD[channel]
        })
    }

    /// 转换RgbImage为 (1, H, W, 3) 张量
    fn to_tensor<F>(rgb: &RgbImage, map: F) -> Result<InputTensor>
    where
        F: Fn(usize, u8) -> f32,
    {
        let (width, height) = rgb.dimensions();
        let values: Vec<f32> = rgb
            .as_raw()
            .iter()
            .enumerate()
            .map(|(i, &value)| map(i % 3, value))
            .collect();

        Array4::from_shape_vec((1, height as usize, width as usize, 3), values)
            .map_err(|e| RetinaError::Preprocess(format!("Failed to build input tensor: {}", e)))
    }

    /// 沿batch维拼接多个样本
    pub fn stack(samples: &[InputTensor]) -> Result<Array4<f32>> {
        if samples.is_empty() {
            return Err(RetinaError::Preprocess("Cannot stack an empty batch".to_string()));
        }

        let views: Vec<ArrayView4<f32>> = samples.iter().map(|s| s.view()).collect();
        ndarray::concatenate(Axis(0), &views)
            .map_err(|e| RetinaError::Preprocess(format!("Failed to stack batch: {}", e)))
    }
}
