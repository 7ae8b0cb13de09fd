use crate::utils::error::RetinaError;
use crate::Result;
use base64::Engine;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::path::Path;

/// 单张图像的最大字节数
pub const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;

pub struct ImageLoader;

impl ImageLoader {
    /// 从base64字符串加载图像
    pub fn from_base64(base64_data: &str) -> Result<DynamicImage> {
        // 移除可能的数据URL前缀 (data:image/xxx;base64,)
        let base64_clean = match base64_data.trim().split_once(',') {
            Some((prefix, payload)) if prefix.starts_with("data:") => payload,
            _ => base64_data.trim(),
        };

        let image_bytes = base64::engine::general_purpose::STANDARD.decode(base64_clean)?;

        Self::from_bytes(&image_bytes)
    }

    /// 从字节流加载图像
    pub fn from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(RetinaError::FileTooLarge(bytes.len(), MAX_IMAGE_BYTES));
        }

        if let Some(format) = Self::detect_format(bytes) {
            if !Self::is_supported_format(format) {
                return Err(RetinaError::UnsupportedFormat(format!("{:?}", format)));
            }
        }

        let image = image::load_from_memory(bytes)?;
        Self::validate_dimensions(&image)?;

        Ok(image)
    }

    /// 从文件路径加载图像
    pub fn from_path(path: &Path) -> Result<DynamicImage> {
        Ok(image::open(path)?)
    }

    /// 检测图像格式
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    /// 验证图像格式是否支持
    pub fn is_supported_format(format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Png
                | ImageFormat::Jpeg
                | ImageFormat::Bmp
                | ImageFormat::Tiff
                | ImageFormat::WebP
                | ImageFormat::Gif
        )
    }

    /// 验证图像尺寸
    pub fn validate_dimensions(image: &DynamicImage) -> Result<()> {
        let (width, height) = image.dimensions();

        if width == 0 || height == 0 {
            return Err(RetinaError::InvalidInput(format!(
                "Image has no pixels: {}x{}",
                width, height
            )));
        }

        if width > 8192 || height > 8192 {
            return Err(RetinaError::InvalidInput(format!(
                "Image too large: {}x{}, maximum 8192x8192",
                width, height
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn decodes_plain_and_data_url_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(8, 6));

        let plain = ImageLoader::from_base64(&encoded).unwrap();
        assert_eq!(plain.dimensions(), (8, 6));

        let data_url = format!("data:image/png;base64,{}", encoded);
        let from_url = ImageLoader::from_base64(&data_url).unwrap();
        assert_eq!(from_url.dimensions(), (8, 6));
    }

    #[test]
    fn rejects_garbage_payloads() {
        assert!(matches!(
            ImageLoader::from_base64("not base64 at all!"),
            Err(RetinaError::Base64(_))
        ));
        assert!(matches!(
            ImageLoader::from_bytes(b"definitely not an image"),
            Err(RetinaError::ImageDecode(_))
        ));
    }

    #[test]
    fn rejects_oversized_payloads() {
        let bytes = vec![0u8; MAX_IMAGE_BYTES + 1];
        assert!(matches!(
            ImageLoader::from_bytes(&bytes),
            Err(RetinaError::FileTooLarge(_, MAX_IMAGE_BYTES))
        ));
    }
}
