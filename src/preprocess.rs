use std::{path::Path, str::FromStr};

use image::{
    DynamicImage,
    imageops::{self, FilterType},
};

use crate::error::ServiceError;

/// Memory layout of the batch-of-one tensor handed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, H, W, 3]`
    Nhwc,
    /// `[1, 3, H, W]`
    Nchw,
}

impl FromStr for TensorLayout {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "nhwc" => Ok(TensorLayout::Nhwc),
            "nchw" => Ok(TensorLayout::Nchw),
            other => Err(format!("unknown tensor layout '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageTensor {
    pub data: Vec<f32>,
    pub shape: [i64; 4],
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ServiceError> {
    image::load_from_memory(bytes).map_err(|e| ServiceError::InvalidImage(e.to_string()))
}

pub fn load_image(path: &Path) -> Result<DynamicImage, ServiceError> {
    let reader = image::ImageReader::open(path)?
        .with_guessed_format()?;
    reader
        .decode()
        .map_err(|e| ServiceError::InvalidImage(e.to_string()))
}

/// Resampling used for uploaded files.
pub const UPLOAD_FILTER: FilterType = FilterType::Nearest;

/// Resampling used for inline base64 images (bicubic).
pub const INLINE_FILTER: FilterType = FilterType::CatmullRom;

/// RGB, `size`x`size`, channels scaled into `[0, 1]`.
pub fn preprocess(
    image: &DynamicImage,
    size: u32,
    layout: TensorLayout,
    filter: FilterType,
) -> ImageTensor {
    let rgb = imageops::resize(&image.to_rgb8(), size, size, filter);
    let side = size as usize;
    let pixels = side * side;
    let mut data = vec![0.0f32; pixels * 3];

    for (i, pixel) in rgb.pixels().enumerate() {
        for (c, &value) in pixel.0.iter().enumerate() {
            let scaled = f32::from(value) / 255.0;
            match layout {
                TensorLayout::Nhwc => data[i * 3 + c] = scaled,
                TensorLayout::Nchw => data[c * pixels + i] = scaled,
            }
        }
    }

    let s = i64::from(size);
    let shape = match layout {
        TensorLayout::Nhwc => [1, s, s, 3],
        TensorLayout::Nchw => [1, 3, s, s],
    };
    ImageTensor { data, shape }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{GrayAlphaImage, ImageFormat, LumaA, Rgb, RgbImage, Rgba, RgbaImage};

    use super::*;

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn output_has_fixed_size_and_unit_range() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(37, 211, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 255])
        }));
        let tensor = preprocess(&img, 160, TensorLayout::Nhwc, UPLOAD_FILTER);
        assert_eq!(tensor.shape, [1, 160, 160, 3]);
        assert_eq!(tensor.data.len(), 160 * 160 * 3);
        assert!(tensor.data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn nchw_layout_puts_channels_first() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 0, 51])));
        let tensor = preprocess(&img, 2, TensorLayout::Nchw, UPLOAD_FILTER);
        assert_eq!(tensor.shape, [1, 3, 2, 2]);
        assert_eq!(&tensor.data[0..4], &[1.0f32; 4]);
        assert_eq!(&tensor.data[4..8], &[0.0f32; 4]);
        assert!(tensor.data[8..12].iter().all(|v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn nhwc_layout_interleaves_channels() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([255, 0, 51])));
        let tensor = preprocess(&img, 1, TensorLayout::Nhwc, UPLOAD_FILTER);
        assert_eq!(tensor.data.len(), 3);
        assert_eq!(tensor.data[0], 1.0);
        assert_eq!(tensor.data[1], 0.0);
    }

    #[test]
    fn alpha_and_grayscale_become_three_channels() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 0])));
        assert_eq!(preprocess(&rgba, 4, TensorLayout::Nhwc, UPLOAD_FILTER).data.len(), 4 * 4 * 3);

        let gray = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(8, 8, LumaA([128, 255])));
        let tensor = preprocess(&gray, 4, TensorLayout::Nhwc, UPLOAD_FILTER);
        assert_eq!(tensor.data.len(), 4 * 4 * 3);
        assert_eq!(tensor.data[0], tensor.data[1]);
    }

    #[test]
    fn bicubic_resize_stays_in_range_and_differs_from_nearest() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, y| {
            let v = ((x * 4) % 256) as u8;
            Rgb([v, 255 - v, ((y * 4) % 256) as u8])
        }));
        let nearest = preprocess(&img, 10, TensorLayout::Nhwc, UPLOAD_FILTER);
        let bicubic = preprocess(&img, 10, TensorLayout::Nhwc, INLINE_FILTER);
        assert_eq!(nearest.shape, bicubic.shape);
        assert!(bicubic.data.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_ne!(nearest.data, bicubic.data);
    }

    #[test]
    fn decodes_png_bytes() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(5, 5, Rgb([1, 2, 3])));
        let decoded = decode_image(&encode(&img, ImageFormat::Png)).unwrap();
        assert_eq!(decoded.width(), 5);
    }

    #[test]
    fn garbage_bytes_are_an_invalid_image() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidImage(_)));
    }

    #[test]
    fn loads_image_from_path_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 6, Rgb([9, 9, 9])));
        std::fs::write(&path, encode(&img, ImageFormat::Png)).unwrap();
        assert_eq!(load_image(&path).unwrap().height(), 6);
    }

    #[test]
    fn layout_parses_case_insensitively() {
        assert_eq!("NCHW".parse::<TensorLayout>(), Ok(TensorLayout::Nchw));
        assert_eq!(" nhwc ".parse::<TensorLayout>(), Ok(TensorLayout::Nhwc));
        assert!("hwc".parse::<TensorLayout>().is_err());
    }
}
