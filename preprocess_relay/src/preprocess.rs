use image::imageops::FilterType;
use ndarray::{Array, Ix4};
use std::io::Cursor;
use thiserror::Error;

pub const TARGET_WIDTH: u32 = 299;
pub const TARGET_HEIGHT: u32 = 299;
pub const CHANNELS: usize = 3;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to probe image format: {0}")]
    UnknownFormat(std::io::Error),
    #[error("failed to decode image: {0}")]
    DecodeFailed(#[from] image::ImageError),
}

/// Shapes encoded image bytes for the inception model: decode, force RGB,
/// bilinear resize to 299x299, f32, rescale [0,255] to [-1,1], add a leading
/// batch axis.
pub fn preprocess(image_bytes: &[u8]) -> Result<Array<f32, Ix4>, PreprocessError> {
    let image_reader = image::ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()
        .map_err(PreprocessError::UnknownFormat)?;
    let decoded = image_reader.decode()?;

    let rgb = decoded.to_rgb8();
    let resized = image::imageops::resize(&rgb, TARGET_WIDTH, TARGET_HEIGHT, FilterType::Triangle);

    let mut input = Array::zeros((1, TARGET_HEIGHT as usize, TARGET_WIDTH as usize, CHANNELS));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        input[[0, y as usize, x as usize, 0]] = (r as f32) / 127.5 - 1.0;
        input[[0, y as usize, x as usize, 1]] = (g as f32) / 127.5 - 1.0;
        input[[0, y as usize, x as usize, 2]] = (b as f32) / 127.5 - 1.0;
    }

    Ok(input)
}
