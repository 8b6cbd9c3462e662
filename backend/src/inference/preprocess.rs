use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader};
use ndarray::Array4;
use std::io::Cursor;

pub const INPUT_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Uploaded file is empty")]
    Empty,
    #[error("Uploaded file is not a readable image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Failed to read uploaded image: {0}")]
    Io(#[from] std::io::Error),
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
    if bytes.is_empty() {
        return Err(PreprocessError::Empty);
    }
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;
    Ok(image)
}

/// RGB, 224x224, scaled to [0, 1], with a leading batch axis of 1.
pub fn preprocess_image(image: &DynamicImage) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);
    let side = INPUT_SIZE as usize;

    Array4::from_shape_fn((1, side, side, CHANNELS), |(_, y, x, c)| {
        f32::from(resized.get_pixel(x as u32, y as u32)[c]) / 255.0
    })
}

pub fn preprocess(bytes: &[u8]) -> Result<Array4<f32>, PreprocessError> {
    let image = decode_image(bytes)?;
    log::debug!(
        "Decoded {}x{} {:?} image",
        image.width(),
        image.height(),
        image.color()
    );
    Ok(preprocess_image(&image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Luma, LumaA, Rgb, RgbImage, Rgba};

    // Resampling may round a uniform channel by one intensity step.
    const ONE_LEVEL: f32 = 1.0 / 255.0 + 1e-6;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, format).unwrap();
        bytes.into_inner()
    }

    fn assert_model_ready(tensor: &Array4<f32>) {
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn rgb_of_any_size_becomes_model_input() {
        for (w, h) in [(640, 480), (1, 1), (224, 224), (17, 900)] {
            let image = RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
            let tensor = preprocess(&encode(DynamicImage::ImageRgb8(image), ImageFormat::Png)).unwrap();
            assert_model_ready(&tensor);
        }
    }

    #[test]
    fn grayscale_and_alpha_are_expanded_to_rgb() {
        let gray = DynamicImage::ImageLuma8(image::ImageBuffer::from_pixel(30, 40, Luma([200u8])));
        let tensor = preprocess(&encode(gray, ImageFormat::Png)).unwrap();
        assert_model_ready(&tensor);
        assert!((tensor[[0, 10, 10, 0]] - 200.0 / 255.0).abs() <= ONE_LEVEL);
        assert_eq!(tensor[[0, 10, 10, 0]], tensor[[0, 10, 10, 2]]);

        let gray_alpha =
            DynamicImage::ImageLumaA8(image::ImageBuffer::from_pixel(5, 5, LumaA([10u8, 0])));
        assert_model_ready(&preprocess(&encode(gray_alpha, ImageFormat::Png)).unwrap());

        let rgba = DynamicImage::ImageRgba8(image::ImageBuffer::from_pixel(
            300,
            120,
            Rgba([255u8, 0, 0, 64]),
        ));
        let tensor = preprocess(&encode(rgba, ImageFormat::Png)).unwrap();
        assert_model_ready(&tensor);
        assert!((tensor[[0, 100, 100, 0]] - 1.0).abs() <= ONE_LEVEL);
        assert!(tensor[[0, 100, 100, 1]] <= ONE_LEVEL);
    }

    #[test]
    fn jpeg_uploads_are_accepted() {
        let image = RgbImage::from_pixel(50, 80, Rgb([10, 200, 30]));
        let tensor = preprocess(&encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg)).unwrap();
        assert_model_ready(&tensor);
    }

    #[test]
    fn extreme_pixels_map_to_unit_range_bounds() {
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])));
        assert!(preprocess_image(&white).iter().all(|v| (1.0 - v) <= ONE_LEVEL));

        let black = DynamicImage::ImageRgb8(RgbImage::from_pixel(500, 3, Rgb([0, 0, 0])));
        assert!(preprocess_image(&black).iter().all(|v| *v <= ONE_LEVEL));
    }

    #[test]
    fn preprocessing_is_deterministic() {
        let image = RgbImage::from_fn(97, 61, |x, y| Rgb([(x * 3) as u8, (y * 5) as u8, (x + y) as u8]));
        let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Png);
        assert_eq!(preprocess(&bytes).unwrap(), preprocess(&bytes).unwrap());
    }

    #[test]
    fn non_image_payloads_are_rejected() {
        assert!(matches!(preprocess(b""), Err(PreprocessError::Empty)));
        assert!(matches!(
            preprocess(b"this is a plain text file, not a leaf photo"),
            Err(PreprocessError::Decode(_))
        ));

        let mut truncated = encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([1, 2, 3]))),
            ImageFormat::Png,
        );
        truncated.truncate(40);
        assert!(preprocess(&truncated).is_err());
    }
}
