// src/preprocess.rs
use image::imageops::FilterType;
use std::path::Path;

use crate::error::ApiError;

/// Edge length the recognition models expect.
pub const TARGET_SIZE: u32 = 224;

/// Normalizes an uploaded image in place: decode, force RGB, resize to
/// 224x224. Pixel scaling to [0, 1] happens inside the inference sidecar.
pub fn preprocess_image(path: &Path) -> Result<(), ApiError> {
    let img = image::open(path)
        .map_err(|e| ApiError::Validation(format!("could not decode image: {}", e)))?;

    let normalized = image::imageops::resize(
        &img.to_rgb8(),
        TARGET_SIZE,
        TARGET_SIZE,
        FilterType::Triangle,
    );

    normalized
        .save(path)
        .map_err(|e| ApiError::Io(std::io::Error::other(e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn resizes_to_target_dimensions() {
        let path = std::env::temp_dir().join(format!("visionchat-test-{}.png", uuid::Uuid::new_v4()));
        RgbImage::new(640, 480).save(&path).unwrap();

        preprocess_image(&path).unwrap();

        let reloaded = image::open(&path).unwrap();
        assert_eq!(reloaded.width(), TARGET_SIZE);
        assert_eq!(reloaded.height(), TARGET_SIZE);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_non_image_payload() {
        let path = std::env::temp_dir().join(format!("visionchat-test-{}.png", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"not an image").unwrap();

        let err = preprocess_image(&path).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        std::fs::remove_file(&path).ok();
    }
}
