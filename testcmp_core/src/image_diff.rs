use crate::report::section_header;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use testcmp_common::{Result, TestCmpError};
use tracing::debug;

/// Name of the difference image written next to the new file
pub const DIFF_IMAGE_NAME: &str = "diff_image.png";

/// Result of an image comparison
#[derive(Debug, Clone)]
pub struct ImageDiffResult {
    /// Number of pixels in the larger image
    pub total_pixels: u64,
    /// Number of different pixels
    pub different_pixels: u64,
    /// Whether images have same dimensions
    pub same_dimensions: bool,
    pub old_dimensions: (u32, u32),
    pub new_dimensions: (u32, u32),
}

/// Pixel comparison of raster images
///
/// Only decoded pixel data is compared, so files differing in metadata alone
/// are identical.
#[derive(Debug, Clone)]
pub struct ImageDiffEngine {
    save_diff_image: bool,
}

impl ImageDiffEngine {
    pub fn new(save_diff_image: bool) -> Self {
        Self { save_diff_image }
    }

    pub fn compare_files(&self, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
        let old_img = image::open(old).map_err(|e| TestCmpError::format(old, e))?;
        let new_img = image::open(new).map_err(|e| TestCmpError::format(new, e))?;

        let result = compare_images(&old_img, &new_img);
        if result.different_pixels == 0 {
            return Ok(0);
        }

        section_header(detail, "diff_png", old, new)?;
        if !result.same_dimensions {
            writeln!(
                detail,
                "Different dimensions: {}x{} {}x{}",
                result.old_dimensions.0, result.old_dimensions.1, result.new_dimensions.0, result.new_dimensions.1
            )?;
        }
        writeln!(detail, "Number of different pixels: {}", result.different_pixels)?;

        if self.save_diff_image && result.same_dimensions {
            let filename = diff_image_path(new);
            debug!("Saving difference image {:?}", filename);
            create_diff_image(&old_img, &new_img)
                .save(&filename)
                .map_err(|e| TestCmpError::format(&filename, e))?;
            writeln!(detail, "See {}", filename.display())?;
        }
        detail.push('\n');

        Ok(1)
    }
}

fn diff_image_path(new: &Path) -> PathBuf {
    new.parent().unwrap_or_else(|| Path::new("")).join(DIFF_IMAGE_NAME)
}

/// Compare two decoded images pixel by pixel.
pub fn compare_images(old: &DynamicImage, new: &DynamicImage) -> ImageDiffResult {
    let old_dims = old.dimensions();
    let new_dims = new.dimensions();

    if old_dims != new_dims {
        // Images have different dimensions - consider fully different
        let total = (old_dims.0 as u64 * old_dims.1 as u64).max(new_dims.0 as u64 * new_dims.1 as u64);
        return ImageDiffResult {
            total_pixels: total,
            different_pixels: total.max(1),
            same_dimensions: false,
            old_dimensions: old_dims,
            new_dimensions: new_dims,
        };
    }

    let old_rgba = old.to_rgba8();
    let new_rgba = new.to_rgba8();
    let different_pixels = old_rgba
        .pixels()
        .zip(new_rgba.pixels())
        .filter(|(a, b)| a != b)
        .count() as u64;

    ImageDiffResult {
        total_pixels: old_dims.0 as u64 * old_dims.1 as u64,
        different_pixels,
        same_dimensions: true,
        old_dimensions: old_dims,
        new_dimensions: new_dims,
    }
}

/// Differing pixels in red over a grayscale rendering of the old image.
///
/// Both images must have the same dimensions.
pub fn create_diff_image(old: &DynamicImage, new: &DynamicImage) -> RgbaImage {
    let old_rgba = old.to_rgba8();
    let new_rgba = new.to_rgba8();
    let (width, height) = old_rgba.dimensions();

    RgbaImage::from_fn(width, height, |x, y| {
        let old_pixel = old_rgba.get_pixel(x, y);
        if new_rgba.get_pixel_checked(x, y) != Some(old_pixel) {
            Rgba([255, 0, 0, 255])
        } else {
            let gray = ((old_pixel[0] as u16 + old_pixel[1] as u16 + old_pixel[2] as u16) / 3) as u8;
            Rgba([gray, gray, gray, 255])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn filled(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    #[test]
    fn identical_pixels() {
        let old = DynamicImage::ImageRgba8(filled(10, 10, [100, 150, 200, 255]));
        let new = DynamicImage::ImageRgba8(filled(10, 10, [100, 150, 200, 255]));
        let result = compare_images(&old, &new);
        assert_eq!(result.different_pixels, 0);
        assert_eq!(result.total_pixels, 100);
    }

    #[test]
    fn different_dimensions() {
        let old = DynamicImage::ImageRgba8(filled(10, 10, [0, 0, 0, 255]));
        let new = DynamicImage::ImageRgba8(filled(20, 20, [0, 0, 0, 255]));
        let result = compare_images(&old, &new);
        assert!(!result.same_dimensions);
        assert_eq!(result.different_pixels, 400);
    }

    #[test]
    fn differing_png_files_write_diff_image() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("old")).unwrap();
        fs::create_dir(temp.path().join("new")).unwrap();
        let old = temp.path().join("old/map.png");
        let new = temp.path().join("new/map.png");

        filled(4, 4, [10, 20, 30, 255]).save(&old).unwrap();
        let mut changed = filled(4, 4, [10, 20, 30, 255]);
        changed.put_pixel(1, 2, Rgba([200, 20, 30, 255]));
        changed.put_pixel(3, 3, Rgba([10, 20, 31, 255]));
        changed.save(&new).unwrap();

        let mut detail = String::new();
        assert_eq!(ImageDiffEngine::new(true).compare_files(&old, &new, &mut detail).unwrap(), 1);
        assert!(detail.contains("diff_png"));
        assert!(detail.contains("Number of different pixels: 2"));

        let saved = temp.path().join("new").join(DIFF_IMAGE_NAME);
        assert!(detail.contains(&format!("See {}", saved.display())));
        let diff = image::open(&saved).unwrap().to_rgba8();
        assert_eq!(diff.get_pixel(1, 2), &Rgba([255, 0, 0, 255]));
        assert_eq!(diff.get_pixel(0, 0), &Rgba([20, 20, 20, 255]));
    }

    #[test]
    fn same_pixels_is_identical() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("a.png");
        let new = temp.path().join("b.png");
        filled(3, 3, [1, 2, 3, 255]).save(&old).unwrap();
        filled(3, 3, [1, 2, 3, 255]).save(&new).unwrap();

        let mut detail = String::new();
        assert_eq!(ImageDiffEngine::new(true).compare_files(&old, &new, &mut detail).unwrap(), 0);
        assert!(detail.is_empty());
        assert!(!temp.path().join(DIFF_IMAGE_NAME).exists());
    }

    #[test]
    fn undecodable_png_is_a_format_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.png");
        fs::write(&path, b"not a png").unwrap();

        let mut detail = String::new();
        let err = ImageDiffEngine::new(false)
            .compare_files(&path, &path, &mut detail)
            .unwrap_err();
        assert!(err.is_format());
    }
}
