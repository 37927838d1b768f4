//! Decoding, resizing and atomically writing cache images.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::path::Path;

/// Whether `path` decodes as a non-empty image. Only the header is read.
pub fn is_valid_image(path: impl AsRef<Path>) -> bool {
    image::image_dimensions(path.as_ref()).is_ok_and(|(w, h)| w > 0 && h > 0)
}

pub(crate) fn open(path: &Path) -> Result<DynamicImage> {
    let image = image::open(path).or_raise(|| ErrorKind::Image)?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        exn::bail!(ErrorKind::Image);
    }
    Ok(image)
}

/// Scales `image` down to fit a `size`×`size` box, preserving aspect ratio.
/// Images already inside the box are returned unchanged.
pub(crate) fn fit(image: &DynamicImage, size: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width.max(height) <= size {
        return image.clone();
    }
    image.resize(size, size, FilterType::Triangle)
}

/// Encodes `image` as PNG next to `target` and renames it into place, so a
/// reader never observes a truncated cache file.
pub(crate) fn write_png(image: &DynamicImage, target: &Path) -> Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".write-")
        .suffix(".png")
        .tempfile_in(dir)
        .or_raise(|| ErrorKind::Cache(target.to_path_buf()))?;
    image.write_to(tmp.as_file_mut(), ImageFormat::Png).or_raise(|| ErrorKind::Cache(target.to_path_buf()))?;
    tmp.persist(target).or_raise(|| ErrorKind::Cache(target.to_path_buf()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn solid_png(path: &Path, width: u32, height: u32) {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 120, 40, 255]));
    image.save_with_format(path, ImageFormat::Png).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case((1280, 1280), 512, (512, 512))]
    #[case((1280, 640), 128, (128, 64))]
    #[case((100, 100), 512, (100, 100))]
    fn test_fit(#[case] source: (u32, u32), #[case] size: u32, #[case] expected: (u32, u32)) {
        let image = DynamicImage::new_rgba8(source.0, source.1);
        assert_eq!(fit(&image, size).dimensions(), expected);
    }

    #[test]
    fn test_write_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("abc.png");
        write_png(&DynamicImage::new_rgba8(4, 4), &target).unwrap();
        assert!(is_valid_image(&target));
        assert_eq!(open(&target).unwrap().dimensions(), (4, 4));
        // Only the target remains; the temp file was renamed into place.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_garbage_is_not_an_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thumb.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        assert!(!is_valid_image(&path));
        assert!(!is_valid_image(dir.path().join("missing.png")));
    }
}
