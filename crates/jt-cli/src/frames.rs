//! Grayscale PNG frames.

use std::path::Path;

use anyhow::{Context, Result};
use image::{ImageBuffer, Luma};
use jt_core::{Frame, Image};

/// Loads any image format the `image` crate reads as 16-bit luma.
pub fn load_frame(path: &Path) -> Result<Frame> {
    let dyn_img =
        image::open(path).with_context(|| format!("opening frame {}", path.display()))?;
    let luma = dyn_img.to_luma16();
    let (w, h) = luma.dimensions();
    let data = luma.into_raw();

    Image::from_vec(w as usize, h as usize, data)
        .with_context(|| format!("constructing frame from {}", path.display()))
}

pub fn save_frame(path: &Path, frame: &Frame) -> Result<()> {
    let buf: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_raw(
        frame.width() as u32,
        frame.height() as u32,
        frame.data().to_vec(),
    )
    .context("constructing 16-bit image from frame")?;
    buf.save(path)
        .with_context(|| format!("saving frame {}", path.display()))
}

#[cfg(test)]
mod tests {
    use jt_core::Image;

    use super::{load_frame, save_frame};

    #[test]
    fn sixteen_bit_frames_survive_png() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("frame.png");
        let data: Vec<u16> = (0..12).map(|v| v * 5000).collect();
        let frame = Image::from_vec(4, 3, data).expect("valid frame");

        save_frame(&path, &frame).expect("saved");
        let back = load_frame(&path).expect("loaded");
        assert_eq!(back, frame);
    }

    #[test]
    fn missing_file_has_context() {
        let err = load_frame(std::path::Path::new("/nonexistent/frame.png")).expect_err("missing");
        assert!(format!("{err:#}").contains("opening frame"));
    }
}
