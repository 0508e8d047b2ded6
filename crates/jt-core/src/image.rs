use serde::{Deserialize, Serialize};

use crate::Error;

/// Grayscale camera frame. Pixel type is fixed for a session.
pub type Frame = Image<u16>;

#[derive(Debug, Clone, PartialEq)]
pub struct Image<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T> Image<T> {
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Result<Self, Error> {
        let expected = width.checked_mul(height).ok_or(Error::SizeMismatch {
            expected: usize::MAX,
            actual: data.len(),
        })?;

        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn as_view(&self) -> ImageView<'_, T> {
        ImageView {
            width: self.width,
            height: self.height,
            stride: self.width,
            data: &self.data,
        }
    }
}

impl<T: Clone> Image<T> {
    pub fn new_fill(width: usize, height: usize, value: T) -> Self {
        let len = width.checked_mul(height).expect("image size overflow");
        Self {
            width,
            height,
            data: vec![value; len],
        }
    }
}

impl<T: Copy> Image<T> {
    /// Copies the ROI rectangle out of this frame.
    pub fn crop(&self, roi: Roi) -> Result<Image<T>, Error> {
        let view = self.as_view().subview(roi.x0, roi.y0, roi.width, roi.height)?;
        Ok(view.to_image())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a, T> {
    width: usize,
    height: usize,
    stride: usize,
    data: &'a [T],
}

impl<'a, T> ImageView<'a, T> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn row(&self, y: usize) -> &'a [T] {
        assert!(y < self.height, "row index out of bounds");
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    pub fn get(&self, x: usize, y: usize) -> Option<&'a T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.stride + x)
    }

    pub fn subview(
        &self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Result<ImageView<'a, T>, Error> {
        if x > self.width
            || y > self.height
            || width > (self.width - x)
            || height > (self.height - y)
        {
            return Err(Error::OutOfBounds);
        }

        let start = y
            .checked_mul(self.stride)
            .and_then(|v| v.checked_add(x))
            .ok_or(Error::OutOfBounds)?;
        let min_len = min_required_len(width, height, self.stride).ok_or(Error::OutOfBounds)?;
        let tail = self.data.get(start..).ok_or(Error::OutOfBounds)?;

        if tail.len() < min_len {
            return Err(Error::OutOfBounds);
        }

        Ok(ImageView {
            width,
            height,
            stride: self.stride,
            data: tail,
        })
    }
}

impl<T: Copy> ImageView<'_, T> {
    pub fn to_image(&self) -> Image<T> {
        let mut out = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y));
        }
        Image {
            width: self.width,
            height: self.height,
            data: out,
        }
    }
}

impl<T: Copy + Into<f64>> ImageView<'_, T> {
    /// Population mean and standard deviation of all pixels.
    ///
    /// Returns `(0.0, 0.0)` for an empty view.
    pub fn mean_std(&self) -> (f64, f64) {
        if self.is_empty() {
            return (0.0, 0.0);
        }

        let n = (self.width * self.height) as f64;
        let mut sum = 0.0f64;
        for y in 0..self.height {
            for &px in self.row(y) {
                let v: f64 = px.into();
                sum += v;
            }
        }
        let mean = sum / n;

        let mut ss = 0.0f64;
        for y in 0..self.height {
            for &px in self.row(y) {
                let v: f64 = px.into();
                let d = v - mean;
                ss += d * d;
            }
        }
        (mean, (ss / n).sqrt())
    }
}

fn min_required_len(width: usize, height: usize, stride: usize) -> Option<usize> {
    if width == 0 || height == 0 {
        return Some(0);
    }

    let rows_before_last = height.checked_sub(1)?;
    let base = rows_before_last.checked_mul(stride)?;
    base.checked_add(width)
}

/// Rectangle in parent-frame pixel coordinates; `(x0, y0)` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Roi {
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
}

impl Roi {
    pub fn new(x0: usize, y0: usize, width: usize, height: usize) -> Self {
        Self {
            x0,
            y0,
            width,
            height,
        }
    }

    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_collapsed(&self) -> bool {
        self.width < 2 || self.height < 2
    }

    /// Moves the origin horizontally by `dx` pixels, keeping the ROI inside a
    /// parent of `parent_width` columns.
    pub fn shifted_x(&self, dx: f64, parent_width: usize) -> Self {
        let max_x0 = parent_width.saturating_sub(self.width) as f64;
        let x0 = (self.x0 as f64 + dx).round().clamp(0.0, max_x0) as usize;
        Self { x0, ..*self }
    }
}

#[cfg(test)]
mod tests {
    use super::{Image, Roi};

    #[test]
    fn view_indexing_with_stride() {
        let img = Image::from_vec(4, 2, vec![1u16, 2, 3, 99, 4, 5, 6, 88]).expect("valid image");
        let view = img.as_view().subview(0, 0, 3, 2).expect("inside frame");
        assert_eq!(view.stride(), 4);

        assert_eq!(view.row(0), &[1, 2, 3]);
        assert_eq!(view.row(1), &[4, 5, 6]);
        assert_eq!(view.get(2, 1), Some(&6));
        assert_eq!(view.get(3, 1), None);
    }

    #[test]
    fn crop_copies_roi() {
        let data: Vec<u16> = (0..20).collect();
        let img = Image::from_vec(5, 4, data).expect("valid image");
        let roi = img.crop(Roi::new(1, 2, 3, 2)).expect("roi inside frame");

        assert_eq!(roi.width(), 3);
        assert_eq!(roi.height(), 2);
        assert_eq!(roi.data(), &[11, 12, 13, 16, 17, 18]);
    }

    #[test]
    fn crop_outside_frame_fails() {
        let img = Image::new_fill(4, 4, 0u16);
        assert!(img.crop(Roi::new(3, 0, 2, 2)).is_err());
    }

    #[test]
    fn mean_std_of_constant_and_ramp() {
        let flat = Image::new_fill(8, 8, 10u16);
        let (m, s) = flat.as_view().mean_std();
        assert!((m - 10.0).abs() < 1e-12);
        assert!(s.abs() < 1e-12);

        let ramp = Image::from_vec(4, 1, vec![0u16, 2, 4, 6]).expect("valid image");
        let (m, s) = ramp.as_view().mean_std();
        assert!((m - 3.0).abs() < 1e-12);
        assert!((s - 5.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn roi_shift_is_clamped_to_parent() {
        let roi = Roi::new(10, 5, 20, 20);
        assert_eq!(roi.shifted_x(4.4, 100).x0, 14);
        assert_eq!(roi.shifted_x(-50.0, 100).x0, 0);
        assert_eq!(roi.shifted_x(500.0, 100).x0, 80);
    }
}
