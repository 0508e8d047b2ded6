use crate::image::ImageView;

/// How samples outside the image are resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BorderMode {
    Clamp,
    Constant(f64),
    /// Out-of-bounds reads yield `None`.
    Reject,
}

/// Bilinear sample at pixel-center coordinates `(x, y)`.
pub fn sample_bilinear<T: Copy + Into<f64>>(
    img: &ImageView<'_, T>,
    x: f64,
    y: f64,
    border: BorderMode,
) -> Option<f64> {
    if img.is_empty() {
        return match border {
            BorderMode::Constant(v) => Some(v),
            _ => None,
        };
    }

    let x0 = x.floor() as isize;
    let y0 = y.floor() as isize;
    let dx = x - x0 as f64;
    let dy = y - y0 as f64;

    let p00 = sample_at(img, x0, y0, border)?;
    let p10 = sample_at(img, x0 + 1, y0, border)?;
    let p01 = sample_at(img, x0, y0 + 1, border)?;
    let p11 = sample_at(img, x0 + 1, y0 + 1, border)?;

    let top = p00 * (1.0 - dx) + p10 * dx;
    let bottom = p01 * (1.0 - dx) + p11 * dx;
    Some(top * (1.0 - dy) + bottom * dy)
}

fn sample_at<T: Copy + Into<f64>>(
    img: &ImageView<'_, T>,
    x: isize,
    y: isize,
    border: BorderMode,
) -> Option<f64> {
    let inside = x >= 0 && y >= 0 && (x as usize) < img.width() && (y as usize) < img.height();
    if inside {
        return img.get(x as usize, y as usize).map(|&v| v.into());
    }

    match border {
        BorderMode::Constant(c) => Some(c),
        BorderMode::Reject => None,
        BorderMode::Clamp => {
            let xi = x.clamp(0, img.width() as isize - 1) as usize;
            let yi = y.clamp(0, img.height() as isize - 1) as usize;
            img.get(xi, yi).map(|&v| v.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::image::Image;
    use crate::sample::{BorderMode, sample_bilinear};

    #[test]
    fn bilinear_on_2x2_center_and_border_modes() {
        let img = Image::from_vec(2, 2, vec![0u16, 10, 20, 30]).expect("valid image");
        let view = img.as_view();

        let center = sample_bilinear(&view, 0.5, 0.5, BorderMode::Clamp).expect("inside");
        assert!((center - 15.0).abs() < 1e-12);

        let neg_clamp = sample_bilinear(&view, -0.25, -0.25, BorderMode::Clamp).expect("clamped");
        assert!(neg_clamp.abs() < 1e-12);

        // p00/p10/p01 are constant(100), p11 is image(0).
        let neg_constant =
            sample_bilinear(&view, -0.25, -0.25, BorderMode::Constant(100.0)).expect("filled");
        assert!((neg_constant - 43.75).abs() < 1e-12);

        assert!(sample_bilinear(&view, -0.25, 0.0, BorderMode::Reject).is_none());
    }

    #[test]
    fn exact_pixel_centers() {
        let img = Image::from_vec(3, 1, vec![5u16, 7, 9]).expect("valid image");
        let view = img.as_view();
        let v = sample_bilinear(&view, 1.0, 0.0, BorderMode::Clamp).expect("inside");
        assert!((v - 7.0).abs() < 1e-12);
    }
}
