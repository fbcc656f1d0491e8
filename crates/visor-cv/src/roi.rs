//! ROI handling shared by all matchers.
//!
//! Matching runs on a cropped view of the frame; candidate boxes are
//! reported back in full-image coordinates by offsetting with the
//! effective ROI origin.

use crate::Result;
use crate::utils::ImageUtils;
use opencv::{core::Mat, prelude::*};
use visor_core::Rect;

/// Clamp `roi` to the frame bounds. `None` or an empty ROI selects the
/// whole frame.
pub fn effective_roi(image: &Mat, roi: Option<Rect>) -> Rect {
    let (cols, rows) = (image.cols(), image.rows());
    let full = Rect::new(0, 0, cols, rows);
    let Some(roi) = roi else {
        return full;
    };
    if roi.is_empty() {
        return full;
    }

    let x = roi.x.clamp(0, cols);
    let y = roi.y.clamp(0, rows);
    Rect::new(x, y, roi.width.min(cols - x), roi.height.min(rows - y))
}

/// Crop the frame to `roi`, returning an owned continuous Mat.
pub fn crop(image: &Mat, roi: Rect) -> Result<Mat> {
    let view = Mat::roi(image, ImageUtils::to_cv_rect(roi))?;
    Ok(view.try_clone()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{CV_8UC3, Scalar};

    fn frame(rows: i32, cols: i32) -> Mat {
        Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn test_missing_roi_selects_full_frame() {
        let image = frame(50, 80);
        assert_eq!(effective_roi(&image, None), Rect::new(0, 0, 80, 50));
        assert_eq!(
            effective_roi(&image, Some(Rect::new(0, 0, 0, 0))),
            Rect::new(0, 0, 80, 50)
        );
    }

    #[test]
    fn test_roi_clamped_to_bounds() {
        let image = frame(50, 80);
        let roi = effective_roi(&image, Some(Rect::new(60, 40, 100, 100)));
        assert_eq!(roi, Rect::new(60, 40, 20, 10));
    }

    #[test]
    fn test_crop_dimensions() {
        let image = frame(50, 80);
        let cropped = crop(&image, Rect::new(10, 5, 30, 20)).unwrap();
        assert_eq!((cropped.cols(), cropped.rows()), (30, 20));
    }
}
