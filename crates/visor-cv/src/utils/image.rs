//! Image conversion and annotation utilities.

use crate::Result;
use anyhow::{Context, anyhow};
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
};
use visor_core::Rect;

/// Image utility functions shared by the matchers and the pipeline.
pub struct ImageUtils;

impl ImageUtils {
    pub fn to_cv_rect(rect: Rect) -> core::Rect {
        core::Rect::new(rect.x, rect.y, rect.width, rect.height)
    }

    pub fn from_cv_rect(rect: core::Rect) -> Rect {
        Rect::new(rect.x, rect.y, rect.width, rect.height)
    }

    /// Convert a BGR Mat into an `image::RgbImage`.
    pub fn mat_to_rgb(mat: &Mat) -> Result<image::RgbImage> {
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(mat, &mut rgb, imgproc::COLOR_BGR2RGB)
            .context("BGR to RGB conversion failed")?;
        let rgb = if rgb.is_continuous() { rgb } else { rgb.try_clone()? };

        let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
        image::RgbImage::from_raw(width, height, rgb.data_bytes()?.to_vec())
            .ok_or_else(|| anyhow!("frame buffer size mismatch"))
    }

    /// Convert an `image::RgbImage` into a BGR Mat.
    pub fn rgb_to_mat(image: &image::RgbImage) -> Result<Mat> {
        let (width, height) = (image.width() as i32, image.height() as i32);
        let mut rgb =
            Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, Scalar::all(0.0))?;
        rgb.data_bytes_mut()?.copy_from_slice(image.as_raw());

        let mut bgr = Mat::default();
        imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR)
            .context("RGB to BGR conversion failed")?;
        Ok(bgr)
    }

    /// Mask excluding the pure-green chroma key (BGR 0,255,0) used for
    /// notch/placeholder regions in templates. `None` for non-color images.
    pub fn chroma_mask(image: &Mat) -> Result<Option<Mat>> {
        if image.channels() < 3 {
            return Ok(None);
        }

        let mut keyed = Mat::default();
        core::in_range(
            image,
            &Scalar::new(0.0, 250.0, 0.0, 0.0),
            &Scalar::new(10.0, 255.0, 10.0, 0.0),
            &mut keyed,
        )?;

        let mut mask = Mat::default();
        core::bitwise_not(&keyed, &mut mask, &core::no_array())?;
        Ok(Some(mask))
    }

    /// Copy of `frame` with the given boxes drawn in red.
    pub fn draw_boxes(frame: &Mat, boxes: &[Rect]) -> Result<Mat> {
        let mut canvas = frame.try_clone()?;
        for rect in boxes {
            imgproc::rectangle(
                &mut canvas,
                Self::to_cv_rect(*rect),
                Scalar::new(0.0, 0.0, 255.0, 255.0),
                2,
                imgproc::LINE_8,
                0,
            )?;
        }
        Ok(canvas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_mat_conversion_round_trip() {
        let mut rgb = image::RgbImage::new(4, 3);
        for (x, y, pixel) in rgb.enumerate_pixels_mut() {
            *pixel = image::Rgb([(x * 40) as u8, (y * 60) as u8, 200]);
        }

        let mat = ImageUtils::rgb_to_mat(&rgb).unwrap();
        assert_eq!((mat.cols(), mat.rows(), mat.channels()), (4, 3, 3));

        let back = ImageUtils::mat_to_rgb(&mat).unwrap();
        assert_eq!(back, rgb);
    }

    #[test]
    fn test_chroma_mask_excludes_green() {
        let mut template =
            Mat::new_rows_cols_with_default(10, 10, core::CV_8UC3, Scalar::new(0.0, 255.0, 0.0, 0.0))
                .unwrap();
        imgproc::rectangle(
            &mut template,
            core::Rect::new(0, 0, 5, 10),
            Scalar::new(30.0, 30.0, 30.0, 0.0),
            -1,
            imgproc::LINE_8,
            0,
        )
        .unwrap();

        let mask = ImageUtils::chroma_mask(&template).unwrap().unwrap();
        // Half the pixels are chroma green and must be masked out.
        assert_eq!(core::count_non_zero(&mask).unwrap(), 50);
    }

    #[test]
    fn test_draw_boxes_leaves_input_untouched() {
        let frame =
            Mat::new_rows_cols_with_default(20, 20, core::CV_8UC3, Scalar::all(0.0)).unwrap();
        let annotated = ImageUtils::draw_boxes(&frame, &[Rect::new(2, 2, 10, 10)]).unwrap();
        assert!(core::sum_elems(&annotated).unwrap()[2] > 0.0);
        assert_eq!(core::sum_elems(&frame).unwrap()[2], 0.0);
    }
}
