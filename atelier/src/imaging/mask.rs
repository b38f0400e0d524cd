//! Binary mask rasterization.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

/// Renders a `width × height` mask that is 255 inside the clipped region
/// `(left, top, w, h)` and 0 elsewhere.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn rasterize_mask(width: u32, height: u32, region: (u32, u32, u32, u32)) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let (left, top, w, h) = region;
    if w > 0 && h > 0 {
        draw_filled_rect_mut(
            &mut mask,
            Rect::at(left as i32, top as i32).of_size(w, h),
            Luma([255]),
        );
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BoundingBox;

    #[test]
    fn test_mask_matches_clipped_box() {
        let region = BoundingBox::new(2.0, 1.0, 3.0, 10.0).clip(8, 6).unwrap();
        let mask = rasterize_mask(8, 6, region);
        assert_eq!(mask.dimensions(), (8, 6));

        let inside = mask.enumerate_pixels().filter(|(_, _, p)| p.0[0] == 255).count();
        assert_eq!(inside, 3 * 5);
        assert_eq!(mask.get_pixel(2, 1).0[0], 255);
        assert_eq!(mask.get_pixel(4, 5).0[0], 255);
        assert_eq!(mask.get_pixel(5, 1).0[0], 0);
        assert_eq!(mask.get_pixel(2, 0).0[0], 0);
        assert!(mask.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }
}
