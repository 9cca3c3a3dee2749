// Debug overlay module
// Draws the smoothed centerline and detected corners over the source track map

use std::path::Path;

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use tracing::info;
use trackmap_common::{Contour, Corner, CornerDirection, PixelPoint};

use crate::error::Result;

const LINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LEFT_CORNER_COLOR: Rgb<u8> = Rgb([0, 160, 255]);
const RIGHT_CORNER_COLOR: Rgb<u8> = Rgb([255, 160, 0]);

/// Half-width of the centerline stroke in pixels (3 px total)
const STROKE_RADIUS: i32 = 1;

/// Render the overlay
///
/// `corners` index into `path`, which is the pixel-space curve the
/// centerline was built from.
pub fn render_overlay(image: &DynamicImage, path: &Contour, corners: &[Corner]) -> RgbImage {
    let mut img = image.to_rgb8();
    let points = &path.points;

    let segments = points.windows(2).map(|w| (w[0], w[1]));
    let closing = match (points.first(), points.last()) {
        (Some(&first), Some(&last)) if path.closed && points.len() > 2 => Some((last, first)),
        _ => None,
    };
    for (a, b) in segments.chain(closing) {
        draw_thick_segment(&mut img, a, b);
    }

    for corner in corners {
        let Some(apex) = points.get(corner.apex_index) else {
            continue;
        };
        let color = match corner.direction {
            CornerDirection::Left => LEFT_CORNER_COLOR,
            CornerDirection::Right => RIGHT_CORNER_COLOR,
        };
        let x = apex.x.round() as i32;
        let y = apex.y.round() as i32;

        // Crosshair with a filled dot at the apex
        let cross_size = 8;
        draw_line_segment_mut(
            &mut img,
            ((x - cross_size) as f32, y as f32),
            ((x + cross_size) as f32, y as f32),
            color,
        );
        draw_line_segment_mut(
            &mut img,
            (x as f32, (y - cross_size) as f32),
            (x as f32, (y + cross_size) as f32),
            color,
        );
        draw_filled_circle_mut(&mut img, (x, y), 4, color);
    }

    img
}

fn draw_thick_segment(img: &mut RgbImage, a: PixelPoint, b: PixelPoint) {
    for dy in -STROKE_RADIUS..=STROKE_RADIUS {
        for dx in -STROKE_RADIUS..=STROKE_RADIUS {
            let (ox, oy) = (dx as f32, dy as f32);
            draw_line_segment_mut(
                img,
                (a.x as f32 + ox, a.y as f32 + oy),
                (b.x as f32 + ox, b.y as f32 + oy),
                LINE_COLOR,
            );
        }
    }
}

pub fn save_overlay(image: &DynamicImage, path: &Contour, corners: &[Corner], output_path: &Path) -> Result<()> {
    let overlay = render_overlay(image, path, corners);
    overlay.save(output_path)?;
    info!("Saved debug overlay to {}", output_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(60, 60, Rgb([255, 255, 255])))
    }

    fn square() -> Contour {
        Contour::closed(vec![
            PixelPoint::new(10.0, 10.0),
            PixelPoint::new(50.0, 10.0),
            PixelPoint::new(50.0, 50.0),
            PixelPoint::new(10.0, 50.0),
        ])
    }

    #[test]
    fn centerline_is_drawn_thick_and_closed() {
        let img = render_overlay(&blank(), &square(), &[]);
        assert_eq!(*img.get_pixel(30, 10), LINE_COLOR);
        assert_eq!(*img.get_pixel(30, 11), LINE_COLOR);
        assert_eq!(*img.get_pixel(30, 9), LINE_COLOR);
        // Closing edge from (10, 50) back to (10, 10)
        assert_eq!(*img.get_pixel(10, 30), LINE_COLOR);
        assert_eq!(*img.get_pixel(30, 30), Rgb([255, 255, 255]));
    }

    #[test]
    fn corner_apex_is_marked() {
        let corner = Corner {
            apex_index: 2,
            start_index: 1,
            end_index: 3,
            apex_dist: 80.0,
            start_dist: 40.0,
            end_dist: 120.0,
            angle_rad: -1.2,
            direction: CornerDirection::Right,
        };
        let img = render_overlay(&blank(), &square(), &[corner]);
        assert_eq!(*img.get_pixel(50, 50), RIGHT_CORNER_COLOR);
        assert_eq!(*img.get_pixel(56, 50), RIGHT_CORNER_COLOR);
    }

    #[test]
    fn out_of_range_apex_is_ignored() {
        let corner = Corner {
            apex_index: 99,
            start_index: 98,
            end_index: 99,
            apex_dist: 0.0,
            start_dist: 0.0,
            end_dist: 0.0,
            angle_rad: 0.5,
            direction: CornerDirection::Left,
        };
        let img = render_overlay(&blank(), &square(), &[corner]);
        assert_eq!(img.dimensions(), (60, 60));
    }
}
