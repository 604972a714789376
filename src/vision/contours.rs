//! Edge contours
//!
//! Canny edges followed by border following; used to estimate how much
//! structure (an open mouth) a face region holds.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::edges::canny;
use imageproc::point::Point;

/// Canny hysteresis thresholds
pub const CANNY_LOW: f32 = 50.0;
pub const CANNY_HIGH: f32 = 150.0;

/// Area enclosed by a closed polygon (shoelace formula)
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let mut twice_area = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice_area as f64).abs() / 2.0
}

/// Outermost borders of the non-zero regions in a binary image
pub fn external_contours(binary: &GrayImage) -> Vec<Contour<i32>> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .collect()
}

/// Area of the largest external contour, `None` when there is none
pub fn largest_contour_area(binary: &GrayImage) -> Option<f64> {
    external_contours(binary)
        .iter()
        .map(|c| polygon_area(&c.points))
        .fold(None, |best, area| match best {
            Some(b) if b >= area => Some(b),
            _ => Some(area),
        })
}

/// Largest contour area of the Canny edge map of `region`
pub fn edge_contour_area(region: &GrayImage) -> Option<f64> {
    let edges = canny(region, CANNY_LOW, CANNY_HIGH);
    largest_contour_area(&edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn outline(size: u32, x0: u32, y0: u32, side: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let inside = x >= x0 && x < x0 + side && y >= y0 && y < y0 + side;
            let border = x == x0 || x == x0 + side - 1 || y == y0 || y == y0 + side - 1;
            if inside && border {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_polygon_area() {
        let square = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert!((polygon_area(&square) - 100.0).abs() < 1e-9);
        assert_eq!(polygon_area(&square[..2]), 0.0);
    }

    #[test]
    fn test_largest_contour_of_outline() {
        let image = outline(40, 10, 10, 20);
        let area = largest_contour_area(&image).unwrap();
        assert!(area > 100.0, "area {}", area);
    }

    #[test]
    fn test_empty_image_has_no_contours() {
        let image = GrayImage::new(20, 20);
        assert_eq!(largest_contour_area(&image), None);
        assert_eq!(edge_contour_area(&image), None);
    }

    #[test]
    fn test_edges_of_filled_block() {
        let image = GrayImage::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        assert!(edge_contour_area(&image).unwrap() > 100.0);
    }
}
