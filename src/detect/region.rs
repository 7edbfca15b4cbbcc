use imageproc::point::Point;
use serde::{Deserialize, Serialize};

/// Pixel-space bounding box, `(x, y)` is the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Smallest upright box containing every point (inclusive pixel extents).
    pub fn enclosing(points: &[Point<i32>]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    /// Move a box found inside a region of interest into full-frame coordinates.
    pub fn rebase(&self, roi: RoiOffset) -> Self {
        Self::new(self.x + roi.x as i32, self.y + roi.y as i32, self.width, self.height)
    }

    /// Inverse of `rebase`: full-frame coordinates back to detector space.
    pub fn to_detector_space(&self, roi: RoiOffset) -> Self {
        Self::new(self.x - roi.x as i32, self.y - roi.y as i32, self.width, self.height)
    }

    /// `[x, y, w, h]`, the shape used by the clips API.
    pub fn to_array(&self) -> [i32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// Origin of the region of interest the detector runs on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiOffset {
    pub x: u32,
    pub y: u32,
}

impl RoiOffset {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub fn is_identity(&self) -> bool {
        self.x == 0 && self.y == 0
    }
}

/// How a region's size is measured when judging significance.
///
/// The two measures are not interchangeable: bounding boxes of irregular blobs
/// are larger than the blobs, so `BoundingBox` makes detection more sensitive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaMode {
    /// Area enclosed by the contour polygon.
    #[default]
    Contour,
    /// Width times height of the bounding box.
    BoundingBox,
}

/// A candidate motion area.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub bbox: BoundingBox,
    /// Outer border of the blob, in detector space.
    pub contour: Vec<Point<i32>>,
    /// Polygon area enclosed by `contour`, in pixels.
    pub contour_area: f64,
    /// Measured area as a percentage of the processed frame. Set by `RegionFilter`.
    pub relative_area: f64,
}

impl Region {
    pub fn from_contour(contour: Vec<Point<i32>>) -> Option<Self> {
        let bbox = BoundingBox::enclosing(&contour)?;
        let contour_area = enclosed_area(&contour);
        Some(Self {
            bbox,
            contour,
            contour_area,
            relative_area: 0.0,
        })
    }

    pub fn area(&self, mode: AreaMode) -> f64 {
        match mode {
            AreaMode::Contour => self.contour_area,
            AreaMode::BoundingBox => self.bbox.area(),
        }
    }

    pub fn rebase(mut self, roi: RoiOffset) -> Self {
        if roi.is_identity() {
            return self;
        }
        self.bbox = self.bbox.rebase(roi);
        for p in &mut self.contour {
            p.x += roi.x as i32;
            p.y += roi.y as i32;
        }
        self
    }
}

/// Shoelace area of a closed polygon. Points trace pixel centres, so a filled
/// `n x n` square has area `(n - 1)^2`.
pub(crate) fn enclosed_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area: i64 = 0;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice_area.abs() as f64 / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: i32, y: i32, side: i32) -> Vec<Point<i32>> {
        vec![
            Point::new(x, y),
            Point::new(x + side - 1, y),
            Point::new(x + side - 1, y + side - 1),
            Point::new(x, y + side - 1),
        ]
    }

    #[test]
    fn bounding_box_is_inclusive() {
        let bbox = BoundingBox::enclosing(&square(3, 4, 10)).unwrap();
        assert_eq!(bbox, BoundingBox::new(3, 4, 10, 10));
        assert!(BoundingBox::enclosing(&[]).is_none());
    }

    #[test]
    fn contour_area_differs_from_box_area() {
        let region = Region::from_contour(square(0, 0, 11)).unwrap();
        assert_eq!(region.area(AreaMode::Contour), 100.0);
        assert_eq!(region.area(AreaMode::BoundingBox), 121.0);
    }

    #[test]
    fn identity_roi_round_trips_exactly() {
        let bbox = BoundingBox::new(17, 42, 30, 12);
        let roi = RoiOffset::default();
        assert_eq!(bbox.rebase(roi).to_detector_space(roi), bbox);
        assert_eq!(bbox.rebase(roi), bbox);
    }

    #[test]
    fn roi_offset_moves_box_and_contour() {
        let region = Region::from_contour(square(0, 0, 4)).unwrap();
        let moved = region.rebase(RoiOffset::new(5, 7));
        assert_eq!(moved.bbox, BoundingBox::new(5, 7, 4, 4));
        assert_eq!(moved.contour[0], Point::new(5, 7));
        assert_eq!(
            moved.bbox.to_detector_space(RoiOffset::new(5, 7)),
            BoundingBox::new(0, 0, 4, 4)
        );
    }

    #[test]
    fn degenerate_contours_have_no_area() {
        assert_eq!(enclosed_area(&[Point::new(1, 1)]), 0.0);
        assert_eq!(enclosed_area(&[Point::new(1, 1), Point::new(4, 1)]), 0.0);
    }
}
