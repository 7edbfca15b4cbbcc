use super::region::{AreaMode, Region};

/// Drops regions too small to count as motion.
#[derive(Clone, Copy, Debug)]
pub struct RegionFilter {
    /// Lower bound as a fraction of frame area (0.01 = 1%). Inclusive.
    pub min_relative_area: f64,
    pub area_mode: AreaMode,
}

impl RegionFilter {
    pub fn new(min_relative_area: f64, area_mode: AreaMode) -> Self {
        Self {
            min_relative_area,
            area_mode,
        }
    }

    /// Keep regions whose measured area is at least `min_relative_area` of
    /// `frame_area`, in input order. Retained regions carry their relative
    /// area as a percentage.
    pub fn filter(&self, regions: Vec<Region>, frame_area: u64) -> Vec<Region> {
        if frame_area == 0 {
            return Vec::new();
        }
        let frame_area = frame_area as f64;
        regions
            .into_iter()
            .filter_map(|mut region| {
                let relative = region.area(self.area_mode) / frame_area;
                if relative < self.min_relative_area {
                    return None;
                }
                region.relative_area = relative * 100.0;
                Some(region)
            })
            .collect()
    }
}

impl Default for RegionFilter {
    fn default() -> Self {
        Self::new(0.01, AreaMode::Contour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::region::BoundingBox;

    fn region_with_area(area: f64, bbox: BoundingBox) -> Region {
        Region {
            bbox,
            contour: Vec::new(),
            contour_area: area,
            relative_area: 0.0,
        }
    }

    #[test]
    fn area_equal_to_threshold_is_kept() {
        let filter = RegionFilter::new(0.01, AreaMode::Contour);
        let bbox = BoundingBox::new(0, 0, 20, 20);
        let kept = filter.filter(vec![region_with_area(100.0, bbox)], 10_000);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].relative_area - 1.0).abs() < 1e-9);

        let dropped = filter.filter(vec![region_with_area(99.0, bbox)], 10_000);
        assert!(dropped.is_empty());
    }

    #[test]
    fn bounding_box_mode_measures_the_box() {
        let filter = RegionFilter::new(0.01, AreaMode::BoundingBox);
        // Thin diagonal blob: tiny contour area, large box.
        let kept = filter.filter(
            vec![region_with_area(2.0, BoundingBox::new(0, 0, 10, 10))],
            10_000,
        );
        assert_eq!(kept.len(), 1);

        let contour_filter = RegionFilter::new(0.01, AreaMode::Contour);
        let dropped = contour_filter.filter(
            vec![region_with_area(2.0, BoundingBox::new(0, 0, 10, 10))],
            10_000,
        );
        assert!(dropped.is_empty());
    }

    #[test]
    fn preserves_input_order() {
        let filter = RegionFilter::new(0.01, AreaMode::Contour);
        let regions = vec![
            region_with_area(500.0, BoundingBox::new(1, 0, 1, 1)),
            region_with_area(5.0, BoundingBox::new(2, 0, 1, 1)),
            region_with_area(300.0, BoundingBox::new(3, 0, 1, 1)),
        ];
        let kept = filter.filter(regions, 10_000);
        let xs: Vec<i32> = kept.iter().map(|r| r.bbox.x).collect();
        assert_eq!(xs, vec![1, 3]);
    }

    #[test]
    fn empty_frame_keeps_nothing() {
        let filter = RegionFilter::default();
        let kept = filter.filter(
            vec![region_with_area(500.0, BoundingBox::new(0, 0, 1, 1))],
            0,
        );
        assert!(kept.is_empty());
    }
}
