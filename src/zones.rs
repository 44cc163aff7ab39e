//! Polygonal monitoring zones and intrusion containment tests.
//!
//! Zones are static after configuration load and read-only during pipeline
//! execution. Containment is boundary-inclusive: a point exactly on a zone
//! edge or vertex counts as inside, which avoids flicker at zone edges.
//! The test point for a detection is the bottom-center of its bounding box.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::PipelineError;

/// Tolerance for the on-boundary test, in pixels.
const BOUNDARY_EPS: f32 = 1e-3;

/// One user-defined monitoring zone. The polygon is implicitly closed (last
/// point connects back to the first) and must be simple.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub polygon: Vec<(f32, f32)>,
    pub alert_enabled: bool,
    pub color: [u8; 3],
}

impl Zone {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::ConfigurationInvalid(
                "zone id must not be empty".to_string(),
            )
            .into());
        }
        if self.polygon.len() < 3 {
            return Err(PipelineError::ConfigurationInvalid(format!(
                "zone {}: polygon needs at least 3 points, got {}",
                self.id,
                self.polygon.len()
            ))
            .into());
        }
        for &(x, y) in &self.polygon {
            if !x.is_finite() || !y.is_finite() {
                return Err(PipelineError::ConfigurationInvalid(format!(
                    "zone {}: polygon has a non-finite point",
                    self.id
                ))
                .into());
            }
        }
        if polygon_area(&self.polygon).abs() < BOUNDARY_EPS {
            return Err(PipelineError::ConfigurationInvalid(format!(
                "zone {}: polygon is degenerate (zero area)",
                self.id
            ))
            .into());
        }
        if self_intersects(&self.polygon) {
            return Err(PipelineError::ConfigurationInvalid(format!(
                "zone {}: polygon is self-intersecting",
                self.id
            ))
            .into());
        }
        Ok(())
    }

    pub fn contains(&self, point: (f32, f32)) -> bool {
        point_in_polygon(point, &self.polygon)
    }
}

/// Boundary-inclusive point-in-polygon test (ray casting).
pub fn point_in_polygon(point: (f32, f32), polygon: &[(f32, f32)]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    // Edge and vertex touches classify as inside.
    for i in 0..n {
        if on_segment(point, polygon[i], polygon[(i + 1) % n]) {
            return true;
        }
    }

    let (x, y) = point;
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    let seg_len = ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
    if seg_len < BOUNDARY_EPS {
        return (p.0 - a.0).abs() < BOUNDARY_EPS && (p.1 - a.1).abs() < BOUNDARY_EPS;
    }
    // Perpendicular distance from the segment line.
    if (cross / seg_len).abs() > BOUNDARY_EPS {
        return false;
    }
    p.0 >= a.0.min(b.0) - BOUNDARY_EPS
        && p.0 <= a.0.max(b.0) + BOUNDARY_EPS
        && p.1 >= a.1.min(b.1) - BOUNDARY_EPS
        && p.1 <= a.1.max(b.1) + BOUNDARY_EPS
}

fn polygon_area(polygon: &[(f32, f32)]) -> f32 {
    let n = polygon.len();
    let mut acc = 0.0f32;
    for i in 0..n {
        let (x1, y1) = polygon[i];
        let (x2, y2) = polygon[(i + 1) % n];
        acc += x1 * y2 - x2 * y1;
    }
    acc / 2.0
}

fn orientation(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> f32 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

fn segments_properly_intersect(
    a: (f32, f32),
    b: (f32, f32),
    c: (f32, f32),
    d: (f32, f32),
) -> bool {
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);
    (o1 * o2 < 0.0) && (o3 * o4 < 0.0)
}

/// True when any two non-adjacent edges cross. O(n^2); zone polygons are
/// small and this runs only at configuration load.
fn self_intersects(polygon: &[(f32, f32)]) -> bool {
    let n = polygon.len();
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        for j in (i + 1)..n {
            // Skip edges sharing a vertex with edge i.
            if j == i || (j + 1) % n == i || j == (i + 1) % n {
                continue;
            }
            let c = polygon[j];
            let d = polygon[(j + 1) % n];
            if segments_properly_intersect(a, b, c, d) {
                return true;
            }
        }
    }
    false
}

/// Tests detections against the configured zone set.
///
/// All zones are evaluated, including alert-disabled ones (they still matter
/// for display and recording); the alert controller filters downstream.
pub struct ZoneEvaluator {
    zones: Vec<Zone>,
}

impl ZoneEvaluator {
    pub fn new(zones: Vec<Zone>) -> Result<Self> {
        for zone in &zones {
            zone.validate()?;
        }
        Ok(Self { zones })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Map each zone to the detections whose bottom-center falls inside it.
    /// A detection may match multiple zones; each match reports independently.
    pub fn evaluate(&self, detections: &[Detection]) -> BTreeMap<String, Vec<Detection>> {
        let mut matches: BTreeMap<String, Vec<Detection>> = BTreeMap::new();
        for detection in detections {
            let point = detection.bbox.bottom_center();
            for zone in &self.zones {
                if zone.contains(point) {
                    matches
                        .entry(zone.id.clone())
                        .or_default()
                        .push(detection.clone());
                }
            }
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn square_zone(id: &str, origin: (f32, f32), side: f32) -> Zone {
        let (x, y) = origin;
        Zone {
            id: id.to_string(),
            name: id.to_string(),
            polygon: vec![(x, y), (x + side, y), (x + side, y + side), (x, y + side)],
            alert_enabled: true,
            color: [255, 0, 0],
        }
    }

    fn detection_at(bottom_center: (f32, f32)) -> Detection {
        let (cx, by) = bottom_center;
        Detection {
            class_id: 0,
            confidence: 0.9,
            bbox: BoundingBox {
                x_min: cx - 10.0,
                y_min: by - 40.0,
                x_max: cx + 10.0,
                y_max: by,
            },
            frame_ref: 1,
        }
    }

    #[test]
    fn square_center_matches_far_point_does_not() {
        let evaluator = ZoneEvaluator::new(vec![square_zone("gate", (0.0, 0.0), 100.0)]).unwrap();

        let hit = evaluator.evaluate(&[detection_at((50.0, 50.0))]);
        assert_eq!(hit.get("gate").map(Vec::len), Some(1));

        let miss = evaluator.evaluate(&[detection_at((1050.0, 50.0))]);
        assert!(miss.is_empty());
    }

    #[test]
    fn boundary_point_is_inside() {
        let zone = square_zone("z", (0.0, 0.0), 100.0);
        assert!(zone.contains((0.0, 50.0)), "edge point");
        assert!(zone.contains((100.0, 100.0)), "vertex point");
        assert!(zone.contains((50.0, 0.0)), "top edge point");
        assert!(!zone.contains((100.01, 50.0)));
    }

    #[test]
    fn evaluate_is_monotone_in_detections() {
        let evaluator = ZoneEvaluator::new(vec![square_zone("z", (0.0, 0.0), 100.0)]).unwrap();
        let inside = detection_at((50.0, 50.0));
        let outside = detection_at((500.0, 500.0));

        let base = evaluator.evaluate(&[inside.clone()]);
        let extended = evaluator.evaluate(&[inside, outside]);

        for zone_id in base.keys() {
            assert!(
                extended.contains_key(zone_id),
                "adding detections must never remove a matched zone"
            );
        }
    }

    #[test]
    fn detection_can_match_multiple_zones() {
        let evaluator = ZoneEvaluator::new(vec![
            square_zone("a", (0.0, 0.0), 100.0),
            square_zone("b", (50.0, 0.0), 100.0),
        ])
        .unwrap();

        let matches = evaluator.evaluate(&[detection_at((75.0, 50.0))]);
        assert_eq!(matches.len(), 2);
        assert!(matches.contains_key("a"));
        assert!(matches.contains_key("b"));
    }

    #[test]
    fn alert_disabled_zones_are_still_evaluated() {
        let mut zone = square_zone("quiet", (0.0, 0.0), 100.0);
        zone.alert_enabled = false;
        let evaluator = ZoneEvaluator::new(vec![zone]).unwrap();
        let matches = evaluator.evaluate(&[detection_at((50.0, 50.0))]);
        assert!(matches.contains_key("quiet"));
    }

    #[test]
    fn degenerate_polygon_rejected() {
        let zone = Zone {
            id: "bad".to_string(),
            name: "bad".to_string(),
            polygon: vec![(0.0, 0.0), (10.0, 0.0)],
            alert_enabled: true,
            color: [0, 0, 0],
        };
        assert!(zone.validate().is_err());

        let collinear = Zone {
            polygon: vec![(0.0, 0.0), (10.0, 0.0), (20.0, 0.0)],
            ..zone
        };
        assert!(collinear.validate().is_err());
    }

    #[test]
    fn self_intersecting_polygon_rejected() {
        let bowtie = Zone {
            id: "bowtie".to_string(),
            name: "bowtie".to_string(),
            polygon: vec![(0.0, 0.0), (100.0, 100.0), (100.0, 0.0), (0.0, 100.0)],
            alert_enabled: true,
            color: [0, 0, 0],
        };
        assert!(bowtie.validate().is_err());
    }

    #[test]
    fn concave_polygon_containment() {
        // L-shape: the notch at the top right is outside.
        let zone = Zone {
            id: "l".to_string(),
            name: "l".to_string(),
            polygon: vec![
                (0.0, 0.0),
                (100.0, 0.0),
                (100.0, 50.0),
                (50.0, 50.0),
                (50.0, 100.0),
                (0.0, 100.0),
            ],
            alert_enabled: true,
            color: [0, 0, 0],
        };
        assert!(zone.contains((25.0, 75.0)));
        assert!(!zone.contains((75.0, 75.0)));
    }
}
