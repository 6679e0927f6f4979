//! Point / representative-point adapter (see DESIGN.md OQ-3 for why this
//! works on plain coordinates rather than decoding WKB).
//!
//! Failure-tolerant by design: geometry resolution never aborts a block,
//! it degrades to an `osmm:loc:error` statement.

use geo::{Centroid, LineString};

use crate::model::Geometry;
use crate::statement::Statement;

const LOC: &str = "osmm:loc";
const LOC_ERROR: &str = "osmm:loc:error";
const DECODE_FAILURE: &str = "Unable to parse location data";

/// A node's own point, or an error statement if none was resolved.
pub fn node_point(geometry: Option<&Geometry>) -> Statement {
    match geometry {
        Some(Geometry::Point { lat, lon }) => Statement::point(LOC, *lat, *lon),
        _ => Statement::string(LOC_ERROR, DECODE_FAILURE),
    }
}

/// A way's representative point: its centroid, falling back to the sole
/// coordinate when the way has exactly one resolved node.
pub fn way_representative_point(geometry: Option<&Geometry>) -> Statement {
    match geometry {
        Some(Geometry::Line(coords)) if coords.len() == 1 => {
            let (lat, lon) = coords[0];
            Statement::way_point(LOC, lat, lon)
        }
        Some(Geometry::Line(coords)) if coords.len() >= 2 => {
            let line: LineString<f64> = coords.iter().map(|&(lat, lon)| (lon, lat)).collect();
            match line.centroid() {
                Some(c) => Statement::way_point(LOC, c.y(), c.x()),
                None => Statement::string(LOC_ERROR, DECODE_FAILURE),
            }
        }
        Some(Geometry::Point { lat, lon }) => Statement::way_point(LOC, *lat, *lon),
        _ => Statement::string(LOC_ERROR, DECODE_FAILURE),
    }
}

/// Whether a way's node-ref list begins and ends on the same node.
pub fn is_closed(node_refs: &[i64]) -> bool {
    match (node_refs.first(), node_refs.last()) {
        (Some(a), Some(b)) => node_refs.len() > 1 && a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_point_renders_as_point_literal() {
        let s = node_point(Some(&Geometry::Point {
            lat: 52.5,
            lon: 13.4,
        }));
        assert_eq!(
            s.to_string(),
            r#"osmm:loc "Point(13.4 52.5)"^^geo:wktLiteral"#
        );
    }

    #[test]
    fn missing_node_geometry_becomes_error_statement() {
        let s = node_point(None);
        assert_eq!(s.to_string(), r#"osmm:loc:error "Unable to parse location data""#);
    }

    #[test]
    fn single_node_way_falls_back_to_point() {
        let s = way_representative_point(Some(&Geometry::Line(vec![(52.5, 13.4)])));
        assert_eq!(
            s.to_string(),
            r#"osmm:loc "Point(13.4 52.5)"^^geo:wktLiteral"#
        );
    }

    #[test]
    fn square_way_centroid_is_its_middle() {
        let coords = vec![(0.0, 0.0), (0.0, 2.0), (2.0, 2.0), (2.0, 0.0), (0.0, 0.0)];
        let s = way_representative_point(Some(&Geometry::Line(coords)));
        match s {
            Statement::Way { lat, lon, .. } => {
                assert!((lat - 1.0).abs() < 1e-9);
                assert!((lon - 1.0).abs() < 1e-9);
            }
            other => panic!("expected Way statement, got {other:?}"),
        }
    }

    #[test]
    fn is_closed_detects_matching_endpoints() {
        assert!(is_closed(&[1, 2, 3, 1]));
        assert!(!is_closed(&[1, 2, 3]));
        assert!(!is_closed(&[1]));
    }
}
