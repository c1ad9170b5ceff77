use std::path::Path;

use geojson::{Feature, GeoJson, Value};
use log::{info, warn};

use super::{Route, Stop};
use crate::SimulatorError;
use crate::geo::Coordinate;

const STOP_NAME_PROPERTY: &str = "Stop Name";
const STOP_CODE_PROPERTY: &str = "Stop Code";

pub fn load_route_geojson(path: &Path) -> Result<(Route, Vec<Stop>), SimulatorError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SimulatorError::RouteLoaderError { source: e })?;
    let (route, stops) = parse_route_geojson(&raw)?;
    info!(
        "Loaded {:?}: {} route points ({:.0} m), {} stops",
        path,
        route.points().len(),
        route.total_length_m(),
        stops.len()
    );
    Ok((route, stops))
}

/// Reads the first `LineString` feature as the route and every `Point` feature as a stop,
/// in file order. GeoJSON positions are `[lon, lat]`.
pub fn parse_route_geojson(raw: &str) -> Result<(Route, Vec<Stop>), SimulatorError> {
    let geojson: GeoJson = raw
        .parse()
        .map_err(|e: geojson::Error| SimulatorError::RouteParseError {
            reason: e.to_string(),
        })?;
    let features = match geojson {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => {
            return Err(SimulatorError::RouteParseError {
                reason: "expected a Feature or FeatureCollection".to_string(),
            });
        }
    };

    let mut route_points = None;
    let mut stops = Vec::new();
    for feature in &features {
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        match &geometry.value {
            Value::LineString(positions) if route_points.is_none() => {
                route_points = Some(
                    positions
                        .iter()
                        .map(|p| position_to_coordinate(p))
                        .collect::<Result<Vec<_>, _>>()?,
                );
            }
            Value::Point(position) => {
                let sequence_index = stops.len() + 1;
                stops.push(Stop {
                    coordinate: position_to_coordinate(position)?,
                    name: string_property(feature, STOP_NAME_PROPERTY)
                        .unwrap_or_else(|| format!("Stop {}", sequence_index)),
                    code: string_property(feature, STOP_CODE_PROPERTY),
                    sequence_index,
                });
            }
            _ => {}
        }
    }

    let points = route_points.ok_or_else(|| SimulatorError::InvalidRoute {
        reason: "no LineString feature found".to_string(),
    })?;
    if stops.is_empty() {
        warn!("Route has no stop features, ETA tracking will have nothing to match");
    }
    Ok((Route::new(points)?, stops))
}

fn position_to_coordinate(position: &[f64]) -> Result<Coordinate, SimulatorError> {
    match position {
        [lon, lat, ..] => Coordinate::new(*lat, *lon),
        _ => Err(SimulatorError::RouteParseError {
            reason: format!("position needs at least 2 values, got {}", position.len()),
        }),
    }
}

fn string_property(feature: &Feature, name: &str) -> Option<String> {
    match feature.property(name)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ROUTE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {},
             "geometry": {"type": "LineString", "coordinates": [[88.31397, 22.5666], [88.32, 22.57], [88.33, 22.58]]}},
            {"type": "Feature", "properties": {"Stop Name": "Howrah", "Stop Code": "HWH", "Stop Type": "Terminal"},
             "geometry": {"type": "Point", "coordinates": [88.31397, 22.5666]}},
            {"type": "Feature", "properties": {"Stop Name": "Esplanade", "Stop Code": 42},
             "geometry": {"type": "Point", "coordinates": [88.33, 22.58]}}
        ]
    }"#;

    #[test]
    fn test_parse_route_and_stops() {
        let (route, stops) = parse_route_geojson(ROUTE).unwrap();
        assert_eq!(route.points().len(), 3);
        let howrah = Coordinate {
            lat: 22.5666,
            lon: 88.31397,
        };
        assert_eq!(route.points()[0], howrah);

        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].name, "Howrah");
        assert_eq!(stops[0].code.as_deref(), Some("HWH"));
        assert_eq!(stops[0].sequence_index, 1);
        assert_eq!(stops[0].stop_key(), "22.5666-88.31397");
        assert_eq!(stops[1].code.as_deref(), Some("42"));
        assert_eq!(stops[1].sequence_index, 2);
    }

    #[test]
    fn test_missing_line_string_is_invalid_route() {
        let raw = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"Stop Name": "A"},
             "geometry": {"type": "Point", "coordinates": [88.3, 22.5]}}
        ]}"#;
        assert!(matches!(
            parse_route_geojson(raw),
            Err(SimulatorError::InvalidRoute { .. })
        ));
    }

    #[test]
    fn test_single_point_line_string_is_invalid_route() {
        let raw = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {},
             "geometry": {"type": "LineString", "coordinates": [[88.3, 22.5]]}}
        ]}"#;
        assert!(matches!(
            parse_route_geojson(raw),
            Err(SimulatorError::InvalidRoute { .. })
        ));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(
            parse_route_geojson("not json"),
            Err(SimulatorError::RouteParseError { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", ROUTE).unwrap();
        file.flush().unwrap();

        let (route, stops) = load_route_geojson(file.path()).unwrap();
        assert_eq!(route.segment_count(), 2);
        assert_eq!(stops.len(), 2);
    }
}
