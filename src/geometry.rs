//! GeoJSON geometries as stored on cameras and locations.
//!
//! Only points and polygons are kept; geometry is passed through without any GIS math
//! beyond checking that coordinates are in range.

use crate::error::ValidationError;



/// `[longitude, latitude]`, WGS84.
pub type Position = [f64; 2];

#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq)]
#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
	Point { coordinates: Position },
	Polygon { coordinates: Vec<Vec<Position>> },
}

impl Geometry {
	pub fn point(longitude: f64, latitude: f64) -> Self {
		Geometry::Point { coordinates: [longitude, latitude] }
	}

	pub fn kind(&self) -> &'static str {
		match self {
			Geometry::Point { .. } => "Point",
			Geometry::Polygon { .. } => "Polygon",
		}
	}

	pub fn validate(&self) -> Result<(), ValidationError> {
		match self {
			Geometry::Point { coordinates } => validate_position(coordinates),
			Geometry::Polygon { coordinates } => {
				if coordinates.is_empty() {
					return Err(ValidationError::InvalidGeometry("polygon has no rings".to_string()));
				}
				for ring in coordinates {
					if ring.len() < 4 {
						return Err(ValidationError::InvalidGeometry(
							format!("polygon ring needs at least 4 positions, got {}", ring.len())
						));
					}
					if ring.first() != ring.last() {
						return Err(ValidationError::InvalidGeometry("polygon ring is not closed".to_string()));
					}
					for position in ring {
						validate_position(position)?;
					}
				}
				Ok(())
			}
		}
	}
}

fn validate_position(position: &Position) -> Result<(), ValidationError> {
	let [longitude, latitude] = *position;
	if !longitude.is_finite() || !latitude.is_finite() {
		return Err(ValidationError::InvalidCoordinates(format!("{longitude}, {latitude}")));
	}
	if !(-180.0..=180.0).contains(&longitude) || !(-90.0..=90.0).contains(&latitude) {
		return Err(ValidationError::InvalidCoordinates(format!("{longitude}, {latitude}")));
	}
	Ok(())
}

/// Cameras sit at a single point.
pub fn validate_camera_location(location: &Geometry) -> Result<(), ValidationError> {
	match location {
		Geometry::Point { .. } => location.validate(),
		other => Err(ValidationError::InvalidGeometry(
			format!("camera location must be a Point, got {}", other.kind())
		)),
	}
}



#[derive(Deserialize)]
#[serde(tag = "type")]
enum GeoJsonInput {
	Point { coordinates: Position },
	Polygon { coordinates: Vec<Vec<Position>> },
	Feature { geometry: Option<Geometry> },
	FeatureCollection { features: Vec<FeatureInput> },
}

#[derive(Deserialize)]
struct FeatureInput {
	geometry: Option<Geometry>,
}

/// Unpacks a bare geometry, a Feature or a FeatureCollection into its point and polygon geometries.
pub fn parse_geojson(value: serde_json::Value) -> Result<Vec<Geometry>, ValidationError> {
	let input: GeoJsonInput = serde_json::from_value(value)
		.map_err(|err| ValidationError::InvalidGeometry(err.to_string()))?;

	let geometries: Vec<Geometry> = match input {
		GeoJsonInput::Point { coordinates } => vec![Geometry::Point { coordinates }],
		GeoJsonInput::Polygon { coordinates } => vec![Geometry::Polygon { coordinates }],
		GeoJsonInput::Feature { geometry } => geometry.into_iter().collect(),
		GeoJsonInput::FeatureCollection { features } => {
			features.into_iter().filter_map(|feature| feature.geometry).collect()
		}
	};

	if geometries.is_empty() {
		return Err(ValidationError::InvalidGeometry("no geometry found".to_string()));
	}
	for geometry in &geometries {
		geometry.validate()?;
	}
	Ok(geometries)
}



#[derive(Debug)]
#[derive(Serialize)]
pub struct Feature {
	#[serde(rename = "type")]
	kind: &'static str,
	pub geometry: Geometry,
	pub properties: serde_json::Value,
}

impl Feature {
	pub fn new(geometry: Geometry, properties: serde_json::Value) -> Self {
		Feature { kind: "Feature", geometry, properties }
	}
}

#[derive(Debug)]
#[derive(Serialize)]
pub struct FeatureCollection {
	#[serde(rename = "type")]
	kind: &'static str,
	pub features: Vec<Feature>,
}

impl FeatureCollection {
	pub fn new(features: Vec<Feature>) -> Self {
		FeatureCollection { kind: "FeatureCollection", features }
	}
}



#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn square() -> Vec<Vec<Position>> {
		vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
	}

	#[test]
	fn point_serializes_as_geojson() {
		let value = serde_json::to_value(Geometry::point(10.5, 45.25)).unwrap();
		assert_eq!(value, json!({"type": "Point", "coordinates": [10.5, 45.25]}));
	}

	#[test]
	fn out_of_range_coordinates_are_rejected() {
		assert!(Geometry::point(181.0, 0.0).validate().is_err());
		assert!(Geometry::point(0.0, -90.5).validate().is_err());
		assert!(Geometry::point(f64::NAN, 0.0).validate().is_err());
		assert!(Geometry::point(-180.0, 90.0).validate().is_ok());
	}

	#[test]
	fn polygon_rings_must_be_closed() {
		let mut open = square();
		open[0].pop();
		open[0].push([0.5, 0.5]);
		assert!(Geometry::Polygon { coordinates: open }.validate().is_err());
		assert!(Geometry::Polygon { coordinates: square() }.validate().is_ok());
	}

	#[test]
	fn camera_location_must_be_a_point() {
		let polygon = Geometry::Polygon { coordinates: square() };
		assert!(matches!(validate_camera_location(&polygon), Err(ValidationError::InvalidGeometry(_))));
		assert!(validate_camera_location(&Geometry::point(1.0, 2.0)).is_ok());
	}

	#[test]
	fn feature_collections_are_unpacked() {
		let geometries = parse_geojson(json!({
			"type": "FeatureCollection",
			"features": [
				{"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [3.0, 4.0]}},
				{"type": "Feature", "properties": {}, "geometry": {"type": "Polygon", "coordinates": square()}},
			]
		})).unwrap();

		assert_eq!(geometries.len(), 2);
		assert_eq!(geometries[0], Geometry::point(3.0, 4.0));
		assert_eq!(geometries[1].kind(), "Polygon");
	}

	#[test]
	fn unsupported_geometry_types_are_rejected() {
		let result = parse_geojson(json!({"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]}));
		assert!(matches!(result, Err(ValidationError::InvalidGeometry(_))));
	}
}
