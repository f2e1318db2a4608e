//! Named points and polygons that users draw on the map. Not linked to cameras in any way.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::RwLock;

use log::info;

use crate::common::UserId;
use crate::error::{StoreError, ValidationError};
use crate::geometry::{self, Feature, FeatureCollection, Geometry};
use crate::store::{read_yaml_file, write_yaml_file};



pub type LocationId = u64;
type LocationMap = BTreeMap<LocationId, MapLocation>;

pub const UNNAMED_LOCATION: &str = "Unnamed Location";

#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq)]
#[derive(Serialize, Deserialize)]
pub struct MapLocation {
	pub id: LocationId,
	pub owner: UserId,
	pub name: String,
	pub geometry: Geometry,
}

impl MapLocation {
	pub fn to_feature(&self) -> Feature {
		Feature::new(self.geometry.clone(), serde_json::json!({
			"id": self.id,
			"name": self.name,
			"type": self.geometry.kind(),
		}))
	}
}

#[derive(Debug)]
#[derive(Deserialize)]
pub struct SaveGeometry {
	#[serde(default)]
	pub name: Option<String>,
	/// Any GeoJSON geometry, Feature or FeatureCollection.
	pub geometry: serde_json::Value,
}

pub struct LocationStore {
	locations: RwLock<LocationMap>,
	path: Option<PathBuf>,
}

impl LocationStore {
	pub fn in_memory() -> Self {
		LocationStore {
			locations: RwLock::new(LocationMap::new()),
			path: None,
		}
	}

	pub fn open(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let locations: LocationMap = read_yaml_file(&path);
		info!("Loaded {} location(s) from {}", locations.len(), path.display());
		LocationStore {
			locations: RwLock::new(locations),
			path: Some(path),
		}
	}

	/// Stores one location per point or polygon in the request, all under the same name.
	pub async fn save_geometry(&self, owner: UserId, request: SaveGeometry) -> Result<Vec<MapLocation>, SaveError> {
		let geometries = geometry::parse_geojson(request.geometry)?;
		let name = request.name
			.filter(|name| !name.trim().is_empty())
			.unwrap_or_else(|| UNNAMED_LOCATION.to_string());

		let mut locations = self.locations.write().await;
		let mut next = locations.clone();
		let mut next_id = next.keys().next_back().map_or(1, |id| id + 1);
		let mut saved = Vec::with_capacity(geometries.len());
		for geometry in geometries {
			let location = MapLocation {
				id: next_id,
				owner,
				name: name.clone(),
				geometry,
			};
			next_id += 1;
			next.insert(location.id, location.clone());
			saved.push(location);
		}

		if let Some(path) = &self.path {
			write_yaml_file(path, &next).await?;
		}
		*locations = next;
		Ok(saved)
	}

	pub async fn list(&self, owner: UserId) -> Vec<MapLocation> {
		self.locations.read().await.values()
			.filter(|location| location.owner == owner)
			.cloned()
			.collect()
	}

	/// GeoJSON of the owner's locations among `ids`. Ids of other owners are silently skipped.
	pub async fn geojson(&self, owner: UserId, ids: &[LocationId]) -> Result<FeatureCollection, ValidationError> {
		if ids.is_empty() {
			return Err(ValidationError::NoLocationIds);
		}
		let locations = self.locations.read().await;
		let features = ids.iter()
			.filter_map(|id| locations.get(id))
			.filter(|location| location.owner == owner)
			.map(MapLocation::to_feature)
			.collect();
		Ok(FeatureCollection::new(features))
	}
}

#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum SaveError {
	#[error(transparent)]
	Invalid(#[from] ValidationError),
	#[error(transparent)]
	Store(#[from] StoreError),
}



#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn polygon() -> serde_json::Value {
		json!({"type": "Polygon", "coordinates": [[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 0.0]]]})
	}

	#[rocket::async_test]
	async fn each_geometry_becomes_a_location() {
		let store = LocationStore::in_memory();
		let saved = store.save_geometry(1, SaveGeometry {
			name: Some("Depot".to_string()),
			geometry: json!({
				"type": "FeatureCollection",
				"features": [
					{"type": "Feature", "geometry": {"type": "Point", "coordinates": [5.0, 6.0]}},
					{"type": "Feature", "geometry": polygon()},
				]
			}),
		}).await.unwrap();

		assert_eq!(saved.iter().map(|location| location.id).collect::<Vec<_>>(), vec![1, 2]);
		assert!(saved.iter().all(|location| location.name == "Depot"));
		assert_eq!(store.list(1).await.len(), 2);
		assert!(store.list(2).await.is_empty());
	}

	#[rocket::async_test]
	async fn missing_name_falls_back_to_default() {
		let store = LocationStore::in_memory();
		let saved = store.save_geometry(1, SaveGeometry {
			name: None,
			geometry: json!({"type": "Point", "coordinates": [1.0, 1.0]}),
		}).await.unwrap();
		assert_eq!(saved[0].name, UNNAMED_LOCATION);
	}

	#[rocket::async_test]
	async fn invalid_geometry_is_not_stored() {
		let store = LocationStore::in_memory();
		let result = store.save_geometry(1, SaveGeometry {
			name: None,
			geometry: json!({"type": "Point", "coordinates": [500.0, 1.0]}),
		}).await;
		assert!(matches!(result, Err(SaveError::Invalid(ValidationError::InvalidCoordinates(_)))));
		assert!(store.list(1).await.is_empty());
	}

	#[rocket::async_test]
	async fn geojson_requires_ids_and_respects_owner() {
		let store = LocationStore::in_memory();
		store.save_geometry(1, SaveGeometry { name: None, geometry: polygon() }).await.unwrap();
		store.save_geometry(2, SaveGeometry { name: None, geometry: polygon() }).await.unwrap();

		assert!(matches!(store.geojson(1, &[]).await, Err(ValidationError::NoLocationIds)));

		let collection = store.geojson(1, &[1, 2]).await.unwrap();
		assert_eq!(collection.features.len(), 1);
		assert_eq!(collection.features[0].properties["type"], "Polygon");
	}
}
