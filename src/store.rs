use std::cmp;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use log::{info, warn, error};

use crate::common::{Camera, CameraId, CameraList, CameraMap, NewCamera, UserId};
use crate::error::StoreError;



/// Persistence collaborator for camera records.
///
/// Each call is applied as a whole; concurrent writers to the same record follow last-write-wins.
#[rocket::async_trait]
pub trait CameraStore: Send + Sync {
	/// Assigns a fresh id and stores the camera.
	async fn insert(&self, owner: UserId, new: NewCamera) -> Result<Camera, StoreError>;

	async fn get(&self, id: CameraId) -> Result<Option<Camera>, StoreError>;

	/// Replaces a stored record. Fails with [`StoreError::NotFound`] if it was removed meanwhile.
	async fn save(&self, camera: &Camera) -> Result<(), StoreError>;

	async fn remove(&self, id: CameraId) -> Result<Option<Camera>, StoreError>;

	/// Cameras of one owner, optionally restricted by the active flag, ordered by name.
	async fn list(&self, owner: UserId, active: Option<bool>) -> Result<CameraList, StoreError>;

	async fn all(&self) -> Result<CameraList, StoreError>;
}

/// What the camera file holds. `last_id` survives deletions so ids are never handed out twice.
#[derive(Clone)]
#[derive(Debug)]
#[derive(Default)]
#[derive(Serialize, Deserialize)]
struct CameraFile {
	#[serde(default)]
	last_id: CameraId,
	#[serde(default)]
	cameras: CameraMap,
}

/// Keeps cameras in memory and, when given a path, mirrors every change to a YAML file.
pub struct FileCameraStore {
	// tokio's RwLock so readers don't block each other and a waiting writer isn't starved.
	state: RwLock<CameraFile>,
	path: Option<PathBuf>,
}

impl FileCameraStore {
	pub fn in_memory() -> Self {
		FileCameraStore {
			state: RwLock::new(CameraFile::default()),
			path: None,
		}
	}

	pub fn open(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let state: CameraFile = read_yaml_file(&path);
		info!("Loaded {} camera(s) from {}", state.cameras.len(), path.display());
		FileCameraStore {
			state: RwLock::new(state),
			path: Some(path),
		}
	}

	async fn commit(&self, state: &mut CameraFile, next: CameraFile) -> Result<(), StoreError> {
		if let Some(path) = &self.path {
			write_yaml_file(path, &next).await?;
		}
		*state = next;
		Ok(())
	}
}

#[rocket::async_trait]
impl CameraStore for FileCameraStore {
	async fn insert(&self, owner: UserId, new: NewCamera) -> Result<Camera, StoreError> {
		let mut state = self.state.write().await;
		ensure_unique_source(&state.cameras, &new.source_url, None)?;

		let camera = Camera::from_new(next_camera_id(&state), owner, new);
		let mut next = state.clone();
		next.last_id = camera.id;
		next.cameras.insert(camera.id, camera.clone());
		self.commit(&mut state, next).await?;
		Ok(camera)
	}

	async fn get(&self, id: CameraId) -> Result<Option<Camera>, StoreError> {
		Ok(self.state.read().await.cameras.get(&id).cloned())
	}

	async fn save(&self, camera: &Camera) -> Result<(), StoreError> {
		let mut state = self.state.write().await;
		if !state.cameras.contains_key(&camera.id) {
			return Err(StoreError::NotFound(camera.id));
		}
		ensure_unique_source(&state.cameras, &camera.source_url, Some(camera.id))?;

		let mut next = state.clone();
		next.cameras.insert(camera.id, camera.clone());
		self.commit(&mut state, next).await
	}

	async fn remove(&self, id: CameraId) -> Result<Option<Camera>, StoreError> {
		let mut state = self.state.write().await;
		let mut next = state.clone();
		let removed = next.cameras.remove(&id);
		if removed.is_some() {
			self.commit(&mut state, next).await?;
		}
		Ok(removed)
	}

	async fn list(&self, owner: UserId, active: Option<bool>) -> Result<CameraList, StoreError> {
		let state = self.state.read().await;
		let mut list: CameraList = state.cameras.values()
			.filter(|camera| camera.owner == owner)
			.filter(|camera| active.map_or(true, |active| camera.active == active))
			.cloned()
			.collect();
		list.sort_by_key(Camera::sort_key);
		Ok(list)
	}

	async fn all(&self) -> Result<CameraList, StoreError> {
		let state = self.state.read().await;
		let mut list: CameraList = state.cameras.values().cloned().collect();
		list.sort_by_key(|camera| camera.id);
		Ok(list)
	}
}

fn ensure_unique_source(cameras: &CameraMap, source_url: &str, except: Option<CameraId>) -> Result<(), StoreError> {
	let taken = cameras.values()
		.any(|camera| camera.source_url == source_url && Some(camera.id) != except);
	if taken {
		return Err(StoreError::DuplicateSource(source_url.to_string()));
	}
	Ok(())
}

fn next_camera_id(state: &CameraFile) -> CameraId {
	let mut highest_id : CameraId = state.last_id;
	for id in state.cameras.keys() {
		highest_id = cmp::max(highest_id, *id);
	}
	return highest_id + 1;
}



/// Loads a YAML document, falling back to the default value if the file is missing or unreadable.
pub(crate) fn read_yaml_file<T: DeserializeOwned + Default>(path: &Path) -> T {
	let file_result = File::open(path);

	match file_result {
		Ok(file) => {
			let buf_reader = BufReader::new(file);
			match serde_yaml::from_reader(buf_reader) {
				Ok(value) => value,
				Err(err) => {
					error!("Failed to parse storage file {}; error was {}", path.display(), err);
					T::default()
				}
			}
		},
		Err(err) => {
			// Expected on first start, before anything has been written
			warn!("Failed to open storage file {} for reading; error was {}", path.display(), err);
			T::default()
		}
	}
}

/// Writes to a sibling temp file first and renames it over the target, so readers never see half a file.
pub(crate) async fn write_yaml_file<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), StoreError> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			tokio::fs::create_dir_all(parent).await?;
		}
	}

	let yaml = serde_yaml::to_string(value)?;
	let tmp_path = path.with_extension("yaml.tmp");
	let file = tokio::fs::File::create(&tmp_path).await?;
	let mut writer = tokio::io::BufWriter::new(file);
	writer.write_all(yaml.as_bytes()).await?;
	writer.flush().await?;
	drop(writer);

	tokio::fs::rename(&tmp_path, path).await?;
	Ok(())
}



#[cfg(test)]
mod tests {
	use super::*;

	fn new_camera(source_url: &str, name: &str) -> NewCamera {
		NewCamera {
			name: Some(name.to_string()),
			description: None,
			location: None,
			source_url: source_url.to_string(),
			active: true,
		}
	}

	#[rocket::async_test]
	async fn ids_are_assigned_in_sequence() {
		let store = FileCameraStore::in_memory();
		let first = store.insert(1, new_camera("rtsp://cam1", "a")).await.unwrap();
		let second = store.insert(1, new_camera("rtsp://cam2", "b")).await.unwrap();
		assert_eq!(first.id, 1);
		assert_eq!(second.id, 2);
	}

	#[rocket::async_test]
	async fn duplicate_sources_are_rejected() {
		let store = FileCameraStore::in_memory();
		let first = store.insert(1, new_camera("rtsp://cam1", "a")).await.unwrap();
		let duplicate = store.insert(2, new_camera("rtsp://cam1", "b")).await;
		assert!(matches!(duplicate, Err(StoreError::DuplicateSource(_))));

		let second = store.insert(1, new_camera("rtsp://cam2", "b")).await.unwrap();
		let mut moved = second.clone();
		moved.source_url = first.source_url.clone();
		assert!(matches!(store.save(&moved).await, Err(StoreError::DuplicateSource(_))));

		// Saving a camera under its own source is fine
		assert!(store.save(&first).await.is_ok());
	}

	#[rocket::async_test]
	async fn saving_a_removed_camera_fails() {
		let store = FileCameraStore::in_memory();
		let camera = store.insert(1, new_camera("rtsp://cam1", "a")).await.unwrap();
		assert_eq!(store.remove(camera.id).await.unwrap(), Some(camera.clone()));
		assert!(matches!(store.save(&camera).await, Err(StoreError::NotFound(1))));
		assert_eq!(store.remove(camera.id).await.unwrap(), None);
	}

	#[rocket::async_test]
	async fn list_filters_by_owner_and_active_flag() {
		let store = FileCameraStore::in_memory();
		store.insert(1, new_camera("rtsp://cam1", "zeta")).await.unwrap();
		let mut idle = store.insert(1, new_camera("rtsp://cam2", "alpha")).await.unwrap();
		store.insert(2, new_camera("rtsp://cam3", "other")).await.unwrap();
		idle.active = false;
		store.save(&idle).await.unwrap();

		let all_mine = store.list(1, None).await.unwrap();
		let names: Vec<_> = all_mine.iter().map(|camera| camera.name.clone().unwrap()).collect();
		assert_eq!(names, vec!["alpha", "zeta"]);

		let active = store.list(1, Some(true)).await.unwrap();
		assert_eq!(active.len(), 1);
		assert_eq!(active[0].source_url, "rtsp://cam1");
	}

	#[rocket::async_test]
	async fn cameras_survive_a_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("state").join("cameras.yaml");

		let store = FileCameraStore::open(&path);
		let mut camera = store.insert(4, new_camera("rtsp://cam1", "porch")).await.unwrap();
		camera.streaming = true;
		camera.process_id = Some(321);
		camera.stream_url = Some("/media/hls_streams/1/stream.m3u8".to_string());
		store.save(&camera).await.unwrap();

		let reopened = FileCameraStore::open(&path);
		assert_eq!(reopened.get(camera.id).await.unwrap(), Some(camera));
	}

	#[rocket::async_test]
	async fn ids_of_deleted_cameras_are_not_reused() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("cameras.yaml");

		let store = FileCameraStore::open(&path);
		store.insert(1, new_camera("rtsp://cam1", "a")).await.unwrap();
		let newest = store.insert(1, new_camera("rtsp://cam2", "b")).await.unwrap();
		store.remove(newest.id).await.unwrap();

		let next = store.insert(1, new_camera("rtsp://cam3", "c")).await.unwrap();
		assert_eq!(next.id, 3);

		store.remove(next.id).await.unwrap();
		let reopened = FileCameraStore::open(&path);
		let after_reopen = reopened.insert(1, new_camera("rtsp://cam4", "d")).await.unwrap();
		assert_eq!(after_reopen.id, 4);
	}
}
