//! Orchestrates camera lifecycle requests: persist, start or stop the transcoder, clean its
//! output and tell subscribers.
//!
//! Process-control failures never fail a request. They are logged and the camera is left in
//! the idle projection. Only invalid input, missing cameras, disallowed transitions and
//! storage failures reach the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn, error};

use crate::common::{Camera, CameraId, CameraList, CameraUpdate, NewCamera, ProcessId, UserId, CAMERA_GROUP};
use crate::config::StreamingConfig;
use crate::error::{StoreError, SupervisorError};
use crate::geometry::{Feature, FeatureCollection};
use crate::janitor::OutputJanitor;
use crate::launcher::Launcher;
use crate::notifier::{CameraEvent, CameraEventKind, NotificationSink};
use crate::store::CameraStore;
use crate::stream_state::{StreamState, StreamTransition};
use crate::terminator::{Termination, Terminator};



/// Stream status of one camera, including the transient starting/stopping phases.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq)]
#[derive(Serialize)]
pub struct StreamStatus {
	pub camera_id: CameraId,
	pub active: bool,
	#[serde(flatten)]
	pub state: StreamState,
}

pub struct Supervisor {
	config: StreamingConfig,
	store: Arc<dyn CameraStore>,
	launcher: Arc<dyn Launcher>,
	terminator: Arc<dyn Terminator>,
	janitor: OutputJanitor,
	notifier: Arc<dyn NotificationSink>,
	// One lock per camera so start/stop/delete of the same camera never overlap.
	locks: Mutex<HashMap<CameraId, Arc<tokio::sync::Mutex<()>>>>,
	phases: Mutex<HashMap<CameraId, StreamState>>,
}

fn lock_poisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Supervisor {
	pub fn new(
		config: StreamingConfig,
		store: Arc<dyn CameraStore>,
		launcher: Arc<dyn Launcher>,
		terminator: Arc<dyn Terminator>,
		notifier: Arc<dyn NotificationSink>,
	) -> Self {
		let janitor = OutputJanitor::new(config.output_dir.clone());
		Supervisor {
			config,
			store,
			launcher,
			terminator,
			janitor,
			notifier,
			locks: Mutex::new(HashMap::new()),
			phases: Mutex::new(HashMap::new()),
		}
	}

	/// Stores a new idle camera, starts its stream if it is active, and publishes `camera_added`.
	///
	/// A failed start is not an error: the camera is kept with `streaming == false`.
	pub async fn create(&self, owner: UserId, new: NewCamera) -> Result<Camera, SupervisorError> {
		new.validate()?;
		let id = self.store.insert(owner, new).await?.id;
		info!("Created camera {} for user {}", id, owner);

		let camera = {
			let lock = self.camera_lock(id);
			let _guard = lock.lock().await;
			// Other requests can reach the record between the insert and taking the lock
			let Some(mut camera) = self.store.get(id).await? else {
				return Err(SupervisorError::NotFound(id));
			};
			if camera.active && StreamState::of(&camera) == StreamState::Idle {
				self.start_stream(&mut camera).await?;
			}
			camera
		};

		self.notify(CameraEventKind::Added, &camera);
		Ok(camera)
	}

	/// Starts the stream of an idle camera. Starting a camera that is not idle is refused.
	pub async fn start(&self, owner: UserId, id: CameraId) -> Result<Camera, SupervisorError> {
		let lock = self.camera_lock(id);
		let _guard = lock.lock().await;

		let mut camera = self.owned_camera(owner, id).await?;
		self.start_stream(&mut camera).await?;
		self.notify(CameraEventKind::Updated, &camera);
		Ok(camera)
	}

	/// Stops the stream and clears the stream fields. Stopping an idle camera changes nothing.
	pub async fn stop(&self, owner: UserId, id: CameraId) -> Result<Camera, SupervisorError> {
		let lock = self.camera_lock(id);
		let _guard = lock.lock().await;

		let mut camera = self.owned_camera(owner, id).await?;
		if self.stop_stream(&mut camera).await? {
			self.notify(CameraEventKind::Updated, &camera);
		}
		Ok(camera)
	}

	/// Stops the stream, removes its output, then removes the record and publishes `camera_removed`.
	pub async fn delete(&self, owner: UserId, id: CameraId) -> Result<Camera, SupervisorError> {
		let lock = self.camera_lock(id);
		let camera = {
			let _guard = lock.lock().await;
			let mut camera = self.owned_camera(owner, id).await?;
			self.remove_camera(&mut camera).await?;
			camera
		};
		self.release_lock(id, lock);

		self.notify(CameraEventKind::Removed, &camera);
		Ok(camera)
	}

	/// Applies user edits. Only the edit itself touches the stream: `active: false` stops it,
	/// `active: true` starts it, and a new source restarts a running stream. Other edits leave
	/// an explicitly started or stopped stream as it is.
	pub async fn update(&self, owner: UserId, id: CameraId, update: CameraUpdate) -> Result<Camera, SupervisorError> {
		update.validate()?;
		let lock = self.camera_lock(id);
		let _guard = lock.lock().await;

		let mut camera = self.owned_camera(owner, id).await?;
		let previous_source = camera.source_url.clone();
		let requested_active = update.active;
		update.apply_to(&mut camera);
		self.store.save(&camera).await?;

		let running = StreamState::of(&camera) != StreamState::Idle;
		match requested_active {
			Some(false) if running => {
				self.stop_stream(&mut camera).await?;
			},
			Some(true) if !running => {
				self.start_stream(&mut camera).await?;
			},
			_ if running && camera.source_url != previous_source => {
				info!("Source of camera {} changed, restarting its stream", id);
				self.stop_stream(&mut camera).await?;
				self.start_stream(&mut camera).await?;
			},
			_ => {},
		}

		self.notify(CameraEventKind::Updated, &camera);
		Ok(camera)
	}

	pub async fn status(&self, owner: UserId, id: CameraId) -> Result<StreamStatus, SupervisorError> {
		let camera = self.owned_camera(owner, id).await?;
		let state = lock_poisoned(&self.phases).get(&id).cloned()
			.unwrap_or_else(|| StreamState::of(&camera));
		Ok(StreamStatus {
			camera_id: id,
			active: camera.active,
			state,
		})
	}

	pub async fn get(&self, owner: UserId, id: CameraId) -> Result<Camera, SupervisorError> {
		self.owned_camera(owner, id).await
	}

	pub async fn list(&self, owner: UserId, active: Option<bool>) -> Result<CameraList, SupervisorError> {
		Ok(self.store.list(owner, active).await?)
	}

	/// Active cameras with a location as GeoJSON, optionally limited to `ids`.
	pub async fn cameras_geojson(&self, owner: UserId, ids: Option<&[CameraId]>) -> Result<FeatureCollection, SupervisorError> {
		let cameras = self.store.list(owner, Some(true)).await?;
		let features = cameras.into_iter()
			.filter(|camera| ids.map_or(true, |ids| ids.is_empty() || ids.contains(&camera.id)))
			.filter_map(|camera| {
				let location = camera.location.clone()?;
				Some(Feature::new(location, serde_json::json!({
					"id": camera.id,
					"name": camera.name,
					"stream_url": camera.stream_url,
					"description": camera.description,
					"type": "Camera",
				})))
			})
			.collect();
		Ok(FeatureCollection::new(features))
	}

	/// Stops every stream, removes every output directory and deletes every camera.
	/// A camera that can't be removed is logged and skipped. Returns how many cameras were removed.
	pub async fn clean_slate(&self) -> Result<usize, SupervisorError> {
		let cameras = self.store.all().await?;
		let mut removed = 0;
		for camera in cameras {
			let id = camera.id;
			let lock = self.camera_lock(id);
			let _guard = lock.lock().await;
			// Re-read under the lock; the record may have changed or gone since the listing
			let mut camera = match self.store.get(id).await {
				Ok(Some(camera)) => camera,
				Ok(None) => continue,
				Err(err) => {
					error!("Failed to read camera {} during clean slate: {}", id, err);
					continue;
				}
			};
			match self.remove_camera(&mut camera).await {
				Ok(()) => {
					self.notify(CameraEventKind::Removed, &camera);
					removed += 1;
				},
				Err(err) => error!("Failed to remove camera {} during clean slate: {}", id, err),
			}
		}
		lock_poisoned(&self.locks).retain(|_, lock| Arc::strong_count(lock) > 1);
		info!("Clean slate removed {} camera(s)", removed);
		Ok(removed)
	}

	async fn owned_camera(&self, owner: UserId, id: CameraId) -> Result<Camera, SupervisorError> {
		match self.store.get(id).await? {
			Some(camera) if camera.owner == owner => Ok(camera),
			_ => Err(SupervisorError::NotFound(id)),
		}
	}

	async fn remove_camera(&self, camera: &mut Camera) -> Result<(), SupervisorError> {
		self.stop_stream(camera).await?;
		self.store.remove(camera.id).await?;
		info!("Deleted camera {}", camera.id);
		Ok(())
	}

	/// Idle -> Starting -> Streaming, or back to Idle if the transcoder could not be launched.
	/// Must be called with the camera's lock held.
	async fn start_stream(&self, camera: &mut Camera) -> Result<(), SupervisorError> {
		let id = camera.id;
		let starting = StreamState::of(camera)
			.apply(StreamTransition::BeginStart)
			.map_err(|err| SupervisorError::Conflict(id, err))?;
		self.set_phase(id, &starting);

		let transition = match self.launcher.launch(id, &camera.source_url).await {
			Ok(launched) => StreamTransition::Started {
				process_id: launched.process_id,
				stream_url: self.config.public_stream_url(id),
			},
			Err(err) => {
				error!("Failed to start transcoder for camera {}: {}", id, err);
				StreamTransition::StartFailed
			}
		};
		self.clear_phase(id);
		let state = starting.apply(transition).map_err(|err| SupervisorError::Conflict(id, err))?;
		state.project(camera);

		match self.store.save(camera).await {
			Ok(()) => {
				if let Some(url) = &camera.stream_url {
					info!("Camera {} is streaming at {}", id, url);
				}
				Ok(())
			},
			Err(err) => {
				// The record can't point at the process, so nothing else will ever stop it
				if let StreamState::Streaming { process_id, .. } = state {
					match &err {
						StoreError::NotFound(_) => warn!("Camera {} was deleted while its stream was starting; stopping PID {}", id, process_id),
						other => error!("Failed to record stream of camera {}: {}; stopping PID {}", id, other, process_id),
					}
					self.terminate(id, process_id).await;
					self.clean_output(id).await;
				}
				StreamState::Idle.project(camera);
				Err(err.into())
			}
		}
	}

	/// Streaming -> Stopping -> Idle. Returns whether the camera record changed.
	///
	/// Termination failures are logged only; the stream fields are cleared regardless.
	/// Must be called with the camera's lock held.
	async fn stop_stream(&self, camera: &mut Camera) -> Result<bool, SupervisorError> {
		let id = camera.id;
		let state = StreamState::of(camera);
		if state == StreamState::Idle {
			info!("No transcoder process to stop for camera {}", id);
			// Leftovers of a failed start
			self.clean_output(id).await;
			if camera.streaming || camera.stream_url.is_some() {
				StreamState::Idle.project(camera);
				self.store.save(camera).await?;
				return Ok(true);
			}
			return Ok(false);
		}

		let stopping = state.apply(StreamTransition::BeginStop)
			.map_err(|err| SupervisorError::Conflict(id, err))?;
		self.set_phase(id, &stopping);
		if let StreamState::Stopping { process_id: Some(process_id) } = stopping {
			self.terminate(id, process_id).await;
		}
		self.clean_output(id).await;
		self.clear_phase(id);

		let idle = stopping.apply(StreamTransition::Stopped)
			.map_err(|err| SupervisorError::Conflict(id, err))?;
		idle.project(camera);
		self.store.save(camera).await?;
		info!("Stopped stream of camera {}", id);
		Ok(true)
	}

	async fn terminate(&self, camera_id: CameraId, process_id: ProcessId) {
		match self.terminator.terminate(process_id).await {
			Ok(Termination::Signalled) => {
				// Give the transcoder a moment to exit before its directory goes away
				let grace = self.config.stop_grace();
				if !grace.is_zero() {
					tokio::time::sleep(grace).await;
				}
			},
			Ok(Termination::NotFound) => {
				warn!("Transcoder process {} not found, already terminated or never existed for camera {}", process_id, camera_id);
			},
			Err(err) => {
				error!("Error stopping transcoder for camera {}: {}", camera_id, err);
			},
		}
	}

	async fn clean_output(&self, camera_id: CameraId) {
		if let Err(err) = self.janitor.clean(camera_id).await {
			error!("Failed to remove stream output of camera {}: {}", camera_id, err);
		}
	}

	fn notify(&self, kind: CameraEventKind, camera: &Camera) {
		self.notifier.publish(CAMERA_GROUP, CameraEvent::new(kind, camera));
	}

	fn camera_lock(&self, id: CameraId) -> Arc<tokio::sync::Mutex<()>> {
		lock_poisoned(&self.locks).entry(id).or_default().clone()
	}

	/// Forgets the lock of a removed camera unless another request still waits on it.
	fn release_lock(&self, id: CameraId, lock: Arc<tokio::sync::Mutex<()>>) {
		let mut locks = lock_poisoned(&self.locks);
		// One reference in the map and one here; new clones need the map guard held above
		if Arc::strong_count(&lock) <= 2 {
			locks.remove(&id);
		}
	}

	fn set_phase(&self, id: CameraId, state: &StreamState) {
		lock_poisoned(&self.phases).insert(id, state.clone());
	}

	fn clear_phase(&self, id: CameraId) {
		lock_poisoned(&self.phases).remove(&id);
	}
}
