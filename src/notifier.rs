use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use log::debug;

use crate::common::Camera;



/// Buffered events per group before slow subscribers start lagging.
const GROUP_CAPACITY: usize = 256;

#[derive(Clone, Copy)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub enum CameraEventKind {
	#[serde(rename = "camera_added")]
	Added,
	#[serde(rename = "camera_updated")]
	Updated,
	#[serde(rename = "camera_removed")]
	Removed,
}

/// What subscribers receive: the change and the camera as it looked right after it.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq)]
#[derive(Serialize, Deserialize)]
pub struct CameraEvent {
	#[serde(rename = "type")]
	pub kind: CameraEventKind,
	pub camera: Camera,
}

impl CameraEvent {
	pub fn new(kind: CameraEventKind, camera: &Camera) -> Self {
		CameraEvent { kind, camera: camera.clone() }
	}
}

/// Fire-and-forget fan-out of camera events. Publishing never blocks and never fails.
pub trait NotificationSink: Send + Sync {
	fn publish(&self, group: &str, event: CameraEvent);
}

/// In-process pub/sub: one broadcast channel per group, created by the first subscriber.
///
/// Nothing is kept for late subscribers; events published to a group nobody listens to are dropped.
#[derive(Default)]
pub struct BroadcastNotifier {
	groups: Mutex<HashMap<String, broadcast::Sender<CameraEvent>>>,
}

impl BroadcastNotifier {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn subscribe(&self, group: &str) -> broadcast::Receiver<CameraEvent> {
		let mut groups = self.groups.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		groups.entry(group.to_string())
			.or_insert_with(|| broadcast::channel(GROUP_CAPACITY).0)
			.subscribe()
	}
}

impl NotificationSink for BroadcastNotifier {
	fn publish(&self, group: &str, event: CameraEvent) {
		let groups = self.groups.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		let Some(sender) = groups.get(group) else {
			debug!("No subscribers in group {}, dropping {:?} for camera {}", group, event.kind, event.camera.id);
			return;
		};
		// Only fails when every receiver is gone
		if sender.send(event).is_err() {
			debug!("All subscribers of group {} have left", group);
		}
	}
}
