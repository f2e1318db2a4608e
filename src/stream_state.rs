//! Stream lifecycle of a single camera.
//!
//! ```text
//! Idle --BeginStart--> Starting --Started--> Streaming --BeginStop--> Stopping --Stopped--> Idle
//!                         |
//!                         +--StartFailed--> Idle
//! ```
//!
//! The `streaming`, `process_id` and `stream_url` fields of [`Camera`] are the durable projection
//! of this machine. `Starting` and `Stopping` only exist while the supervisor is working on the
//! camera and are never read back from storage.

use crate::common::{Camera, ProcessId};
use crate::error::TransitionError;



#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq)]
#[derive(Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamState {
	Idle,
	Starting,
	Streaming {
		process_id: ProcessId,
		stream_url: String,
	},
	Stopping {
		process_id: Option<ProcessId>,
	},
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq)]
pub enum StreamTransition {
	BeginStart,
	Started {
		process_id: ProcessId,
		stream_url: String,
	},
	StartFailed,
	BeginStop,
	Stopped,
}

impl StreamTransition {
	fn name(&self) -> &'static str {
		match self {
			StreamTransition::BeginStart => "start",
			StreamTransition::Started { .. } => "finish starting",
			StreamTransition::StartFailed => "fail starting",
			StreamTransition::BeginStop => "stop",
			StreamTransition::Stopped => "finish stopping",
		}
	}
}

impl StreamState {
	/// State as recorded on the camera. A record without a process id reads as idle.
	pub fn of(camera: &Camera) -> Self {
		match camera.process_id {
			Some(process_id) => StreamState::Streaming {
				process_id,
				stream_url: camera.stream_url.clone().unwrap_or_default(),
			},
			None => StreamState::Idle,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			StreamState::Idle => "idle",
			StreamState::Starting => "starting",
			StreamState::Streaming { .. } => "streaming",
			StreamState::Stopping { .. } => "stopping",
		}
	}

	pub fn apply(self, transition: StreamTransition) -> Result<StreamState, TransitionError> {
		match (self, transition) {
			(StreamState::Idle, StreamTransition::BeginStart) => Ok(StreamState::Starting),
			(StreamState::Starting, StreamTransition::Started { process_id, stream_url }) => {
				Ok(StreamState::Streaming { process_id, stream_url })
			}
			(StreamState::Starting, StreamTransition::StartFailed) => Ok(StreamState::Idle),
			(StreamState::Streaming { process_id, .. }, StreamTransition::BeginStop) => {
				Ok(StreamState::Stopping { process_id: Some(process_id) })
			}
			(StreamState::Stopping { .. }, StreamTransition::Stopped) => Ok(StreamState::Idle),
			(state, transition) => Err(TransitionError {
				state: state.name(),
				transition: transition.name(),
			}),
		}
	}

	/// Writes the persisted fields for this state onto the camera.
	///
	/// `Stopping` leaves the fields alone; the process may still be running until it is confirmed gone.
	pub fn project(&self, camera: &mut Camera) {
		match self {
			StreamState::Idle | StreamState::Starting => {
				camera.streaming = false;
				camera.process_id = None;
				camera.stream_url = None;
			}
			StreamState::Streaming { process_id, stream_url } => {
				camera.streaming = true;
				camera.process_id = Some(*process_id);
				camera.stream_url = Some(stream_url.clone());
			}
			StreamState::Stopping { .. } => {}
		}
	}
}



#[cfg(test)]
mod tests {
	use super::*;
	use crate::common::NewCamera;

	fn camera() -> Camera {
		Camera::from_new(1, 1, NewCamera {
			name: None,
			description: None,
			location: None,
			source_url: "rtsp://cam1".to_string(),
			active: true,
		})
	}

	fn started() -> StreamTransition {
		StreamTransition::Started {
			process_id: 99,
			stream_url: "/media/hls_streams/1/stream.m3u8".to_string(),
		}
	}

	#[test]
	fn full_cycle_returns_to_idle() {
		let state = StreamState::Idle
			.apply(StreamTransition::BeginStart).unwrap()
			.apply(started()).unwrap();
		assert_eq!(state.name(), "streaming");

		let state = state.apply(StreamTransition::BeginStop).unwrap();
		assert_eq!(state, StreamState::Stopping { process_id: Some(99) });
		assert_eq!(state.apply(StreamTransition::Stopped).unwrap(), StreamState::Idle);
	}

	#[test]
	fn start_is_only_allowed_from_idle() {
		let streaming = StreamState::Idle
			.apply(StreamTransition::BeginStart).unwrap()
			.apply(started()).unwrap();
		let err = streaming.apply(StreamTransition::BeginStart).unwrap_err();
		assert_eq!(err, TransitionError { state: "streaming", transition: "start" });

		assert!(StreamState::Starting.apply(StreamTransition::BeginStart).is_err());
		assert!(StreamState::Stopping { process_id: None }.apply(StreamTransition::BeginStart).is_err());
	}

	#[test]
	fn failed_start_goes_back_to_idle() {
		let state = StreamState::Idle
			.apply(StreamTransition::BeginStart).unwrap()
			.apply(StreamTransition::StartFailed).unwrap();
		assert_eq!(state, StreamState::Idle);
	}

	#[test]
	fn idle_cannot_be_stopped() {
		assert!(StreamState::Idle.apply(StreamTransition::BeginStop).is_err());
	}

	#[test]
	fn projection_keeps_fields_consistent() {
		let mut camera = camera();
		let streaming = StreamState::Idle
			.apply(StreamTransition::BeginStart).unwrap()
			.apply(started()).unwrap();
		streaming.project(&mut camera);
		assert!(camera.streaming);
		assert_eq!(camera.process_id, Some(99));
		assert_eq!(StreamState::of(&camera), streaming);

		StreamState::Stopping { process_id: Some(99) }.project(&mut camera);
		assert_eq!(camera.process_id, Some(99));

		StreamState::Idle.project(&mut camera);
		assert!(!camera.streaming);
		assert_eq!(camera.process_id, None);
		assert_eq!(camera.stream_url, None);
		assert_eq!(StreamState::of(&camera), StreamState::Idle);
	}
}
