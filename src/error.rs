use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::common::{CameraId, ProcessId};



/// Malformed client input. Rejected before any state changes.
#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("source_url is required")]
	MissingSource,
	#[error("source_url is longer than {0} characters")]
	SourceTooLong(usize),
	#[error("invalid source_url: {0}")]
	InvalidSource(String),
	#[error("name is longer than {0} characters")]
	NameTooLong(usize),
	#[error("invalid coordinates: {0}")]
	InvalidCoordinates(String),
	#[error("invalid geometry: {0}")]
	InvalidGeometry(String),
	#[error("no location ids provided")]
	NoLocationIds,
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("record {0} not found")]
	NotFound(u64),
	#[error("a camera with source {0} already exists")]
	DuplicateSource(String),
	#[error("storage file error: {0}")]
	Io(#[from] io::Error),
	#[error("storage encoding error: {0}")]
	Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum LaunchError {
	#[error("streaming output directory is not configured")]
	OutputDirUnset,
	#[error("transcoder binary {} not found", .0.display())]
	BinaryNotFound(PathBuf),
	#[error("failed to prepare output directory: {0}")]
	OutputDir(#[source] io::Error),
	#[error("failed to spawn transcoder: {0}")]
	Spawn(#[source] io::Error),
	#[error("transcoder exited before its process id could be read")]
	NoProcessId,
}

#[derive(Debug, Error)]
pub enum TerminateError {
	#[error("invalid process id {0}")]
	InvalidPid(ProcessId),
	#[error("failed to terminate process {pid}: {reason}")]
	Failed {
		pid: ProcessId,
		reason: String,
	},
	#[error("failed to run termination command: {0}")]
	Io(#[from] io::Error),
}

/// A lifecycle request that the current stream state does not allow.
#[derive(Debug, Error)]
#[derive(PartialEq)]
#[error("cannot {transition} while {state}")]
pub struct TransitionError {
	pub state: &'static str,
	pub transition: &'static str,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
	#[error("camera {0} not found")]
	NotFound(CameraId),
	#[error(transparent)]
	Invalid(#[from] ValidationError),
	#[error("camera {0}: {1}")]
	Conflict(CameraId, #[source] TransitionError),
	#[error(transparent)]
	Store(StoreError),
}

impl From<StoreError> for SupervisorError {
	fn from(err: StoreError) -> Self {
		match err {
			StoreError::NotFound(id) => SupervisorError::NotFound(id),
			other => SupervisorError::Store(other),
		}
	}
}
