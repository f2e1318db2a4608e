use std::collections::HashMap;

use url::Url;

use crate::error::ValidationError;
use crate::geometry::{self, Geometry};



pub type CameraId = u64;
pub type UserId = u64;
pub type ProcessId = u32;
pub type CameraList = Vec<Camera>;
pub type CameraMap = HashMap<CameraId, Camera>;

/// Group that every camera lifecycle event is published to.
pub const CAMERA_GROUP: &str = "cameras";

pub const MAX_SOURCE_URL_LEN: usize = 500;
pub const MAX_NAME_LEN: usize = 100;
const SOURCE_SCHEMES: [&str; 2] = ["rtsp", "rtsps"];

#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq)]
#[derive(Serialize, Deserialize)]
pub struct Camera {
	pub id: CameraId,
	pub owner: UserId,
	pub name: Option<String>,
	pub description: Option<String>,
	pub location: Option<Geometry>,
	pub source_url: String,
	/// Whether the owner wants this camera to be streaming.
	pub active: bool,
	/// Whether a transcoder is believed to be running. Observed state, not intent.
	pub streaming: bool,
	pub process_id: Option<ProcessId>,
	/// Public address of the generated playlist; only set while streaming.
	pub stream_url: Option<String>,
}

impl Camera {
	pub fn from_new(id: CameraId, owner: UserId, new: NewCamera) -> Self {
		Camera {
			id,
			owner,
			name: new.name,
			description: new.description,
			location: new.location,
			source_url: new.source_url,
			active: new.active,
			streaming: false,
			process_id: None,
			stream_url: None,
		}
	}

	/// Sort key used for listings; unnamed cameras go last.
	pub fn sort_key(&self) -> (bool, String, CameraId) {
		match &self.name {
			Some(name) => (false, name.to_lowercase(), self.id),
			None => (true, String::new(), self.id),
		}
	}
}

/// Body of a camera creation request.
#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
pub struct NewCamera {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub location: Option<Geometry>,
	pub source_url: String,
	#[serde(default = "default_active")]
	pub active: bool,
}

fn default_active() -> bool {
	true
}

impl NewCamera {
	pub fn validate(&self) -> Result<(), ValidationError> {
		validate_source_url(&self.source_url)?;
		validate_name(self.name.as_deref())?;
		if let Some(location) = &self.location {
			geometry::validate_camera_location(location)?;
		}
		Ok(())
	}
}

/// Partial update of the user-editable camera fields. Absent fields are left as they are.
#[derive(Clone)]
#[derive(Debug)]
#[derive(Default)]
#[derive(Serialize, Deserialize)]
pub struct CameraUpdate {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub location: Option<Geometry>,
	#[serde(default)]
	pub source_url: Option<String>,
	#[serde(default)]
	pub active: Option<bool>,
}

impl CameraUpdate {
	pub fn validate(&self) -> Result<(), ValidationError> {
		if let Some(source_url) = &self.source_url {
			validate_source_url(source_url)?;
		}
		validate_name(self.name.as_deref())?;
		if let Some(location) = &self.location {
			geometry::validate_camera_location(location)?;
		}
		Ok(())
	}

	pub fn apply_to(self, camera: &mut Camera) {
		if let Some(name) = self.name {
			camera.name = Some(name);
		}
		if let Some(description) = self.description {
			camera.description = Some(description);
		}
		if let Some(location) = self.location {
			camera.location = Some(location);
		}
		if let Some(source_url) = self.source_url {
			camera.source_url = source_url;
		}
		if let Some(active) = self.active {
			camera.active = active;
		}
	}
}


pub fn validate_source_url(source_url: &str) -> Result<(), ValidationError> {
	if source_url.trim().is_empty() {
		return Err(ValidationError::MissingSource);
	}
	if source_url.len() > MAX_SOURCE_URL_LEN {
		return Err(ValidationError::SourceTooLong(MAX_SOURCE_URL_LEN));
	}
	let url = Url::parse(source_url).map_err(|err| ValidationError::InvalidSource(err.to_string()))?;
	if !SOURCE_SCHEMES.contains(&url.scheme()) {
		return Err(ValidationError::InvalidSource(format!("unsupported scheme {}", url.scheme())));
	}
	Ok(())
}

fn validate_name(name: Option<&str>) -> Result<(), ValidationError> {
	match name {
		Some(name) if name.chars().count() > MAX_NAME_LEN => Err(ValidationError::NameTooLong(MAX_NAME_LEN)),
		_ => Ok(()),
	}
}
