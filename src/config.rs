use std::path::PathBuf;
use std::time::Duration;

use rocket::figment::Figment;
use rocket::figment::providers::{Format, Toml};

use crate::common::CameraId;



/// Read when no `--config` file is given on the command line. Missing is fine.
pub const DEFAULT_CONFIG_FILE: &str = "geocam.toml";

#[derive(Clone)]
#[derive(Debug)]
#[derive(Default)]
#[derive(Deserialize)]
#[serde(default)]
pub struct AppConfig {
	pub streaming: StreamingConfig,
	pub storage: StorageConfig,
}

impl AppConfig {
	pub fn from_figment(figment: &Figment) -> Result<Self, rocket::figment::Error> {
		figment.extract()
	}
}

/// `[streaming]`: where transcoder output goes and how the transcoder is invoked.
#[derive(Clone)]
#[derive(Debug)]
#[derive(Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
	/// Root of the per-camera output directories. Starting a stream fails while unset.
	pub output_dir: Option<PathBuf>,
	/// Public prefix the output root is served under, followed by `hls_streams/`.
	pub media_url: String,
	pub ffmpeg_path: PathBuf,
	pub rtsp_transport: String,
	pub video_codec: String,
	pub audio_codec: String,
	pub audio_bitrate: String,
	pub scale: Option<String>,
	pub segment_seconds: u32,
	/// Number of segments kept in the playlist; older ones are deleted.
	pub playlist_size: u32,
	/// Pause after a successful termination signal before the output directory is removed.
	pub stop_grace_ms: u64,
}

impl Default for StreamingConfig {
	fn default() -> Self {
		StreamingConfig {
			output_dir: None,
			media_url: "/media/".to_string(),
			ffmpeg_path: PathBuf::from("ffmpeg"),
			rtsp_transport: "tcp".to_string(),
			video_codec: "libx264".to_string(),
			audio_codec: "aac".to_string(),
			audio_bitrate: "128k".to_string(),
			scale: Some("640:426".to_string()),
			segment_seconds: 4,
			playlist_size: 10,
			stop_grace_ms: 1000,
		}
	}
}

impl StreamingConfig {
	/// Route prefix the output root is served at, e.g. `/media/hls_streams`.
	/// `None` when the media URL points at another host.
	pub fn hls_mount_point(&self) -> Option<String> {
		if !self.media_url.starts_with('/') {
			return None;
		}
		Some(format!("{}hls_streams", self.media_prefix()))
	}

	pub fn public_stream_url(&self, camera_id: CameraId) -> String {
		format!("{}hls_streams/{}/stream.m3u8", self.media_prefix(), camera_id)
	}

	pub fn stop_grace(&self) -> Duration {
		Duration::from_millis(self.stop_grace_ms)
	}

	fn media_prefix(&self) -> String {
		if self.media_url.ends_with('/') {
			self.media_url.clone()
		} else {
			format!("{}/", self.media_url)
		}
	}
}

/// `[storage]`: YAML files backing the stores. Unset means in-memory only.
#[derive(Clone)]
#[derive(Debug)]
#[derive(Default)]
#[derive(Deserialize)]
#[serde(default)]
pub struct StorageConfig {
	pub cameras_file: Option<PathBuf>,
	pub locations_file: Option<PathBuf>,
}

/// Rocket's own configuration sources with the given TOML files merged on top, later files winning.
pub fn figment(config_files: &[&str]) -> Figment {
	let mut figment = rocket::Config::figment();
	if config_files.is_empty() {
		figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
	}
	for file in config_files {
		figment = figment.merge(Toml::file(file));
	}
	figment
}
