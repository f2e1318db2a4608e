use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use log::{info, debug};

use crate::common::{CameraId, ProcessId};
use crate::config::StreamingConfig;
use crate::error::LaunchError;



pub const PLAYLIST_FILE_NAME: &str = "stream.m3u8";
pub const SEGMENT_FILE_PATTERN: &str = "stream%03d.ts";
pub const ERROR_LOG_FILE_NAME: &str = "ffmpeg_error.log";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Files owned by one camera's transcoder, all under `<output root>/<camera id>/`.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq)]
pub struct StreamPaths {
	pub dir: PathBuf,
	pub playlist: PathBuf,
	pub segment_pattern: PathBuf,
	pub error_log: PathBuf,
}

impl StreamPaths {
	pub fn new(output_root: &Path, camera_id: CameraId) -> Self {
		let dir = camera_dir(output_root, camera_id);
		StreamPaths {
			playlist: dir.join(PLAYLIST_FILE_NAME),
			segment_pattern: dir.join(SEGMENT_FILE_PATTERN),
			error_log: dir.join(ERROR_LOG_FILE_NAME),
			dir,
		}
	}
}

pub fn camera_dir(output_root: &Path, camera_id: CameraId) -> PathBuf {
	output_root.join(camera_id.to_string())
}

#[derive(Clone)]
#[derive(Debug)]
pub struct LaunchedProcess {
	pub process_id: ProcessId,
	pub paths: StreamPaths,
}

/// Starts a detached transcoder for one camera.
#[rocket::async_trait]
pub trait Launcher: Send + Sync {
	async fn launch(&self, camera_id: CameraId, source_url: &str) -> Result<LaunchedProcess, LaunchError>;
}

/// Launches `ffmpeg` to turn an RTSP feed into a rolling HLS playlist.
pub struct FfmpegLauncher {
	config: StreamingConfig,
}

impl FfmpegLauncher {
	pub fn new(config: StreamingConfig) -> Self {
		FfmpegLauncher { config }
	}
}

/// Command line for reading `source_url` over RTSP and writing HLS into `paths`.
pub fn transcode_args(config: &StreamingConfig, source_url: &str, paths: &StreamPaths) -> Vec<String> {
	#[rustfmt::skip]
	let mut args: Vec<String> = vec![
		"-y".into(),
		"-rtsp_transport".into(), config.rtsp_transport.clone(),
		"-i".into(), source_url.into(),
		"-c:v".into(), config.video_codec.clone(),
		"-c:a".into(), config.audio_codec.clone(),
		"-b:a".into(), config.audio_bitrate.clone(),
	];

	if let Some(scale) = &config.scale {
		args.extend(["-vf".to_string(), format!("scale={scale}")]);
	}

	#[rustfmt::skip]
	args.extend([
		"-hls_time".to_string(), config.segment_seconds.to_string(),
		"-hls_list_size".to_string(), config.playlist_size.to_string(),
		"-hls_flags".to_string(), "delete_segments".to_string(),
		"-hls_segment_filename".to_string(), paths.segment_pattern.display().to_string(),
		"-f".to_string(), "hls".to_string(),
		paths.playlist.display().to_string(),
	]);

	args
}

#[rocket::async_trait]
impl Launcher for FfmpegLauncher {
	async fn launch(&self, camera_id: CameraId, source_url: &str) -> Result<LaunchedProcess, LaunchError> {
		let output_root = self.config.output_dir.as_ref().ok_or(LaunchError::OutputDirUnset)?;
		let paths = StreamPaths::new(output_root, camera_id);

		tokio::fs::create_dir_all(&paths.dir).await.map_err(LaunchError::OutputDir)?;
		// ffmpeg writes its diagnostics here instead of interleaving them with ours
		let error_log = tokio::fs::File::create(&paths.error_log).await
			.map_err(LaunchError::OutputDir)?
			.into_std()
			.await;

		let args = transcode_args(&self.config, source_url, &paths);
		info!("Starting transcoder for camera {} with command: {} {}", camera_id, self.config.ffmpeg_path.display(), args.join(" "));
		debug!("Transcoder stderr for camera {} goes to {}", camera_id, paths.error_log.display());

		let mut command = std::process::Command::new(&self.config.ffmpeg_path);
		command
			.args(&args)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::from(error_log));

		#[cfg(unix)]
		{
			use std::os::unix::process::CommandExt;
			// Own process group, so signals aimed at the server don't reach the transcoder
			command.process_group(0);
		}
		#[cfg(windows)]
		{
			use std::os::windows::process::CommandExt;
			command.creation_flags(CREATE_NO_WINDOW);
		}

		// The child handle is dropped right away: the process keeps running and tokio reaps it once it exits.
		let child = Command::from(command).spawn().map_err(|err| match err.kind() {
			io::ErrorKind::NotFound => LaunchError::BinaryNotFound(self.config.ffmpeg_path.clone()),
			_ => LaunchError::Spawn(err),
		})?;
		let process_id = child.id().ok_or(LaunchError::NoProcessId)?;

		info!("Transcoder for camera {} started in background (PID: {})", camera_id, process_id);
		Ok(LaunchedProcess { process_id, paths })
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	fn config(output_dir: &Path) -> StreamingConfig {
		StreamingConfig {
			output_dir: Some(output_dir.to_path_buf()),
			..StreamingConfig::default()
		}
	}

	#[test]
	fn paths_are_keyed_by_camera_id() {
		let paths = StreamPaths::new(Path::new("/srv/hls"), 42);
		assert_eq!(paths.dir, PathBuf::from("/srv/hls/42"));
		assert_eq!(paths.playlist, PathBuf::from("/srv/hls/42/stream.m3u8"));
		assert_eq!(paths.segment_pattern, PathBuf::from("/srv/hls/42/stream%03d.ts"));
		assert_eq!(paths.error_log, PathBuf::from("/srv/hls/42/ffmpeg_error.log"));
	}

	#[test]
	fn command_line_reads_rtsp_over_tcp_and_writes_rolling_hls() {
		let config = config(Path::new("/srv/hls"));
		let paths = StreamPaths::new(Path::new("/srv/hls"), 1);
		let args = transcode_args(&config, "rtsp://cam1", &paths);

		let value_of = |flag: &str| {
			let pos = args.iter().position(|arg| arg == flag).unwrap();
			args[pos + 1].clone()
		};
		assert_eq!(value_of("-rtsp_transport"), "tcp");
		assert_eq!(value_of("-i"), "rtsp://cam1");
		assert_eq!(value_of("-c:v"), "libx264");
		assert_eq!(value_of("-c:a"), "aac");
		assert_eq!(value_of("-vf"), "scale=640:426");
		assert_eq!(value_of("-hls_time"), "4");
		assert_eq!(value_of("-hls_list_size"), "10");
		assert_eq!(value_of("-hls_flags"), "delete_segments");
		assert_eq!(value_of("-hls_segment_filename"), "/srv/hls/1/stream%03d.ts");
		assert_eq!(value_of("-f"), "hls");
		assert_eq!(args.last().unwrap(), "/srv/hls/1/stream.m3u8");
	}

	#[test]
	fn scale_filter_is_optional() {
		let mut config = config(Path::new("/srv/hls"));
		config.scale = None;
		let args = transcode_args(&config, "rtsp://cam1", &StreamPaths::new(Path::new("/srv/hls"), 1));
		assert!(!args.iter().any(|arg| arg == "-vf"));
	}

	#[rocket::async_test]
	async fn missing_output_dir_is_a_configuration_error() {
		let launcher = FfmpegLauncher::new(StreamingConfig::default());
		let result = launcher.launch(1, "rtsp://cam1").await;
		assert!(matches!(result, Err(LaunchError::OutputDirUnset)));
	}

	#[rocket::async_test]
	async fn missing_binary_is_reported() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = config(dir.path());
		config.ffmpeg_path = dir.path().join("no-such-ffmpeg");

		let result = FfmpegLauncher::new(config).launch(5, "rtsp://cam1").await;
		assert!(matches!(result, Err(LaunchError::BinaryNotFound(_))));
		// The output directory is still prepared before the spawn attempt
		assert!(dir.path().join("5").is_dir());
	}

	#[cfg(unix)]
	#[rocket::async_test]
	async fn launch_reports_process_id_and_creates_error_log() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = config(dir.path());
		// Any binary will do; `true` ignores the ffmpeg arguments and exits
		config.ffmpeg_path = PathBuf::from("true");

		let launched = FfmpegLauncher::new(config).launch(3, "rtsp://cam1").await.unwrap();
		assert!(launched.process_id > 0);
		assert_eq!(launched.paths, StreamPaths::new(dir.path(), 3));
		assert!(launched.paths.error_log.is_file());
	}
}
