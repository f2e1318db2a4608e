use std::io;
use std::path::PathBuf;

use log::info;

use crate::common::CameraId;
use crate::launcher::camera_dir;



/// Removes a camera's transcoder output once its process has been stopped.
#[derive(Clone)]
#[derive(Debug)]
pub struct OutputJanitor {
	output_root: Option<PathBuf>,
}

impl OutputJanitor {
	pub fn new(output_root: Option<PathBuf>) -> Self {
		OutputJanitor { output_root }
	}

	/// Deletes `<output root>/<camera id>` and everything below it.
	///
	/// Returns whether anything was removed. Only call after the camera's transcoder has been
	/// told to stop, or the directory may be deleted while it is still being written.
	pub async fn clean(&self, camera_id: CameraId) -> io::Result<bool> {
		let Some(output_root) = &self.output_root else {
			return Ok(false);
		};
		let dir = camera_dir(output_root, camera_id);

		match tokio::fs::remove_dir_all(&dir).await {
			Ok(()) => {
				info!("Cleaned up stream directory {}", dir.display());
				Ok(true)
			},
			Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
			Err(err) => Err(err),
		}
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	#[rocket::async_test]
	async fn removes_the_whole_camera_tree() {
		let root = tempfile::tempdir().unwrap();
		let dir = root.path().join("9");
		std::fs::create_dir_all(dir.join("nested")).unwrap();
		std::fs::write(dir.join("stream.m3u8"), "#EXTM3U\n").unwrap();
		std::fs::write(dir.join("stream000.ts"), [0u8; 16]).unwrap();
		std::fs::write(root.path().join("other.txt"), "keep").unwrap();

		let janitor = OutputJanitor::new(Some(root.path().to_path_buf()));
		assert!(janitor.clean(9).await.unwrap());
		assert!(!dir.exists());
		assert!(root.path().join("other.txt").exists());
	}

	#[rocket::async_test]
	async fn missing_directory_is_a_no_op() {
		let root = tempfile::tempdir().unwrap();
		let janitor = OutputJanitor::new(Some(root.path().to_path_buf()));
		assert!(!janitor.clean(1).await.unwrap());
		assert!(!OutputJanitor::new(None).clean(1).await.unwrap());
	}
}
