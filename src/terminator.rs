use log::info;

use crate::common::ProcessId;
use crate::error::TerminateError;



#[derive(Clone, Copy)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub enum Termination {
	/// The process was asked to stop.
	Signalled,
	/// Nothing with that id was running; already gone counts as stopped.
	NotFound,
}

/// Stops a transcoder given only its process id.
#[rocket::async_trait]
pub trait Terminator: Send + Sync {
	async fn terminate(&self, process_id: ProcessId) -> Result<Termination, TerminateError>;
}

/// SIGTERM on Unix hosts, `taskkill /F` on Windows.
#[derive(Clone, Copy)]
#[derive(Debug)]
#[derive(Default)]
pub struct SystemTerminator;

#[cfg(unix)]
#[rocket::async_trait]
impl Terminator for SystemTerminator {
	async fn terminate(&self, process_id: ProcessId) -> Result<Termination, TerminateError> {
		use nix::errno::Errno;
		use nix::sys::signal::{self, Signal};
		use nix::unistd::Pid;

		// 0 and negative values would signal whole process groups
		let raw_pid = match i32::try_from(process_id) {
			Ok(raw_pid) if raw_pid > 0 => raw_pid,
			_ => return Err(TerminateError::InvalidPid(process_id)),
		};

		let result = tokio::task::spawn_blocking(move || signal::kill(Pid::from_raw(raw_pid), Signal::SIGTERM))
			.await
			.map_err(|err| TerminateError::Failed { pid: process_id, reason: err.to_string() })?;

		match result {
			Ok(()) => {
				info!("Transcoder process {} terminated via SIGTERM", process_id);
				Ok(Termination::Signalled)
			},
			Err(Errno::ESRCH) => Ok(Termination::NotFound),
			Err(errno) => Err(TerminateError::Failed { pid: process_id, reason: errno.desc().to_string() }),
		}
	}
}

#[cfg(windows)]
#[rocket::async_trait]
impl Terminator for SystemTerminator {
	async fn terminate(&self, process_id: ProcessId) -> Result<Termination, TerminateError> {
		// taskkill's exit code when no process matches the given PID
		const TASKKILL_NOT_FOUND: i32 = 128;

		if process_id == 0 {
			return Err(TerminateError::InvalidPid(process_id));
		}

		let output = tokio::process::Command::new("taskkill")
			.args(["/F", "/PID", &process_id.to_string()])
			.output()
			.await?;

		match output.status.code() {
			Some(0) => {
				info!("Transcoder process {} terminated via taskkill", process_id);
				Ok(Termination::Signalled)
			},
			Some(TASKKILL_NOT_FOUND) => Ok(Termination::NotFound),
			_ => Err(TerminateError::Failed {
				pid: process_id,
				reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			}),
		}
	}
}



#[cfg(all(test, unix))]
mod tests {
	use super::*;
	use std::os::unix::process::ExitStatusExt;
	use std::process::Command;

	#[rocket::async_test]
	async fn running_process_receives_sigterm() {
		let mut child = Command::new("sleep").arg("30").spawn().unwrap();

		let outcome = SystemTerminator.terminate(child.id()).await.unwrap();
		assert_eq!(outcome, Termination::Signalled);

		let status = child.wait().unwrap();
		assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGTERM as i32));
	}

	#[rocket::async_test]
	async fn exited_process_counts_as_stopped() {
		let mut child = Command::new("true").spawn().unwrap();
		let pid = child.id();
		child.wait().unwrap();

		let outcome = SystemTerminator.terminate(pid).await.unwrap();
		assert_eq!(outcome, Termination::NotFound);
	}

	#[rocket::async_test]
	async fn process_group_ids_are_refused() {
		assert!(matches!(SystemTerminator.terminate(0).await, Err(TerminateError::InvalidPid(0))));
		assert!(matches!(SystemTerminator.terminate(u32::MAX).await, Err(TerminateError::InvalidPid(_))));
	}
}
