//! Hand-off of a submit description to the batch system CLI.

use std::path::Path;
use std::process::Command;

use tsub_core::{Error, Result};

/// Default HTCondor submission command.
pub const DEFAULT_SUBMIT_COMMAND: &str = "condor_submit";

/// Run `<command> <descriptor>` with inherited stdio and return its exit code.
///
/// A process terminated by a signal reports exit code 1.
pub fn submit_descriptor(command: &str, descriptor: &Path) -> Result<i32> {
    tracing::info!(command, descriptor = %descriptor.display(), "submitting jobs");
    let status = Command::new(command).arg(descriptor).status().map_err(|e| Error::Process {
        command: format!("{command} {}", descriptor.display()),
        message: e.to_string(),
    })?;
    let code = status.code().unwrap_or(1);
    if code != 0 {
        tracing::warn!(command, code, "batch submission returned a non-zero exit code");
    }
    Ok(code)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn exit_code_is_propagated() {
        assert_eq!(submit_descriptor("true", Path::new("x.sub")).unwrap(), 0);
        assert_eq!(submit_descriptor("false", Path::new("x.sub")).unwrap(), 1);
    }

    #[test]
    fn missing_command_is_a_process_error() {
        let err = submit_descriptor("trexsub-no-such-submit", Path::new("x.sub")).unwrap_err();
        assert!(matches!(err, Error::Process { .. }));
    }
}
