//! Asynchronous utilities for use with Tokio.
//!
//! OCR runs as an external process and model inference is CPU-bound, so
//! everything here is about getting that work off the async executor without
//! letting a failure take down the whole process.

use crate::prelude::*;

pub mod io;

/// Report any command failures, and include any error output.
///
/// Standard output and standard error are logged at debug level, because
/// tools like `tesseract` print harmless diagnostics to standard error even
/// when they succeed.
pub fn check_for_command_failure(
    command_name: &str,
    output: &std::process::Output,
) -> Result<()> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(
        command_name = command_name,
        output = %stderr,
        "Standard error from command",
    );

    if output.status.success() {
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

/// Wrapper around [`tokio::task::spawn_blocking`] that turns a panic in the
/// background task into an ordinary error.
///
/// A panic inside a model should fail the current upload, not the process.
pub async fn spawn_blocking_catching_panics<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("background task panicked or was cancelled")
}

#[cfg(test)]
mod tests {
    use std::{os::unix::process::ExitStatusExt as _, process::Output};

    use super::*;

    fn output(code: i32, stderr: &str) -> Output {
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: vec![],
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn successful_command_with_stderr_is_ok() {
        let out = output(0, "Estimating resolution as 300");
        assert!(check_for_command_failure("tesseract", &out).is_ok());
    }

    #[test]
    fn failed_command_reports_exit_code_and_stderr() {
        let out = output(1, "Error in pixReadStream");
        let err = check_for_command_failure("tesseract", &out).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit code 1"), "{msg}");
        assert!(msg.contains("pixReadStream"), "{msg}");
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let result = spawn_blocking_catching_panics(|| -> u32 { panic!("boom") }).await;
        assert!(result.is_err());
        let value = spawn_blocking_catching_panics(|| 42).await.unwrap();
        assert_eq!(value, 42);
    }
}
