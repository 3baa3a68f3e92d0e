//! Bounded execution of external helper programs.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{ControlError, Result};

/// Run `program` with `args` and return its stdout.
///
/// The child is killed if it outlives `timeout`; its output is then
/// discarded and a [`ControlError::Timeout`] returned.
///
/// # Arguments
/// * `program` - Executable name or path
/// * `args` - Arguments passed verbatim (no shell)
/// * `timeout` - Upper bound on the whole run
///
/// # Errors
/// `Spawn` when the program cannot start, `CommandFailed` on a non-zero
/// exit status, `Timeout` on expiry.
pub async fn run_capture(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let command_line = describe(program, args);
    debug!(command = %command_line, "Running external command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ControlError::Spawn {
            command: command_line.clone(),
            source,
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ControlError::Spawn {
            command: command_line.clone(),
            source,
        })?,
        Err(_) => {
            return Err(ControlError::Timeout {
                operation: command_line,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
    };

    if !output.status.success() {
        return Err(ControlError::CommandFailed {
            command: command_line,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Render a command line for logs and error messages.
pub fn describe(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        if arg.contains(char::is_whitespace) {
            line.push('\'');
            line.push_str(arg);
            line.push('\'');
        } else {
            line.push_str(arg);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_quotes_spaced_args() {
        assert_eq!(
            describe("liquidctl", &["-m", "Corsair Commander", "status"]),
            "liquidctl -m 'Corsair Commander' status"
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = run_capture(
            "definitely-not-an-installed-program-xyz",
            &[],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ControlError::Spawn { .. }));
    }
}
