//! Running local tools (kind, kubectl)

use tokio::process::Command;
use tracing::trace;

use crate::{Error, Result};

/// Run `program` with `args` and return its stdout.
///
/// A non-zero exit fails with the captured stderr.
pub async fn run_command(program: &str, args: &[&str]) -> Result<String> {
    let command_line = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    trace!(command = %command_line, "running");

    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::command(&command_line, e.to_string()))?;

    if !output.status.success() {
        return Err(Error::command(
            &command_line,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| Error::command(&command_line, format!("output is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_a_command_error() {
        let err = run_command("definitely-not-a-real-binary-4f2a", &["version"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
        assert!(err
            .to_string()
            .starts_with("command `definitely-not-a-real-binary-4f2a version` failed"));
    }
}
