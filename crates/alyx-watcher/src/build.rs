use std::{path::Path, process::Stdio, time::Duration};

use alyx_base::AlyxError;
use alyx_functions::BuildStep;
use tokio::process::Command;

/// Grace window between requesting termination and forcing a kill, the same
/// two-step subprocess shutdown used for function invocations (§4.E, §9).
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Runs a function's `build.command` in its working directory, enforcing
/// `timeout` (§4.H: "runs the build command in the function directory with
/// timeout"). Build stdout/stderr are captured for diagnostics but not
/// returned; callers only need success/failure.
pub async fn run(build: &BuildStep, working_dir: &Path, timeout: Duration) -> Result<(), AlyxError> {
    let mut cmd = Command::new(&build.command);
    cmd.args(&build.args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            AlyxError::runtime_missing(format!("build command `{}` not found on PATH", build.command))
        } else {
            AlyxError::spawn_error(format!("failed to spawn build command `{}`: {err}", build.command))
        }
    })?;

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            status.map_err(|err| AlyxError::spawn_error(format!("failed to wait on build command: {err}")))?
        },
        Err(_elapsed) => {
            terminate_with_grace(&mut child).await;
            return Err(AlyxError::timeout(format!(
                "build command `{}` exceeded timeout of {timeout:?}",
                build.command
            )));
        },
    };

    if !status.success() {
        return Err(AlyxError::function_error(format!(
            "build command `{}` exited with status {status}",
            build.command
        )));
    }
    Ok(())
}

async fn terminate_with_grace(child: &mut tokio::process::Child) {
    let _ = child.start_kill();
    let grace = tokio::time::sleep(KILL_GRACE);
    tokio::select! {
        _ = child.wait() => {},
        _ = grace => {
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(command: &str, args: &[&str]) -> BuildStep {
        BuildStep {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            watch: vec![],
            output: None,
        }
    }

    #[tokio::test]
    async fn successful_build_returns_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let result = run(&step("true", &[]), tmp.path(), Duration::from_secs(5)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_function_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run(&step("false", &[]), tmp.path(), Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.code, alyx_base::ErrorCode::FunctionError);
    }

    #[tokio::test]
    async fn missing_command_is_runtime_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run(&step("definitely-not-a-real-binary-xyz", &[]), tmp.path(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.code, alyx_base::ErrorCode::RuntimeMissing);
    }

    #[tokio::test]
    async fn hanging_build_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run(&step("sleep", &["30"]), tmp.path(), Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err.code, alyx_base::ErrorCode::Timeout);
    }
}
