use std::{collections::HashMap, path::Path, process::Stdio, time::Duration};

use alyx_base::AlyxError;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
};
use tracing::{debug, warn};

use crate::{
    protocol::{FunctionRequest, FunctionResponse},
    runtime_table::RuntimeConfig,
};

/// Grace window between requesting termination and forcing a kill, mirrored
/// from the two-step subprocess shutdown pattern (terminate -> grace -> kill).
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Spawns one subprocess invocation of a function, writes the stdio request,
/// and parses the stdio response, enforcing `timeout` (§4.E). Large payloads
/// go over the piped stdin/stdout rather than being pre-buffered as a whole
/// command-line argument.
pub async fn invoke(
    entry: &Path,
    working_dir: &Path,
    runtime: &RuntimeConfig,
    env: &HashMap<String, String>,
    timeout: Duration,
    request: &FunctionRequest,
) -> Result<FunctionResponse, AlyxError> {
    let mut cmd = Command::new(&runtime.command);
    cmd.args(&runtime.args)
        .arg(entry)
        .current_dir(working_dir)
        .envs(std::env::vars())
        .envs(env.clone())
        .env("ALYX_URL", &request.context.alyx_url)
        .env("ALYX_INTERNAL_TOKEN", &request.context.internal_token)
        .env("ALYX_FUNCTION_NAME", &request.function_name)
        .env("ALYX_REQUEST_ID", &request.request_id)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            AlyxError::runtime_missing(format!("command `{}` not found on PATH", runtime.command))
        } else {
            AlyxError::spawn_error(format!("failed to spawn `{}`: {err}", runtime.command))
        }
    })?;

    let payload = serde_json::to_vec(request)
        .map_err(|err| AlyxError::internal(format!("failed to serialize function request: {err}")))?;
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(err) = stdin.write_all(&payload).await {
            warn!(%err, "failed writing function request to child stdin");
        }
        let _ = stdin.shutdown().await;
    }

    let mut stdout_pipe = child.stdout.take().expect("piped stdout");
    let mut stderr_pipe = child.stderr.take().expect("piped stderr");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let wait_result = tokio::time::timeout(timeout, child.wait()).await;
    let status = match wait_result {
        Ok(status) => status.map_err(|err| AlyxError::spawn_error(format!("failed to wait on child: {err}")))?,
        Err(_elapsed) => {
            terminate_with_grace(&mut child).await;
            return Err(AlyxError::timeout(format!(
                "function `{}` exceeded timeout of {:?}",
                request.function_name, timeout
            )));
        },
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    if !stderr.is_empty() {
        debug!(function = %request.function_name, stderr = %String::from_utf8_lossy(&stderr), "function stderr");
    }

    if !status.success() && stdout.is_empty() {
        return Err(AlyxError::function_error(format!(
            "function `{}` exited with status {status} and no output",
            request.function_name
        )));
    }

    let response: FunctionResponse = serde_json::from_slice(&stdout)
        .map_err(|err| AlyxError::invalid_json(format!("invalid function stdout JSON: {err}")))?;

    if response.request_id != request.request_id {
        return Err(AlyxError::invalid_json(format!(
            "function response request_id {} does not match request {}",
            response.request_id, request.request_id
        )));
    }

    if !response.success {
        let message = response
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "function reported failure".to_string());
        return Err(AlyxError::function_error(message).with_details(
            response.error.as_ref().and_then(|e| e.details.clone()).unwrap_or(serde_json::Value::Null),
        ));
    }

    Ok(response)
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
    use std::collections::HashMap;

    use super::*;
    use crate::protocol::ExecutionContext;

    fn request() -> FunctionRequest {
        FunctionRequest {
            request_id: "r1".to_string(),
            function_name: "echo".to_string(),
            input: serde_json::json!({"name": "World"}),
            context: ExecutionContext {
                auth: None,
                env: HashMap::new(),
                alyx_url: "http://x".to_string(),
                internal_token: "t".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn runtime_missing_for_unknown_command() {
        let runtime = RuntimeConfig { command: "definitely-not-a-real-binary-xyz".to_string(), args: vec![] };
        let tmp = tempfile::tempdir().unwrap();
        let err = invoke(
            &tmp.path().join("index.js"),
            tmp.path(),
            &runtime,
            &HashMap::new(),
            Duration::from_secs(1),
            &request(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, alyx_base::ErrorCode::RuntimeMissing);
    }

    #[tokio::test]
    async fn a_script_that_echoes_a_matching_response_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("echo.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat <<'EOF'\n{\"request_id\":\"r1\",\"success\":true,\"output\":{\"message\":\"Hello, World!\"}}\nEOF\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let runtime = RuntimeConfig { command: "sh".to_string(), args: vec![] };
        let response = invoke(&script, tmp.path(), &runtime, &HashMap::new(), Duration::from_secs(5), &request())
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.request_id, "r1");
    }

    #[tokio::test]
    async fn a_hanging_script_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("hang.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let runtime = RuntimeConfig { command: "sh".to_string(), args: vec![] };
        let err = invoke(
            &script,
            tmp.path(),
            &runtime,
            &HashMap::new(),
            Duration::from_millis(100),
            &request(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, alyx_base::ErrorCode::Timeout);
    }
}
