use std::{collections::HashMap, sync::Arc};

use alyx_base::{opaque_token, AlyxError};
use alyx_metrics::{FUNCTION_INVOCATIONS_TOTAL, FUNCTION_INVOCATION_DURATION_SECONDS};
use jsonschema::Validator;
use serde_json::Value as Json;
use tracing::instrument;

use crate::{
    concurrency::BoundedConcurrency,
    process,
    protocol::{ExecutionContext, FunctionRequest, FunctionResponse},
    registry::FunctionRegistry,
    runtime_table::RuntimeTable,
};

/// Function Registry & Runtime (§4.E): resolves a function by name, validates
/// its input against an optional JSON Schema, enforces concurrency caps, and
/// spawns the language-appropriate subprocess.
pub struct FunctionRuntime {
    registry: Arc<FunctionRegistry>,
    runtime_table: RuntimeTable,
    global: Arc<BoundedConcurrency>,
    per_function_limit: usize,
    per_function_queue: usize,
    per_function: parking_lot::RwLock<HashMap<String, Arc<BoundedConcurrency>>>,
    alyx_url: String,
}

pub struct InvokeArgs<'a> {
    pub auth: Option<Json>,
    pub env: HashMap<String, String>,
    pub internal_token: &'a str,
}

impl FunctionRuntime {
    pub fn new(
        registry: Arc<FunctionRegistry>,
        runtime_table: RuntimeTable,
        global_concurrency: usize,
        global_queue: usize,
        per_function_limit: usize,
        per_function_queue: usize,
        alyx_url: String,
    ) -> Self {
        Self {
            registry,
            runtime_table,
            global: Arc::new(BoundedConcurrency::new(global_concurrency, global_queue)),
            per_function_limit,
            per_function_queue,
            per_function: parking_lot::RwLock::new(HashMap::new()),
            alyx_url,
        }
    }

    fn per_function_gate(&self, name: &str) -> Arc<BoundedConcurrency> {
        if let Some(existing) = self.per_function.read().get(name) {
            return existing.clone();
        }
        let mut write = self.per_function.write();
        write
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(BoundedConcurrency::new(self.per_function_limit, self.per_function_queue)))
            .clone()
    }

    #[instrument(skip(self, input, args))]
    pub async fn invoke(&self, name: &str, input: Json, args: InvokeArgs<'_>) -> Result<FunctionResponse, AlyxError> {
        let record = self.registry.get(name).ok_or_else(|| AlyxError::not_found(format!("no function `{name}`")))?;
        if !record.enabled {
            return Err(AlyxError::not_found(format!("function `{name}` is disabled")));
        }

        if let Some(schema) = &record.input_schema {
            let validator = Validator::new(schema)
                .map_err(|err| AlyxError::internal(format!("invalid input_schema for `{name}`: {err}")))?;
            if let Err(first_error) = validator.validate(&input) {
                return Err(AlyxError::validation(format!("input rejected by schema: {first_error}")));
            }
        }

        let global_permit = self.global.acquire().await?;
        let function_gate = self.per_function_gate(name);
        let function_permit = function_gate.acquire().await?;

        let runtime_config = self
            .runtime_table
            .resolve(&record.runtime_tag)
            .ok_or_else(|| AlyxError::runtime_missing(format!("no runtime configured for tag `{}`", record.runtime_tag)))?;

        let request = FunctionRequest {
            request_id: opaque_token(),
            function_name: name.to_string(),
            input,
            context: ExecutionContext {
                auth: args.auth,
                env: args.env,
                alyx_url: self.alyx_url.clone(),
                internal_token: args.internal_token.to_string(),
            },
        };

        let timer = alyx_metrics::StatusTimer::new(&FUNCTION_INVOCATION_DURATION_SECONDS, &[name]);
        let result =
            process::invoke(&record.entry, &record.working_dir, &runtime_config, &record.env, record.timeout, &request)
                .await;
        drop(function_permit);
        drop(global_permit);

        let outcome_owned;
        let outcome: &str = match &result {
            Ok(_) => "success",
            Err(err) => {
                outcome_owned = err.to_wire().code;
                &outcome_owned
            },
        };
        FUNCTION_INVOCATIONS_TOTAL.with_label_values(&[name, outcome]).inc();
        timer.finish(if result.is_ok() { "ok" } else { "error" });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{discovery::FunctionRecord, runtime_table::RuntimeConfig};
    use std::collections::HashMap as Map;

    fn script_runtime(record_name: &str, script_body: &str) -> (tempfile::TempDir, FunctionRuntime) {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("run.sh");
        std::fs::write(&script, script_body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let registry = FunctionRegistry::new();
        registry.swap_one(FunctionRecord {
            name: record_name.to_string(),
            runtime_tag: "shell".to_string(),
            entry: script,
            working_dir: tmp.path().to_path_buf(),
            env: Map::new(),
            timeout: std::time::Duration::from_secs(5),
            memory_hint: None,
            build: None,
            input_schema: None,
            enabled: true,
        });

        let mut overrides = Map::new();
        overrides.insert("shell".to_string(), RuntimeConfig { command: "sh".to_string(), args: vec![] });
        let runtime_table = RuntimeTable::with_overrides(overrides);
        let runtime = FunctionRuntime::new(registry, runtime_table, 4, 4, 4, 4, "http://x".to_string());
        (tmp, runtime)
    }

    #[tokio::test]
    async fn invoking_unknown_function_is_not_found() {
        let (_tmp, runtime) = script_runtime("hello", "#!/bin/sh\ncat\n");
        let err = runtime
            .invoke("missing", serde_json::json!({}), InvokeArgs { auth: None, env: Map::new(), internal_token: "t" })
            .await
            .unwrap_err();
        assert_eq!(err.code, alyx_base::ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn successful_invocation_returns_output() {
        let (_tmp, runtime) = script_runtime(
            "hello",
            "#!/bin/sh\nread line\nrid=$(echo \"$line\" | sed -n 's/.*\"request_id\":\"\\([^\"]*\\)\".*/\\1/p')\necho \"{\\\"request_id\\\":\\\"$rid\\\",\\\"success\\\":true,\\\"output\\\":{\\\"ok\\\":true}}\"\n",
        );
        let response = runtime
            .invoke("hello", serde_json::json!({}), InvokeArgs { auth: None, env: Map::new(), internal_token: "t" })
            .await
            .unwrap();
        assert!(response.success);
    }
}
