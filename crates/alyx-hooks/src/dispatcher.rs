use std::{sync::Arc, time::Duration};

use alyx_base::AlyxError;
use alyx_events::{Event, EventBus, EventHandler};
use alyx_functions::{FunctionRuntime, InvokeArgs};
use alyx_metrics::{StatusTimer, HOOK_INVOCATIONS_TOTAL, HOOK_INVOCATION_DURATION_SECONDS};
use async_trait::async_trait;
use serde_json::{json, Value as Json};
use tracing::warn;

use crate::{
    registry::HookRegistry,
    signing::sign,
    types::{DeadLetterPayload, Hook, HookMode, HookTarget, OnFailure},
};

const MAX_BACKOFF_SECS: i64 = 60;
const DEAD_LETTER_TYPE: &str = "custom";
const DEAD_LETTER_SOURCE: &str = "dead_letter";

/// Invokes hook targets and enforces the retry/dead-letter policy (§4.F). One
/// `HookDispatcher` backs both the synchronous inline path (`publish`) and
/// the asynchronous `EventHandler` registered on the bus for `async` hooks.
pub struct HookDispatcher {
    registry: Arc<HookRegistry>,
    bus: Arc<EventBus>,
    functions: Arc<FunctionRuntime>,
    http: reqwest::Client,
}

struct DispatchError {
    message: String,
    retryable: bool,
}

impl HookDispatcher {
    pub fn new(registry: Arc<HookRegistry>, bus: Arc<EventBus>, functions: Arc<FunctionRuntime>) -> Arc<Self> {
        Arc::new(Self { registry, bus, functions, http: reqwest::Client::new() })
    }

    /// Subscribes this dispatcher once per distinct event type present among
    /// `async` hooks, at the broadest wildcard key so the bus invokes it
    /// exactly once per matching event; the dispatcher then does its own
    /// full scan over declared hooks (§4.F "installs Event Bus subscribers
    /// for each configured hook").
    pub fn install(self: &Arc<Self>) {
        for event_type in self.registry.event_types() {
            self.bus.subscribe(&event_type, "*", "*", self.clone() as Arc<dyn EventHandler>);
        }
    }

    /// Entry point for publishing a domain event through the hook pipeline:
    /// `sync` hooks run inline, blocking up to their timeout, before the
    /// event is durably published (which also triggers `async` hook
    /// delivery via the installed subscription, §4.F).
    pub async fn publish(
        &self,
        event_type: &str,
        source: &str,
        action: &str,
        payload: Json,
        metadata: Json,
    ) -> anyhow::Result<String> {
        let pseudo = Event {
            id: String::new(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            action: action.to_string(),
            payload: payload.clone(),
            metadata: metadata.clone(),
            status: alyx_events::Status::Pending,
            created_at: alyx_base::now(),
            process_at: None,
            processed_at: None,
        };
        for hook in self.registry.matching(event_type, source, action, HookMode::Sync) {
            self.run_with_policy(&hook, &pseudo).await;
        }
        self.bus.publish(event_type, source, action, payload, metadata).await
    }

    async fn run_with_policy(&self, hook: &Hook, event: &Event) {
        let timer = StatusTimer::new(&HOOK_INVOCATION_DURATION_SECONDS, &[hook.id.as_str()]);
        let mut attempt = 0u32;
        loop {
            let result = tokio::time::timeout(hook.timeout, self.invoke_target(hook, event)).await;
            let outcome = match result {
                Ok(Ok(())) => {
                    HOOK_INVOCATIONS_TOTAL.with_label_values(&[hook.id.as_str(), "success"]).inc();
                    timer.finish("ok");
                    return;
                },
                Ok(Err(err)) => err,
                Err(_elapsed) => DispatchError { message: format!("hook `{}` exceeded timeout {:?}", hook.id, hook.timeout), retryable: true },
            };

            match hook.on_failure {
                OnFailure::Ignore => {
                    warn!(hook_id = %hook.id, error = %outcome.message, "ignoring failed hook delivery");
                    HOOK_INVOCATIONS_TOTAL.with_label_values(&[hook.id.as_str(), "ignored"]).inc();
                    timer.finish("ignored");
                    return;
                },
                OnFailure::DeadLetter => {
                    self.dead_letter(hook, event, &outcome.message).await;
                    HOOK_INVOCATIONS_TOTAL.with_label_values(&[hook.id.as_str(), "dead_letter"]).inc();
                    timer.finish("dead_letter");
                    return;
                },
                OnFailure::Retry => {
                    if !outcome.retryable || attempt >= hook.max_retries {
                        warn!(hook_id = %hook.id, attempt, error = %outcome.message, "hook delivery exhausted retries");
                        HOOK_INVOCATIONS_TOTAL.with_label_values(&[hook.id.as_str(), "failed"]).inc();
                        timer.finish("failed");
                        return;
                    }
                    let delay = Duration::from_secs(
                        2i64.saturating_pow(attempt + 1).min(MAX_BACKOFF_SECS) as u64
                    );
                    attempt += 1;
                    warn!(hook_id = %hook.id, attempt, delay_secs = delay.as_secs(), error = %outcome.message, "retrying hook delivery");
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    async fn dead_letter(&self, hook: &Hook, event: &Event, error: &str) {
        let payload = DeadLetterPayload {
            hook_id: hook.id.clone(),
            original_event_type: event.event_type.clone(),
            original_source: event.source.clone(),
            original_action: event.action.clone(),
            original_payload: event.payload.clone(),
            error: error.to_string(),
        };
        let payload_json = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(err) => {
                warn!(hook_id = %hook.id, %err, "failed to serialize dead letter payload");
                return;
            },
        };
        if let Err(err) = self
            .bus
            .publish(DEAD_LETTER_TYPE, DEAD_LETTER_SOURCE, &event.event_type, payload_json, json!({}))
            .await
        {
            warn!(hook_id = %hook.id, %err, "failed to publish dead letter event");
        }
    }

    async fn invoke_target(&self, hook: &Hook, event: &Event) -> Result<(), DispatchError> {
        match &hook.target {
            HookTarget::Function { name } => self.invoke_function(name, event).await,
            HookTarget::Webhook { url, secret, algo } => self.invoke_webhook(url, secret.as_deref(), *algo, event).await,
        }
    }

    async fn invoke_function(&self, name: &str, event: &Event) -> Result<(), DispatchError> {
        let input = json!({
            "event_id": event.id,
            "event_type": event.event_type,
            "source": event.source,
            "action": event.action,
            "payload": event.payload,
            "metadata": event.metadata,
        });
        self.functions
            .invoke(name, input, InvokeArgs { auth: None, env: Default::default(), internal_token: "hook-dispatch" })
            .await
            .map(|_| ())
            .map_err(|err: AlyxError| DispatchError { retryable: err.code.is_retryable(), message: err.msg.to_string() })
    }

    async fn invoke_webhook(
        &self,
        url: &str,
        secret: Option<&str>,
        algo: crate::types::SignatureAlgo,
        event: &Event,
    ) -> Result<(), DispatchError> {
        let body = json!({
            "id": event.id,
            "type": event.event_type,
            "source": event.source,
            "action": event.action,
            "payload": event.payload,
            "metadata": event.metadata,
            "created_at": alyx_base::to_rfc3339(event.created_at),
        });
        let bytes = serde_json::to_vec(&body)
            .map_err(|err| DispatchError { message: format!("failed to serialize webhook body: {err}"), retryable: false })?;

        let mut request = self.http.post(url).header("Content-Type", "application/json").header("Idempotency-Key", &event.id);
        if let Some(secret) = secret {
            request = request.header("X-Alyx-Signature", sign(secret, algo, &bytes));
        }

        let response = request
            .body(bytes)
            .send()
            .await
            .map_err(|err| DispatchError { message: format!("webhook request failed: {err}"), retryable: true })?;

        if !response.status().is_success() {
            return Err(DispatchError {
                message: format!("webhook returned status {}", response.status()),
                retryable: true,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for HookDispatcher {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let hooks = self.registry.matching(&event.event_type, &event.source, &event.action, HookMode::Async);
        for hook in hooks {
            self.run_with_policy(&hook, event).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use alyx_events::EventsConfig;
    use alyx_functions::{FunctionRecord, FunctionRegistry, RuntimeConfig, RuntimeTable};
    use alyx_storage::Gateway;

    use super::*;

    fn script_function(name: &str, body: &str, marker_dir: &std::path::Path) -> Arc<FunctionRuntime> {
        let script = marker_dir.join("run.sh");
        std::fs::write(&script, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let registry = FunctionRegistry::new();
        registry.swap_one(FunctionRecord {
            name: name.to_string(),
            runtime_tag: "shell".to_string(),
            entry: script,
            working_dir: marker_dir.to_path_buf(),
            env: HashMap::new(),
            timeout: Duration::from_secs(5),
            memory_hint: None,
            build: None,
            input_schema: None,
            enabled: true,
        });
        let mut overrides = HashMap::new();
        overrides.insert("shell".to_string(), RuntimeConfig { command: "sh".to_string(), args: vec![] });
        Arc::new(FunctionRuntime::new(registry, RuntimeTable::with_overrides(overrides), 4, 4, 4, 4, "http://x".to_string()))
    }

    fn success_hook(id: &str, name: &str, mode: HookMode) -> Hook {
        Hook {
            id: id.to_string(),
            event_type: "http".to_string(),
            source: "*".to_string(),
            action: "*".to_string(),
            target: HookTarget::Function { name: name.to_string() },
            mode,
            priority: 0,
            on_failure: OnFailure::Ignore,
            max_retries: 0,
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn sync_hook_runs_inline_before_publish_returns() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("ran");
        let functions = script_function(
            "f",
            &format!("#!/bin/sh\nread line\ntouch {}\necho '{{\"request_id\":\"x\",\"success\":true}}'\n", marker.display()),
            tmp.path(),
        );
        let gateway = Gateway::open_in_memory().unwrap();
        let bus = EventBus::new(gateway, EventsConfig::default()).await.unwrap();
        let registry = HookRegistry::new();
        registry.install(vec![success_hook("sync1", "f", HookMode::Sync)]);
        let dispatcher = HookDispatcher::new(registry, bus, functions);

        dispatcher.publish("http", "users", "create", json!({}), json!({})).await.unwrap();
        assert!(marker.exists(), "sync hook should have run before publish returned");
    }

    #[tokio::test]
    async fn dead_letter_policy_republishes_event_on_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let functions = script_function("f", "#!/bin/sh\nexit 1\n", tmp.path());
        let gateway = Gateway::open_in_memory().unwrap();
        let bus = EventBus::new(gateway, EventsConfig::default()).await.unwrap();
        let registry = HookRegistry::new();
        let mut hook = success_hook("dl1", "f", HookMode::Sync);
        hook.on_failure = OnFailure::DeadLetter;
        registry.install(vec![hook]);
        let dispatcher = HookDispatcher::new(registry, bus.clone(), functions);

        dispatcher.publish("http", "users", "create", json!({}), json!({})).await.unwrap();
        let dead_letters = bus.events_for_source("dead_letter", 10).await.unwrap();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].action, "http");
    }

    #[tokio::test]
    async fn ignore_policy_swallows_failure_without_dead_letter() {
        let tmp = tempfile::tempdir().unwrap();
        let functions = script_function("f", "#!/bin/sh\nexit 1\n", tmp.path());
        let gateway = Gateway::open_in_memory().unwrap();
        let bus = EventBus::new(gateway, EventsConfig::default()).await.unwrap();
        let registry = HookRegistry::new();
        registry.install(vec![success_hook("ig1", "f", HookMode::Sync)]);
        let dispatcher = HookDispatcher::new(registry, bus.clone(), functions);

        dispatcher.publish("http", "users", "create", json!({}), json!({})).await.unwrap();
        assert!(bus.events_for_source("dead_letter", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn async_hook_is_invoked_via_bus_dispatch() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("ran");
        let functions = script_function(
            "f",
            &format!("#!/bin/sh\nread line\ntouch {}\necho '{{\"request_id\":\"x\",\"success\":true}}'\n", marker.display()),
            tmp.path(),
        );
        let gateway = Gateway::open_in_memory().unwrap();
        let fast_config = EventsConfig { process_interval: Duration::from_millis(20), ..EventsConfig::default() };
        let bus = EventBus::new(gateway, fast_config).await.unwrap();
        let registry = HookRegistry::new();
        registry.install(vec![success_hook("async1", "f", HookMode::Async)]);
        let dispatcher = HookDispatcher::new(registry, bus.clone(), functions);
        dispatcher.install();

        dispatcher.publish("http", "users", "create", json!({}), json!({})).await.unwrap();
        assert!(!marker.exists(), "async hook must not run inline");

        let loops = bus.clone().spawn_loops();
        tokio::time::sleep(Duration::from_millis(300)).await;
        for handle in loops {
            handle.abort();
        }
        assert!(marker.exists(), "async hook should run once dispatched");
    }
}
