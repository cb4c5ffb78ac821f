use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Where a matched event is delivered (§4.F/§3 Subscription).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HookTarget {
    Function { name: String },
    Webhook { url: String, secret: Option<String>, algo: SignatureAlgo },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgo {
    Sha256,
    Sha1,
}

impl Default for SignatureAlgo {
    fn default() -> Self {
        SignatureAlgo::Sha256
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HookMode {
    Sync,
    Async,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Ignore,
    Retry,
    DeadLetter,
}

/// A declared subscription binding an event pattern to a target (§3
/// Subscription, §4.F). `source`/`action` may be the wildcard `"*"`.
/// Immutable once installed; identity is `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    pub id: String,
    pub event_type: String,
    pub source: String,
    pub action: String,
    pub target: HookTarget,
    pub mode: HookMode,
    pub priority: i32,
    pub on_failure: OnFailure,
    pub max_retries: u32,
    pub timeout: std::time::Duration,
}

/// A dead-letter event's payload: the original event plus why delivery to
/// `hook_id` failed.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterPayload {
    pub hook_id: String,
    pub original_event_type: String,
    pub original_source: String,
    pub original_action: String,
    pub original_payload: Json,
    pub error: String,
}
