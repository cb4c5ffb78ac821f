use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// The bit-exact JSON request written to a function child's stdin (§6).
#[derive(Debug, Clone, Serialize)]
pub struct FunctionRequest {
    pub request_id: String,
    pub function_name: String,
    pub input: Json,
    pub context: ExecutionContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub auth: Option<Json>,
    pub env: HashMap<String, String>,
    pub alyx_url: String,
    pub internal_token: String,
}

/// The bit-exact JSON response read from a function child's stdout (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub output: Option<Json>,
    #[serde(default)]
    pub error: Option<FunctionErrorBody>,
    #[serde(default)]
    pub logs: Option<Vec<LogLine>>,
    #[serde(default)]
    pub duration_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<Json>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub data: Option<Json>,
    pub timestamp: String,
}
