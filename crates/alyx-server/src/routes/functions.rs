use std::collections::HashMap;

use alyx_base::{opaque_token, AlyxError};
use alyx_functions::InvokeArgs;
use axum::{
    extract::{FromRequest, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Map, Value as Json_};

use crate::{error::ApiResult, state::AppState};

/// `GET /api/functions` -> list (§6). Summarizes the registry rather than
/// serializing `FunctionRecord` directly, since the record carries
/// filesystem paths that are an implementation detail, not API surface.
pub async fn list(State(state): State<AppState>) -> Json<Json_> {
    let functions: Vec<Json_> = state
        .function_registry
        .list()
        .into_iter()
        .map(|record| {
            json!({
                "name": record.name,
                "runtime": record.runtime_tag,
                "enabled": record.enabled,
                "timeout_secs": record.timeout.as_secs(),
            })
        })
        .collect();
    Json(json!({"functions": functions}))
}

/// Collects a multipart request into a single JSON object: text fields
/// become string values; file fields become `{filename, content_type,
/// size}` metadata, since persisting the bytes is storage-bucket I/O (an
/// external collaborator per §1 Non-goals) rather than this endpoint's job.
async fn multipart_to_json(mut multipart: Multipart) -> ApiResult<Json_> {
    let mut object = Map::new();
    while let Some(field) = multipart.next_field().await.map_err(|err| AlyxError::validation(err.to_string()))? {
        let Some(name) = field.name().map(str::to_string) else { continue };
        if let Some(filename) = field.file_name().map(str::to_string) {
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(|err| AlyxError::validation(err.to_string()))?;
            object.insert(
                name,
                json!({"filename": filename, "content_type": content_type, "size": bytes.len()}),
            );
        } else {
            let text = field.text().await.map_err(|err| AlyxError::validation(err.to_string()))?;
            object.insert(name, Json_::String(text));
        }
    }
    Ok(Json_::Object(object))
}

/// `POST /api/functions/{name}` -> invoke (§4.E, §6). Accepts either a JSON
/// body or `multipart/form-data` for file inputs.
pub async fn invoke(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<Json_>)> {
    let content_type = headers.get(axum::http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");

    let input = if content_type.starts_with("multipart/form-data") {
        let request = axum::extract::Request::new(axum::body::Body::from(body));
        let request = request_with_content_type(request, content_type);
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|err| AlyxError::validation(err.to_string()))?;
        multipart_to_json(multipart).await?
    } else {
        serde_json::from_slice(&body).map_err(|err| AlyxError::invalid_json(err.to_string()))?
    };

    let internal_token = opaque_token();
    let response = state
        .functions
        .invoke(&name, input, InvokeArgs { auth: None, env: HashMap::new(), internal_token: &internal_token })
        .await?;

    let status = if response.success { StatusCode::OK } else { StatusCode::UNPROCESSABLE_ENTITY };
    Ok((status, Json(serde_json::to_value(&response)?)))
}

fn request_with_content_type(mut request: axum::extract::Request, content_type: &str) -> axum::extract::Request {
    request.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_str(content_type).expect("content-type already validated as a header value"),
    );
    request
}
