mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_get_update_delete_round_trip() {
    let app = common::build_app().await;
    let router = app.router();

    let create_req = Request::builder()
        .method("POST")
        .uri("/api/collections/widgets")
        .header("content-type", "application/json")
        .body(Body::from(json!({"name": "sprocket", "qty": 3}).to_string()))
        .unwrap();
    let response = router.clone().oneshot(create_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["name"], "sprocket");

    let get_req = Request::builder().uri(format!("/api/collections/widgets/{id}")).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(get_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["qty"], 3);

    let update_req = Request::builder()
        .method("PATCH")
        .uri(format!("/api/collections/widgets/{id}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({"qty": 5}).to_string()))
        .unwrap();
    let response = router.clone().oneshot(update_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["qty"], 5);
    assert_eq!(updated["name"], "sprocket");

    let list_req = Request::builder().uri("/api/collections/widgets").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(list_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["docs"].as_array().unwrap().len(), 1);

    let delete_req =
        Request::builder().method("DELETE").uri(format!("/api/collections/widgets/{id}")).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(delete_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let get_again = Request::builder().uri(format!("/api/collections/widgets/{id}")).body(Body::empty()).unwrap();
    let response = router.oneshot(get_again).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn filter_query_narrows_the_list() {
    let app = common::build_app().await;
    let router = app.router();

    for (name, tag) in [("a", "x"), ("b", "y"), ("c", "x")] {
        let req = Request::builder()
            .method("POST")
            .uri("/api/collections/items")
            .header("content-type", "application/json")
            .body(Body::from(json!({"name": name, "tag": tag}).to_string()))
            .unwrap();
        let response = router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let filter = json!([{ "field": "tag", "op": "eq", "value": "x" }]).to_string();
    let uri = format!("/api/collections/items?filter={}", urlencoding_encode(&filter));
    let response = router.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    assert_eq!(page["total"], 2);
}

/// Minimal percent-encoding for the one query value these tests send;
/// avoids pulling in a dedicated crate for a single call site.
fn urlencoding_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[tokio::test]
async fn getting_a_missing_document_is_not_found() {
    let app = common::build_app().await;
    let router = app.router();
    let response = router
        .oneshot(Request::builder().uri("/api/collections/widgets/does-not-exist").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
