// Generic axum handlers driven through a Router with tower's oneshot
// Checks the envelope and error body shapes on the wire

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{setup_test_app, setup_test_state};

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| {
            panic!("Response body is not JSON: {}", String::from_utf8_lossy(&body))
        })
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn with_json(method: &str, uri: &str, payload: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

/// Percent-encode a filter for the query string
fn filter_param(filter: &Value) -> String {
    filter
        .to_string()
        .replace('{', "%7B")
        .replace('}', "%7D")
        .replace('"', "%22")
        .replace(':', "%3A")
        .replace(',', "%2C")
        .replace('[', "%5B")
        .replace(']', "%5D")
        .replace(' ', "%20")
}

#[tokio::test]
async fn test_find_handler_envelope() {
    let app = setup_test_app(setup_test_state().await);

    let uri = format!(
        "/api/v1/products?filter={}&relations=category&take=1",
        filter_param(&json!({"category": 3}))
    );
    let (status, body) = send(&app, get(&uri)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["cookie"], false);
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
    assert_eq!(body["results"][0]["title"], "Pen");
    assert_eq!(body["results"][0]["category"]["name"], "Office");
    // One row returned, so no meta even though more rows match
    assert!(body.get("meta").is_none());
}

#[tokio::test]
async fn test_find_handler_not_found_body() {
    let app = setup_test_app(setup_test_state().await);

    let uri = format!(
        "/api/v1/products?filter={}",
        filter_param(&json!({"title": "Nope"}))
    );
    let (status, body) = send(&app, get(&uri)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body,
        json!({"code": 404, "message": "Product not found.", "status": "Failed"})
    );
}

#[tokio::test]
async fn test_find_handler_invalid_filter() {
    let app = setup_test_app(setup_test_state().await);

    let (status, body) = send(&app, get("/api/v1/products?filter=notjson")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
    assert_eq!(body["status"], "Failed");
}

#[tokio::test]
async fn test_get_all_handler_meta() {
    let app = setup_test_app(setup_test_state().await);

    let (status, body) = send(&app, get("/api/v1/products/all?page=3&take=2")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    assert_eq!(
        body["meta"],
        json!({
            "currentPage": 3,
            "totalPages": 3,
            "totalRecords": 6,
            "nextPage": null,
            "take": 2
        })
    );
}

#[tokio::test]
async fn test_create_update_delete_handlers() {
    let app = setup_test_app(setup_test_state().await);

    let (status, body) = send(
        &app,
        with_json("POST", "/api/v1/products", &json!({"title": "Lamp", "price": 40, "category": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["toast"], "Product was created Successfully.");
    let id = body["results"]["id"].as_i64().unwrap();
    assert_eq!(body["results"]["category_id"], 3);

    let (status, body) = send(
        &app,
        with_json("PUT", &format!("/api/v1/products/{id}"), &json!({"price": 35})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["price"], 35);
    assert_eq!(body["description"], "Product updated Successfully.");

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/products/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["title"], "Lamp");

    let (status, _) = send(
        &app,
        with_json("PUT", &format!("/api/v1/products/{id}"), &json!({"price": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_all_handler() {
    let app = setup_test_app(setup_test_state().await);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!(
            "/api/v1/products?filter={}",
            filter_param(&json!({"category": [1, 2]}))
        ))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], json!([]));

    let (_, body) = send(&app, get("/api/v1/products/all")).await;
    assert_eq!(body["meta"]["totalRecords"], 3);
}

#[tokio::test]
async fn test_peek_handler() {
    let app = setup_test_app(setup_test_state().await);

    let uri = format!(
        "/api/v1/products/peek?filter={}",
        filter_param(&json!({"category": {"id": [2, 999]}}))
    );
    let (status, body) = send(&app, get(&uri)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isPeekSuccess"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["objectData"]["category"][0]["name"], "Garden");
}

#[tokio::test]
async fn test_duplicate_user_email() {
    let app = setup_test_app(setup_test_state().await);
    let payload = json!({"email": "dup@example.com", "password": "pw-123456"});

    let (status, body) = send(&app, with_json("POST", "/api/v1/users", &payload)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(body["results"]["password"], "pw-123456");

    let (status, body) = send(&app, with_json("POST", "/api/v1/users", &payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email already exists.");
}

#[tokio::test]
async fn test_extractor_rejections_use_error_body() {
    let app = setup_test_app(setup_test_state().await);

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/products")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
    assert_eq!(body["status"], "Failed");
    assert!(body["message"].as_str().unwrap().contains("JSON"));

    let (status, body) = send(&app, get("/api/v1/products?page=abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
    assert_eq!(body["status"], "Failed");
    assert!(body["message"].as_str().unwrap().contains("page"));
}

#[tokio::test]
async fn test_delete_all_handler_requires_filter() {
    let app = setup_test_app(setup_test_state().await);

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/v1/products")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "Failed");

    let (_, body) = send(&app, get("/api/v1/products/all")).await;
    assert_eq!(body["meta"]["totalRecords"], 6);
}
