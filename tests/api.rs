//! API endpoint integration tests

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use avatar_voice_gateway::api::ApiServer;
use tower::ServiceExt;

mod common;
use common::{Display, FakeSynthesizer, Harness, ScriptedTokens, harness};

/// Build a test API router
fn build_test_router(h: &Harness) -> axum::Router {
    ApiServer::new(h.pipeline.clone(), 0).router()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness(ScriptedTokens::tokens(&[]), FakeSynthesizer::new());
    let _display = Display::connect(&h.router).await;
    let app = build_test_router(&h);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["clients"], 1);
}

#[tokio::test]
async fn test_cached_audio_is_served() {
    let h = harness(ScriptedTokens::tokens(&[]), FakeSynthesizer::new());
    let cached = h.pipeline.synthesis().cache().store(b"ID3 audio").await.unwrap();
    let app = build_test_router(&h);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/audio/{}", cached.name))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"ID3 audio");
}

#[tokio::test]
async fn test_audio_allows_any_origin() {
    let h = harness(ScriptedTokens::tokens(&[]), FakeSynthesizer::new());
    let cached = h.pipeline.synthesis().cache().store(b"ID3").await.unwrap();
    let app = build_test_router(&h);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/audio/{}", cached.name))
                .header(header::ORIGIN, "http://renderer.local")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn test_missing_audio_is_not_found() {
    let h = harness(ScriptedTokens::tokens(&[]), FakeSynthesizer::new());
    let app = build_test_router(&h);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/audio/0123456789abcdef.mp3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_audio_rejects_traversal() {
    let h = harness(ScriptedTokens::tokens(&[]), FakeSynthesizer::new());
    let app = build_test_router(&h);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/audio/..%2Fsecret.mp3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_devices_endpoint() {
    let h = harness(ScriptedTokens::tokens(&[]), FakeSynthesizer::new());
    let _tablet = Display::register(&h.router, "tablet", true).await;
    let _anonymous = Display::connect(&h.router).await;
    let app = build_test_router(&h);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/devices")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["clients"], 2);
    let devices = json["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["device_id"], "tablet");
    assert_eq!(devices[0]["streaming_mode"], true);
}

#[tokio::test]
async fn test_speak_endpoint() {
    let h = harness(
        ScriptedTokens::tokens(&["It's sunny.", " Enjoy the day!"]),
        FakeSynthesizer::new(),
    );
    let mut display = Display::connect(&h.router).await;
    let app = build_test_router(&h);

    let body = serde_json::json!({
        "messages": [{"role": "user", "content": "How's the weather?"}],
        "session_key": "abc",
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/speak")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["text"], "It's sunny. Enjoy the day!");
    assert_eq!(json["strategy"], "two_phase");
    assert_eq!(json["ack_sent"], false);
    assert_eq!(json["suppressed"], false);
    assert!(
        json["audio_url"]
            .as_str()
            .unwrap()
            .starts_with("http://test.local/audio/")
    );

    assert_eq!(display.drain().len(), 1);
}

#[tokio::test]
async fn test_speak_requires_messages() {
    let h = harness(ScriptedTokens::tokens(&[]), FakeSynthesizer::new());
    let app = build_test_router(&h);

    let body = serde_json::json!({ "messages": [], "session_key": "abc" });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/speak")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "bad_request");
}
