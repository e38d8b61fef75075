//! End-to-end tests for the simguide request pipeline.
//!
//! A fake OpenAI-compatible upstream runs on a local port. Requests go
//! through the real gateway router, coordinator, retrying client and HTTP
//! client, so status classification and retry behaviour are exercised on
//! the wire.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use simguide_config::AppConfig;
use tower::ServiceExt;

// ── Fake upstream ────────────────────────────────────────────────────────

/// Scripted `(status, headers, body)` replies; once exhausted it answers
/// 200 with "reply N".
#[derive(Default)]
struct Upstream {
    script: Mutex<VecDeque<(u16, Vec<(&'static str, &'static str)>, Value)>>,
    requests: Mutex<Vec<Value>>,
}

impl Upstream {
    fn scripted(replies: Vec<(u16, Vec<(&'static str, &'static str)>, Value)>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> Value {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

fn completion(text: &str) -> Value {
    json!({
        "model": "fake-model",
        "choices": [{"message": {"role": "assistant", "content": text}}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

async fn completions(State(upstream): State<Arc<Upstream>>, Json(body): Json<Value>) -> Response {
    let n = {
        let mut requests = upstream.requests.lock().unwrap();
        requests.push(body);
        requests.len()
    };

    let next = upstream.script.lock().unwrap().pop_front();
    let (status, headers, body) =
        next.unwrap_or_else(|| (200, Vec::new(), completion(&format!("reply {n}"))));

    let mut response = (StatusCode::from_u16(status).unwrap(), Json(body)).into_response();
    for (name, value) in headers {
        response
            .headers_mut()
            .insert(name, value.parse().unwrap());
    }
    response
}

/// Serve the fake upstream and return a config pointing at it.
async fn spawn_upstream(upstream: Arc<Upstream>) -> AppConfig {
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(upstream);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut config = AppConfig {
        api_key: Some("sk-test".into()),
        api_url: Some(format!("http://{addr}/v1")),
        ..AppConfig::default()
    };
    config.upstream.retry_base_delay_ms = 1;
    config.upstream.timeout_secs = 5;
    config.cache.sweep_interval_secs = 0;
    config
}

// ── Gateway helpers ──────────────────────────────────────────────────────

async fn gateway(upstream: Arc<Upstream>) -> Router {
    let config = spawn_upstream(upstream).await;
    let client = simguide_providers::build_from_config(&config).unwrap();
    let state = simguide_gateway::build_state(&config, client);
    simguide_gateway::build_router(state, &config.gateway)
}

async fn post_chat(app: &Router, body: Value) -> (StatusCode, Option<String>, Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, retry_after, serde_json::from_slice(&bytes).unwrap())
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_answer_is_cached_across_phrasings() {
    let upstream = Arc::new(Upstream::default());
    let app = gateway(upstream.clone()).await;

    let (status, _, first) = post_chat(&app, json!({"message": "What is a C3D8R element?"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, json!({"response": "reply 1", "cached": false}));

    let (_, _, second) = post_chat(&app, json!({"message": "  what is a c3d8r element?  "})).await;
    assert_eq!(second, json!({"response": "reply 1", "cached": true}));
    assert_eq!(upstream.calls(), 1);

    // Wire shape: system message first, carrying the base prompt and the style.
    let sent = upstream.last_request();
    assert_eq!(sent["messages"][0]["role"], "system");
    let system = sent["messages"][0]["content"].as_str().unwrap();
    assert!(system.starts_with("You are an Abaqus expert assistant."));
    assert!(system.ends_with(simguide_core::Style::Detailed.instruction()));
    assert_eq!(sent["messages"][1]["content"], "What is a C3D8R element?");
    assert_eq!(sent["max_tokens"], 400);
}

#[tokio::test]
async fn e2e_project_plan_shares_one_slot() {
    let upstream = Arc::new(Upstream::default());
    let app = gateway(upstream.clone()).await;

    let (_, _, first) = post_chat(&app, json!({"message": "Start Project Plan please"})).await;
    let (_, _, second) =
        post_chat(&app, json!({"message": "start project plan now", "style": "simple"})).await;

    assert_eq!(first["cached"], false);
    assert_eq!(second["cached"], true);
    assert_eq!(first["response"], second["response"]);
    assert_eq!(upstream.calls(), 1);

    let prompt = upstream.last_request()["messages"][1]["content"].clone();
    assert!(prompt.as_str().unwrap().contains("step-by-step plan"));
}

#[tokio::test]
async fn e2e_canned_intent_never_reaches_upstream() {
    let upstream = Arc::new(Upstream::default());
    let app = gateway(upstream.clone()).await;

    let (status, _, body) =
        post_chat(&app, json!({"message": "How do I set an ENCASTRE boundary?"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cached"], false);
    assert!(body["response"].as_str().unwrap().contains("ENCASTRE"));
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn e2e_session_context_round_trip() {
    let upstream = Arc::new(Upstream::default());
    let app = gateway(upstream.clone()).await;

    post_chat(&app, json!({"message": "define steel", "session_id": "s-1"})).await;
    post_chat(&app, json!({"message": "add plasticity", "session_id": "s-1"})).await;

    let messages = upstream.last_request()["messages"].clone();
    let roles: Vec<&str> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, ["system", "user", "assistant", "user"]);
    assert_eq!(messages[2]["content"], "reply 1");
}

#[tokio::test]
async fn e2e_transient_upstream_failure_is_retried() {
    let upstream = Upstream::scripted(vec![(503, vec![], json!({"error": "overloaded"}))]);
    let app = gateway(upstream.clone()).await;

    let (status, _, body) = post_chat(&app, json!({"message": "what is CAE?"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "reply 2");
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn e2e_auth_failure_is_masked_and_not_retried() {
    let upstream = Upstream::scripted(vec![(
        401,
        vec![],
        json!({"error": {"message": "Incorrect API key provided: sk-test"}}),
    )]);
    let app = gateway(upstream.clone()).await;

    let (status, _, body) = post_chat(&app, json!({"message": "what is CAE?"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "service misconfigured"}));
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn e2e_rate_limit_surfaces_retry_after() {
    let upstream = Upstream::scripted(vec![(
        429,
        vec![("retry-after", "9")],
        json!({"error": "slow down"}),
    )]);
    let app = gateway(upstream.clone()).await;

    let (status, retry_after, body) = post_chat(&app, json!({"message": "what is CAE?"})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(retry_after.as_deref(), Some("9"));
    assert_eq!(body["error"], "try again shortly");
    assert_eq!(upstream.calls(), 1);

    // Nothing was cached: the next request goes upstream again.
    let (status, _, body) = post_chat(&app, json!({"message": "what is CAE?"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cached"], false);
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test]
async fn e2e_malformed_upstream_response_is_500() {
    let upstream = Upstream::scripted(vec![(200, vec![], json!({"choices": []}))]);
    let app = gateway(upstream.clone()).await;

    let (status, _, body) = post_chat(&app, json!({"message": "what is CAE?"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn e2e_unreachable_upstream_is_502() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = AppConfig {
        api_key: Some("sk-test".into()),
        api_url: Some(format!("http://{addr}/v1")),
        ..AppConfig::default()
    };
    config.upstream.max_retries = 1;
    config.upstream.retry_base_delay_ms = 1;
    config.cache.sweep_interval_secs = 0;

    let client = simguide_providers::build_from_config(&config).unwrap();
    let app = simguide_gateway::build_router(
        simguide_gateway::build_state(&config, client),
        &config.gateway,
    );

    let (status, _, _) = post_chat(&app, json!({"message": "what is CAE?"})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}
