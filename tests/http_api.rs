mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{Harness, ScriptedBackend, ScriptedLoader};
use sluice::lifecycle::LifecycleState;

fn prompt(text: &str) -> Value {
    json!({ "prompt": text, "max_new_tokens": 10, "do_sample": false })
}

fn timestamp(body: &Value, key: &str) -> DateTime<Utc> {
    body[key].as_str().unwrap().parse().unwrap()
}

// -- Health and root --

#[tokio::test]
async fn health_reports_loaded_engine() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    let (status, body) = h.get("/health").await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["device"], "cpu");
    assert_eq!(body["accelerator_available"], false);
    assert_eq!(body["lifecycle"], "ready");
    assert_eq!(body["queued_jobs"], 0);
    assert_eq!(body["busy"], false);
}

#[tokio::test]
async fn health_during_loading_succeeds_with_not_ready_status() {
    let h = Harness::new(16, None);
    let (loader, release) = ScriptedLoader::gated(ScriptedBackend::new());

    let lifecycle = Arc::clone(&h.lifecycle);
    let engine = Arc::clone(&h.engine);
    let load = tokio::spawn(async move { lifecycle.load_engine(engine, Arc::new(loader)).await });

    h.lifecycle
        .subscribe()
        .wait_for(|s| *s == LifecycleState::Loading)
        .await
        .unwrap();

    let (status, body) = h.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["model_loaded"], false);
    assert_eq!(body["status"], "model_not_loaded");
    assert_eq!(body["device"], "unknown");
    assert_eq!(body["lifecycle"], "loading");

    let (status, body) = h.post("/generate", prompt("too early")).await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["type"], "engine_not_loaded");

    // Readiness wins over a bad body
    let resp = h
        .app
        .clone()
        .oneshot(common::json_request("/generate", "{not json"))
        .await
        .unwrap();
    let (status, body) = common::read(resp).await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["type"], "engine_not_loaded");

    release.send(()).unwrap();
    load.await.unwrap().unwrap();

    let (_, body) = h.get("/health").await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn failed_load_never_admits_generation() {
    let h = Harness::new(16, None);
    let err = h
        .lifecycle
        .load_engine(Arc::clone(&h.engine), Arc::new(ScriptedLoader::failing()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("weights not found"));
    assert_eq!(h.lifecycle.current(), LifecycleState::Stopped);

    let (status, body) = h.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["model_loaded"], false);

    let (status, body) = h.post("/generate", prompt("hello")).await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["type"], "engine_not_loaded");
}

#[tokio::test]
async fn root_describes_service() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    let (status, body) = h.get("/").await;

    assert_eq!(status, 200);
    assert_eq!(body["service"], "sluice");
    assert_eq!(body["model"], "scripted");
    assert_eq!(body["status"], "ready");
    let endpoints = body["endpoints"].as_object().unwrap();
    assert!(endpoints.contains_key("generate"));
    assert!(endpoints.contains_key("health"));
}

// -- Generation --

#[tokio::test]
async fn generate_reference_scenario() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    let (status, body) = h
        .post(
            "/generate",
            json!({
                "prompt": "Write a function",
                "max_new_tokens": 50,
                "temperature": 0.7,
                "top_p": 0.9,
                "do_sample": true
            }),
        )
        .await;

    assert_eq!(status, 200, "body: {body}");
    assert!(!body["generated_text"].as_str().unwrap().is_empty());
    assert!(body["id"].as_str().unwrap().starts_with("gen-"));

    let prompt_tokens = body["prompt_tokens"].as_u64().unwrap();
    let generated = body["generated_tokens"].as_u64().unwrap();
    assert!(prompt_tokens > 0);
    assert!(generated <= 50);
    assert_eq!(body["total_tokens"].as_u64().unwrap(), prompt_tokens + generated);
    assert_eq!(body["max_new_tokens_capped"], false);
}

#[tokio::test]
async fn generated_text_is_trimmed() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    let (_, body) = h.post("/generate", prompt("hi")).await;
    let text = body["generated_text"].as_str().unwrap();
    assert_eq!(text, text.trim());
    assert!(text.starts_with("xyz"));
}

#[tokio::test]
async fn server_cap_is_visible() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    let (status, body) = h
        .post("/generate", json!({ "prompt": "long", "max_new_tokens": 500 }))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["max_new_tokens_requested"], 500);
    assert_eq!(body["max_new_tokens_applied"], 100);
    assert_eq!(body["max_new_tokens_capped"], true);
    assert!(body["generated_tokens"].as_u64().unwrap() <= 100);
}

#[tokio::test]
async fn defaults_fill_missing_fields() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    let (status, body) = h.post("/generate", json!({ "prompt": "hi" })).await;

    assert_eq!(status, 200);
    assert_eq!(body["max_new_tokens_requested"], 50);
    assert_eq!(body["generated_tokens"], 50);
}

// -- Validation --

#[tokio::test]
async fn zero_max_new_tokens_is_rejected() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    let (status, body) = h
        .post("/generate", json!({ "prompt": "hi", "max_new_tokens": 0 }))
        .await;

    assert_eq!(status, 400);
    assert_eq!(body["error"]["type"], "invalid_parameter");
    assert_eq!(body["error"]["field"], "max_new_tokens");
}

#[tokio::test]
async fn out_of_range_fields_are_named() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    let cases = [
        (json!({ "max_new_tokens": 5 }), "prompt"),
        (json!({ "prompt": "" }), "prompt"),
        (json!({ "prompt": "hi", "max_new_tokens": 513 }), "max_new_tokens"),
        (json!({ "prompt": "hi", "temperature": 5.0 }), "temperature"),
        (json!({ "prompt": "hi", "temperature": 0.0 }), "temperature"),
        (json!({ "prompt": "hi", "top_p": 0.05 }), "top_p"),
    ];

    for (body, field) in cases {
        let (status, resp) = h.post("/generate", body.clone()).await;
        assert_eq!(status, 400, "request {body}");
        assert_eq!(resp["error"]["field"], field, "request {body}");
    }

    // Nothing reached the engine.
    assert_eq!(h.executor.stats().completed, 0);
}

#[tokio::test]
async fn wrong_typed_fields_are_named() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    let cases = [
        (json!({ "prompt": 5 }), "prompt"),
        (json!({ "prompt": "hi", "max_new_tokens": 50.0 }), "max_new_tokens"),
        (json!({ "prompt": "hi", "temperature": "hot" }), "temperature"),
        (json!({ "prompt": "hi", "top_p": "0.9" }), "top_p"),
        (json!({ "prompt": "hi", "do_sample": 1 }), "do_sample"),
    ];

    for (body, field) in cases {
        let (status, resp) = h.post("/generate", body.clone()).await;
        assert_eq!(status, 400, "request {body}");
        assert_eq!(resp["error"]["type"], "invalid_parameter", "request {body}");
        assert_eq!(resp["error"]["field"], field, "request {body}");
    }
    assert_eq!(h.executor.stats().completed, 0);
}

#[tokio::test]
async fn whitespace_prompt_is_accepted() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    for text in ["   ", "\n"] {
        let (status, body) = h.post("/generate", json!({ "prompt": text })).await;
        assert_eq!(status, 200, "prompt {text:?}: {body}");
        assert!(body["prompt_tokens"].as_u64().unwrap() > 0);
    }
}

#[tokio::test]
async fn refused_bodies_keep_their_status() {
    let h = Harness::ready(ScriptedBackend::new()).await;

    let huge = "a".repeat(2 * 1024 * 1024);
    let resp = h.post_raw("/generate", json!({ "prompt": huge })).await;
    assert_eq!(resp.status(), 413);

    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/generate")
        .body(axum::body::Body::from(r#"{"prompt":"hi"}"#))
        .unwrap();
    let (status, body) = common::read(h.app.clone().oneshot(req).await.unwrap()).await;
    assert_eq!(status, 415);
    assert_eq!(body["error"]["type"], "invalid_request");
}

#[tokio::test]
async fn bounds_are_inclusive() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    let (status, _) = h
        .post(
            "/generate",
            json!({ "prompt": "hi", "max_new_tokens": 1, "temperature": 0.1, "top_p": 1.0 }),
        )
        .await;
    assert_eq!(status, 200);

    let (status, _) = h
        .post(
            "/generate",
            json!({ "prompt": "hi", "max_new_tokens": 512, "temperature": 2.0, "top_p": 0.1 }),
        )
        .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    let resp = h
        .app
        .clone()
        .oneshot(common::json_request("/generate", "{not json"))
        .await
        .unwrap();
    let (status, body) = common::read(resp).await;

    assert_eq!(status, 400);
    assert_eq!(body["error"]["field"], "body");

    let (status, body) = h.post("/generate", json!(["Write a function"])).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["field"], "body");
}

// -- Engine failures --

#[tokio::test]
async fn engine_failure_is_opaque_and_service_survives() {
    let h = Harness::ready(ScriptedBackend::new()).await;

    let (status, body) = h.post("/generate", prompt("[fail]")).await;
    assert_eq!(status, 500);
    assert_eq!(body["error"]["type"], "generation_error");
    assert!(!body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("0xdeadbeef"));

    let (status, _) = h.post("/generate", prompt("[panic]")).await;
    assert_eq!(status, 500);

    let (status, _) = h.post("/generate", prompt("still alive")).await;
    assert_eq!(status, 200);
    assert_eq!(h.lifecycle.current(), LifecycleState::Ready);
}

// -- Concurrency --

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_overlap_and_finish_in_order() {
    let backend = ScriptedBackend::slow(Duration::from_millis(40));
    let trace = backend.trace();
    let h = Arc::new(Harness::ready(backend).await);

    let mut tasks = Vec::new();
    for i in 0..5 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            h.post("/generate", prompt(&format!("job-{i}"))).await
        }));
        // Fix admission order
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut bodies = Vec::new();
    for task in tasks {
        let (status, body) = task.await.unwrap();
        assert_eq!(status, 200);
        bodies.push(body);
    }

    assert_eq!(trace.peak(), 1);
    assert_eq!(
        trace.prompts(),
        (0..5).map(|i| format!("job-{i}")).collect::<Vec<_>>()
    );
    for pair in bodies.windows(2) {
        assert!(timestamp(&pair[0], "completed_at") <= timestamp(&pair[1], "started_at"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_is_prompt_while_generating() {
    let h = Arc::new(Harness::ready(ScriptedBackend::slow(Duration::from_millis(600))).await);

    let job = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.post("/generate", prompt("slow")).await })
    };
    h.wait_until_busy().await;

    let start = Instant::now();
    let (status, body) = h.get("/health").await;
    assert!(start.elapsed() < Duration::from_millis(200));
    assert_eq!(status, 200);
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["busy"], true);

    let (status, _) = job.await.unwrap();
    assert_eq!(status, 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_queue_returns_retryable_busy() {
    let h = Arc::new(
        Harness::ready_with(ScriptedBackend::slow(Duration::from_millis(300)), 1, None).await,
    );

    let running = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.post("/generate", prompt("first")).await })
    };
    h.wait_until_busy().await;

    let queued = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.post("/generate", prompt("second")).await })
    };
    for _ in 0..100 {
        if h.executor.stats().queued == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let resp = h.post_raw("/generate", prompt("third")).await;
    assert_eq!(resp.status(), 429);
    assert!(resp.headers().contains_key("retry-after"));
    let (_, body) = common::read(resp).await;
    assert_eq!(body["error"]["type"], "engine_busy");

    assert_eq!(running.await.unwrap().0, 200);
    assert_eq!(queued.await.unwrap().0, 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn caller_timeout_returns_gateway_timeout() {
    let h = Harness::ready_with(
        ScriptedBackend::slow(Duration::from_millis(300)),
        4,
        Some(Duration::from_millis(50)),
    )
    .await;

    let (status, body) = h.post("/generate", prompt("slow")).await;
    assert_eq!(status, 504);
    assert_eq!(body["error"]["type"], "timeout");
}

// -- Shutdown --

#[tokio::test]
async fn draining_refuses_new_work() {
    let h = Harness::ready(ScriptedBackend::new()).await;
    h.lifecycle.drain(&h.executor, Duration::from_secs(1)).await;

    let (status, body) = h.post("/generate", prompt("late")).await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["type"], "shutting_down");

    let (status, body) = h.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["lifecycle"], "stopped");
}
