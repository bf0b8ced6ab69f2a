use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use pulse::api;
use pulse::config::RecipientConfig;
use pulse::mailer::ALERT_SUBJECT;
use pulse::prelude::*;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

struct Harness {
    app: Router,
    hub: PulseHub,
    mailer: Arc<DirectoryMailer>,
}

fn harness_with(mut config: PulseConfig) -> Harness {
    config.recipients = vec![RecipientConfig {
        email: "ada@example.com".to_string(),
        name: "Ada".to_string(),
    }];
    let directory = Arc::new(InMemoryDirectory::from_config(&config.recipients));
    let mailer = Arc::new(DirectoryMailer::new(directory.clone(), "alerts@momcare.local"));
    let hub = PulseHub::new(config, mailer.clone());
    let app = api::router(AppState {
        hub: hub.clone(),
        directory,
    });
    Harness { app, hub, mailer }
}

fn harness() -> Harness {
    harness_with(PulseConfig::default())
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn polling_returns_latest_value() {
    let h = harness();
    let response = send(&h.app, get("/heart-rate/bpm-current")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "bpm": 75 }));

    h.hub.ingest(Bpm(88)).await;
    let response = send(&h.app, post_json("/getBPM", json!({ "email": "ada@example.com" }))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "bpm": 88 }));
}

#[tokio::test]
async fn polling_before_first_sample_reports_absence() {
    let mut config = PulseConfig::default();
    config.source.initial_bpm = None;
    let h = harness_with(config);

    let response = send(&h.app, get("/heart-rate/bpm-current")).await;
    assert_eq!(json_body(response).await, json!({ "bpm": null }));

    let response = send(&h.app, post_json("/getBPM", json!({}))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await, json!({ "error": "BPM not available yet" }));

    let response = send(
        &h.app,
        post_json("/checkHighBPM", json!({ "email": "ada@example.com" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await, json!({ "error": "BPM data not available" }));
}

#[tokio::test]
async fn check_requires_an_email() {
    let h = harness();
    for body in [json!({}), json!({ "email": "   " }), json!({ "email": null })] {
        let response = send(&h.app, post_json("/heart-rate/checkHighBPM", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({ "error": "Email is required" }));
    }

    let no_body = Request::builder()
        .method("POST")
        .uri("/heart-rate/checkHighBPM")
        .body(Body::empty())
        .unwrap();
    let response = send(&h.app, no_body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn normal_reading_is_not_an_alert() {
    let h = harness();
    let response = send(
        &h.app,
        post_json("/heart-rate/checkHighBPM", json!({ "email": "ada@example.com" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "alert": false }));
    assert!(h.mailer.sent().await.is_empty());
}

#[tokio::test]
async fn high_reading_alerts_once_per_cooldown() {
    let h = harness();
    h.hub.ingest(Bpm(120)).await;

    let expected = [
        "High heart rate detected (120 BPM). Please take a moment to rest.",
        "High heart rate detected (120 BPM). You were alerted recently; please keep resting.",
    ];
    for message in expected {
        let response = send(
            &h.app,
            post_json("/heart-rate/checkHighBPM", json!({ "email": "Ada@Example.com" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "alert": true, "message": message })
        );
    }

    let sent = h.mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ada@example.com");
    assert_eq!(sent[0].subject, ALERT_SUBJECT);

    let response = send(&h.app, get("/heart-rate/history?email=ada@example.com")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["email"], "ada@example.com");
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
    assert_eq!(body["events"][0]["type"], "high_bpm");
    assert_eq!(body["events"][0]["value"], 120);
}

#[tokio::test]
async fn unknown_recipient_still_reports_alert_condition() {
    let h = harness();
    h.hub.ingest(Bpm(130)).await;
    let response = send(
        &h.app,
        post_json("/checkHighBPM", json!({ "email": "nobody@example.com" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["alert"], true);
    assert!(h.mailer.sent().await.is_empty());
    assert!(h.hub.alerts().last_alerted("nobody@example.com").await.is_some());
}

#[tokio::test]
async fn history_validates_recipient() {
    let h = harness();
    let response = send(&h.app, get("/heart-rate/history")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = send(&h.app, get("/heart-rate/history?email=bob@example.com")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await, json!({ "error": "User not found" }));
}

#[tokio::test]
async fn status_and_health_report_liveness() {
    let h = harness();
    h.hub.ingest(Bpm(95)).await;
    let body = json_body(send(&h.app, get("/heart-rate/status")).await).await;
    assert_eq!(body["status"], "running");
    assert_eq!(body["latestBPM"], 95);
    assert_eq!(body["subscribers"], 0);
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));

    let body = json_body(send(&h.app, get("/health")).await).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "momcare-pulse");
}

async fn next_frame(stream: &mut axum::body::BodyDataStream) -> String {
    let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("no event within timeout")
        .expect("stream ended")
        .unwrap();
    String::from_utf8(chunk.to_vec()).unwrap()
}

#[tokio::test]
async fn event_stream_sends_current_value_then_changes() {
    let h = harness();
    let response = send(&h.app, get("/heart-rate/bpm-events")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    let mut frames = response.into_body().into_data_stream();

    assert_eq!(next_frame(&mut frames).await, "data: {\"bpm\":75}\n\n");
    assert_eq!(h.hub.subscriber_count().await, 1);

    h.hub.ingest(Bpm(75)).await;
    h.hub.ingest(Bpm(82)).await;
    assert_eq!(next_frame(&mut frames).await, "data: {\"bpm\":82}\n\n");

    drop(frames);
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.hub.subscriber_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription not removed after disconnect");
}

#[tokio::test]
async fn event_stream_without_a_value_starts_at_first_change() {
    let mut config = PulseConfig::default();
    config.source.initial_bpm = None;
    let h = harness_with(config);

    let response = send(&h.app, get("/bpm-events")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut frames = response.into_body().into_data_stream();
    assert_eq!(h.hub.subscriber_count().await, 1);

    h.hub.ingest(Bpm(80)).await;
    assert_eq!(next_frame(&mut frames).await, "data: {\"bpm\":80}\n\n");
}

#[tokio::test]
async fn status_reports_null_before_first_sample() {
    let config = PulseConfig::from_toml_str("[source]\ninitial_bpm = 0\n").unwrap();
    let h = harness_with(config);

    let body = json_body(send(&h.app, get("/heart-rate/status")).await).await;
    assert_eq!(body["status"], "running");
    assert_eq!(body["latestBPM"], Value::Null);
    assert_eq!(body["source"], Value::Null);

    let response = send(&h.app, get("/heart-rate/bpm-current")).await;
    assert_eq!(json_body(response).await, json!({ "bpm": null }));
}

#[tokio::test]
async fn end_to_end_sequence_collapses_repeats() {
    let h = harness();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    h.hub
        .subscribe(Arc::new(move |bpm: Bpm| -> Result<(), SinkError> {
            log.lock().unwrap().push(bpm);
            Ok(())
        }))
        .await;

    for raw in [75, 75, 82, 82, 95] {
        h.hub.ingest(Bpm(raw)).await;
    }

    assert_eq!(*seen.lock().unwrap(), vec![Bpm(82), Bpm(95)]);
    let response = send(&h.app, get("/heart-rate/bpm-current")).await;
    assert_eq!(json_body(response).await, json!({ "bpm": 95 }));
}
