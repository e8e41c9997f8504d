//! Gateway-style invocation: event in, CORS envelope out.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{error, info};

use crate::bulk::{run_bulk, BulkRequest, Deadline};
use crate::pipeline::grade_single;
use crate::rubric_generation::generate_rubric;
use crate::state::AppState;

pub const CORS_ALLOW_HEADERS: &str = "Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token";
pub const CORS_ALLOW_METHODS: &str = "POST,OPTIONS";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub status_code: u16,
    pub headers: BTreeMap<&'static str, &'static str>,
    pub body: String,
}

impl Envelope {
    pub fn json(status_code: u16, body: &Value) -> Self {
        let headers = BTreeMap::from([
            ("Content-Type", "application/json"),
            ("Access-Control-Allow-Origin", "*"),
            ("Access-Control-Allow-Headers", CORS_ALLOW_HEADERS),
            ("Access-Control-Allow-Methods", CORS_ALLOW_METHODS),
        ]);
        Self {
            status_code,
            headers,
            body: body.to_string(),
        }
    }

    fn preflight() -> Self {
        Self::json(200, &json!({"message": "CORS preflight"}))
    }

    fn internal_error(err: &anyhow::Error) -> Self {
        Self::json(
            500,
            &json!({"error": "Internal server error", "message": format!("{err:#}")}),
        )
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut resp = (status, self.body).into_response();
        let headers = resp.headers_mut();
        for (name, value) in self.headers {
            if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                headers.insert(name, HeaderValue::from_static(value));
            }
        }
        resp
    }
}

fn is_preflight(event: &Value) -> bool {
    event.get("httpMethod").and_then(Value::as_str) == Some("OPTIONS")
}

/// `body` wins when present: decoded if it is a string, used as-is otherwise.
pub fn extract_request_data(event: Value) -> Result<Value> {
    match event {
        Value::Object(mut map) if map.contains_key("body") => match map.remove("body") {
            Some(Value::String(s)) => serde_json::from_str(&s).context("request body is not valid JSON"),
            Some(other) => Ok(other),
            None => Ok(Value::Object(map)),
        },
        other => Ok(other),
    }
}

fn with_processing_time(mut body: Value, started: Instant) -> Value {
    let secs = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
    if let Value::Object(map) = &mut body {
        map.insert("processing_time_seconds".to_string(), json!(secs));
    }
    body
}

async fn dispatch_grading(state: &AppState, event: Value, started: Instant) -> Result<Value> {
    let data = extract_request_data(event)?;
    if data.get("essays").is_some() {
        let req: BulkRequest = serde_json::from_value(data).context("invalid bulk request")?;
        let deadline = Deadline::new(started, state.cfg.bulk.invocation_budget);
        let batch = run_bulk(state, req, deadline).await?;
        Ok(serde_json::to_value(batch)?)
    } else {
        let resp = grade_single(state, &data).await;
        Ok(serde_json::to_value(resp)?)
    }
}

/// Single or bulk grading, picked by the presence of `essays`.
pub async fn handle_grading_event(state: &AppState, event: Value) -> Envelope {
    if is_preflight(&event) {
        return Envelope::preflight();
    }
    let started = Instant::now();
    match dispatch_grading(state, event, started).await {
        Ok(body) => {
            let body = with_processing_time(body, started);
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "grading request done");
            Envelope::json(200, &body)
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "grading request failed");
            Envelope::internal_error(&e)
        }
    }
}

pub async fn handle_rubric_event(state: &AppState, event: Value) -> Envelope {
    if is_preflight(&event) {
        return Envelope::preflight();
    }
    let started = Instant::now();
    let data = match extract_request_data(event) {
        Ok(d) => d,
        Err(e) => return Envelope::internal_error(&e),
    };
    match generate_rubric(state, data).await {
        Ok(created) => match serde_json::to_value(created) {
            Ok(body) => Envelope::json(200, &with_processing_time(body, started)),
            Err(e) => Envelope::internal_error(&e.into()),
        },
        Err(e) => {
            error!(error = %e, "rubric generation failed");
            let body = json!({"processing_status": "failed", "error": e.to_string()});
            Envelope::json(e.status_code(), &with_processing_time(body, started))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{rubric_record, test_state, StubProvider};

    fn essay(student: &str) -> Value {
        json!({
            "student_id": student,
            "content_id": "c1",
            "essay_type": "Narrative",
            "essay_response": "It was a dark and stormy night.",
        })
    }

    #[test]
    fn envelope_shape() {
        let env = Envelope::json(200, &json!({"ok": true}));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["statusCode"], 200);
        assert_eq!(v["headers"]["Access-Control-Allow-Origin"], "*");
        assert_eq!(v["headers"]["Access-Control-Allow-Methods"], "POST,OPTIONS");
        assert_eq!(v["body"], "{\"ok\":true}");
    }

    #[test]
    fn request_data_sources() {
        let direct = json!({"student_id": "s"});
        assert_eq!(extract_request_data(direct.clone()).unwrap(), direct);
        let wrapped = json!({"httpMethod": "POST", "body": "{\"student_id\":\"s\"}"});
        assert_eq!(extract_request_data(wrapped).unwrap(), direct);
        let object = json!({"body": {"student_id": "s"}});
        assert_eq!(extract_request_data(object).unwrap(), direct);
        assert!(extract_request_data(json!({"body": "{not json"})).is_err());
    }

    #[tokio::test]
    async fn preflight_short_circuits() {
        let state = test_state(StubProvider::new(), vec![]);
        let env = handle_grading_event(&state, json!({"httpMethod": "OPTIONS"})).await;
        assert_eq!(env.status_code, 200);
        assert_eq!(env.body_json().unwrap(), json!({"message": "CORS preflight"}));
    }

    #[tokio::test]
    async fn single_essay_through_gateway_body() {
        let state = test_state(
            StubProvider::new().reply("dark and stormy", json!({"overall_essay_score": 3, "ai_confidence": 90})),
            vec![rubric_record("Narrative", "c1", "0-3")],
        );
        let event = json!({"httpMethod": "POST", "body": essay("s1").to_string()});
        let env = handle_grading_event(&state, event).await;
        assert_eq!(env.status_code, 200);
        let body = env.body_json().unwrap();
        assert_eq!(body["processing_mode"], "single");
        assert_eq!(body["processing_status"], "completed");
        assert_eq!(body["result"]["essay_score"], 3);
        assert!(body["processing_time_seconds"].is_number());
    }

    #[tokio::test]
    async fn failed_single_essay_is_still_200() {
        let state = test_state(StubProvider::new(), vec![]);
        let env = handle_grading_event(&state, essay("s1")).await;
        assert_eq!(env.status_code, 200);
        assert_eq!(env.body_json().unwrap()["processing_status"], "failed");
    }

    #[tokio::test]
    async fn empty_bulk_and_bad_body_are_500() {
        let state = test_state(StubProvider::new(), vec![]);
        let env = handle_grading_event(&state, json!({"essays": []})).await;
        assert_eq!(env.status_code, 500);
        let body = env.body_json().unwrap();
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["message"], "No essays provided in bulk request");

        let env = handle_grading_event(&state, json!({"body": "{oops"})).await;
        assert_eq!(env.status_code, 500);
    }

    #[tokio::test]
    async fn bulk_through_envelope() {
        let state = test_state(StubProvider::new(), vec![rubric_record("Narrative", "c1", "0-3")]);
        let event = json!({"essays": [essay("a"), essay("b")], "store_in_s3": false});
        let env = handle_grading_event(&state, event).await;
        let body = env.body_json().unwrap();
        assert_eq!(body["processing_mode"], "bulk");
        assert_eq!(body["summary"]["total_essays_graded"], 2);
    }

    #[tokio::test]
    async fn rubric_errors_keep_their_status() {
        let state = test_state(StubProvider::new(), vec![]);
        let env = handle_rubric_event(&state, json!({"body": {"essay_type": "X"}})).await;
        assert_eq!(env.status_code, 400);
        assert_eq!(env.body_json().unwrap()["processing_status"], "failed");
    }

    #[test]
    fn into_response_sets_cors_headers() {
        let resp = Envelope::json(201, &json!({})).into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        assert_eq!(resp.headers()["content-type"], "application/json");
    }
}
