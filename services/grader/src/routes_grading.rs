use axum::{body::Bytes, extract::State, http::Method, Json};
use serde_json::{json, Value};

use crate::invocation::{handle_grading_event, Envelope};
use crate::state::SharedState;

/// Wraps an HTTP request the way an API gateway would.
pub fn gateway_event(method: &Method, body: &Bytes) -> Value {
    json!({
        "httpMethod": method.as_str(),
        "body": String::from_utf8_lossy(body),
    })
}

pub async fn grade(State(state): State<SharedState>, method: Method, body: Bytes) -> Envelope {
    handle_grading_event(&state, gateway_event(&method, &body)).await
}

pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    let info = state.provider.info();
    let (status, error) = match state.provider.ping().await {
        Ok(()) => ("ok", None),
        Err(e) => ("degraded", Some(format!("{e:#}"))),
    };

    Json(json!({
        "status": status,
        "provider": info,
        "provider_error": error,
        "cached_rubrics": state.rubric_cache.len(),
        "id_field": state.cfg.id_field.name(),
    }))
}
