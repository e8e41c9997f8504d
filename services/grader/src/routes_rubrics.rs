use axum::{body::Bytes, extract::State, http::Method};

use crate::invocation::{handle_rubric_event, Envelope};
use crate::routes_grading::gateway_event;
use crate::state::SharedState;

pub async fn generate(State(state): State<SharedState>, method: Method, body: Bytes) -> Envelope {
    handle_rubric_event(&state, gateway_event(&method, &body)).await
}
