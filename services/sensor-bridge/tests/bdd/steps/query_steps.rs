//! BDD step definitions for the query feature

use axum::body::Body;
use axum::http::Request;
use cucumber::{given, then, when};
use std::sync::Arc;
use tower::ServiceExt;

use sensor_bridge::api::build_router;
use sensor_bridge::config::TemperatureView;

use crate::world::BridgeWorld;

#[given(expr = "the query timezone is {string}")]
fn query_timezone(world: &mut BridgeWorld, timezone: String) {
    world.config.query.timezone = timezone;
}

#[given("the temperature view lists the whole window")]
fn list_view(world: &mut BridgeWorld) {
    world.config.query.temperature_view = TemperatureView::List;
}

#[when(expr = "the {string} endpoint is requested")]
async fn request_endpoint(world: &mut BridgeWorld, uri: String) {
    let app = build_router(Arc::new(world.query()));
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    world.response_status = Some(response.status().as_u16());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    world.response_body = Some(serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null));
}

#[then(expr = "the response status is {int}")]
fn response_status(world: &mut BridgeWorld, expected: u16) {
    assert_eq!(world.response_status, Some(expected));
}

#[then(expr = "the response field {string} is {float}")]
fn response_field_number(world: &mut BridgeWorld, field: String, expected: f64) {
    let body = world.response_body.as_ref().expect("no response body");
    assert_eq!(
        body[&field].as_f64(),
        Some(expected),
        "field '{}' in {}",
        field,
        body
    );
}

#[then(expr = "the response field {string} is {string}")]
fn response_field_text(world: &mut BridgeWorld, field: String, expected: String) {
    let body = world.response_body.as_ref().expect("no response body");
    assert_eq!(
        body[&field].as_str(),
        Some(expected.as_str()),
        "field '{}' in {}",
        field,
        body
    );
}

#[then(expr = "the response field {string} is absent")]
fn response_field_absent(world: &mut BridgeWorld, field: String) {
    let body = world.response_body.as_ref().expect("no response body");
    assert!(body[&field].is_null(), "field '{}' in {}", field, body);
}

#[then(expr = "the response lists {int} entries")]
fn response_lists(world: &mut BridgeWorld, count: usize) {
    let body = world.response_body.as_ref().expect("no response body");
    let entries = body.as_array().expect("response is not a list");
    assert_eq!(entries.len(), count);
}

#[then(expr = "entry {int} has value {float} at {string}")]
fn entry_value(world: &mut BridgeWorld, index: usize, value: f64, timestamp: String) {
    let body = world.response_body.as_ref().expect("no response body");
    let entry = &body[index];
    assert_eq!(entry["value"].as_f64(), Some(value), "entry {}", entry);
    assert_eq!(entry["timestamp"].as_str(), Some(timestamp.as_str()));
}

#[then(expr = "the response field {string} has {int} values")]
fn response_field_len(world: &mut BridgeWorld, field: String, count: usize) {
    let body = world.response_body.as_ref().expect("no response body");
    let values = body[&field].as_array().expect("field is not a list");
    assert_eq!(values.len(), count);
}
