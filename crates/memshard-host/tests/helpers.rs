//! Shared helpers for the HTTP integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use memshard_core::{
    CapabilityCatalog, ManualClock, SessionStore, Severity, SharedValidator, StoreConfig,
};
use serde_json::Value;
use tower::ServiceExt;

pub fn catalog() -> CapabilityCatalog {
    CapabilityCatalog::new()
        .with("peril", Severity::Medium)
        .with("violence.mild", Severity::Low)
}

pub fn store_with(validator: SharedValidator) -> Arc<SessionStore> {
    Arc::new(SessionStore::with_parts(
        StoreConfig::default(),
        validator,
        Arc::new(ManualClock::new(1_000)),
    ))
}

pub fn test_app() -> (Router, Arc<SessionStore>) {
    let store = store_with(Arc::new(catalog()));
    (memshard_host::app(store.clone()), store)
}

pub async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).expect("request"))
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    call(app, Method::GET, uri, &[], None).await
}

pub async fn put(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, Method::PUT, uri, &[], Some(body)).await
}

pub async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, Method::POST, uri, &[], Some(body)).await
}
