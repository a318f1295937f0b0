use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use memshard_core::{
    AckOutcome, CapabilityRef, ChangeWindow, Cursor, MutationMeta, Scope, SessionOverlay,
    ShardKind, ShardSnapshot, StoreError,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::http::HttpState;

pub fn router() -> Router<HttpState> {
    Router::new()
        .route("/health", get(health))
        .route("/sessions/{id}/memory", get(overlay))
        .route("/sessions/{id}/memory/changes", get(changes))
        .route("/sessions/{id}/memory/ack", post(ack))
        .route(
            "/sessions/{id}/memory/{shard}",
            get(shard_get).put(shard_put),
        )
}

#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    Invalid(String),
    RevisionRequired,
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::Invalid(msg.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::UnknownShard(_)
        | StoreError::ShardUnavailable { .. }
        | StoreError::UnknownCheck(_) => StatusCode::NOT_FOUND,
        StoreError::RevisionMismatch { .. } => StatusCode::CONFLICT,
        StoreError::CanonicalWriteNotAllowed { .. } => StatusCode::FORBIDDEN,
        StoreError::Capability(_) | StoreError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Store(err) => {
                let status = store_status(&err);
                let mut body = json!({ "code": err.code(), "message": err.to_string() });
                if let StoreError::RevisionMismatch { current, expected } = err {
                    body["currentRevision"] = json!(current);
                    body["expectedRevision"] = json!(expected);
                }
                (status, body)
            }
            ApiError::Invalid(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "code": "invalid_request", "message": msg }),
            ),
            ApiError::RevisionRequired => (
                StatusCode::PRECONDITION_REQUIRED,
                json!({
                    "code": "expected_revision_required",
                    "message": "expectedRevision is required to replace a shard",
                }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))
}

async fn health(State(state): State<HttpState>) -> Json<Value> {
    Json(json!({ "ok": true, "sessions": state.store.len() }))
}

async fn overlay(State(state): State<HttpState>, Path(id): Path<String>) -> Json<SessionOverlay> {
    Json(state.store.overlay(&id))
}

async fn shard_get(
    State(state): State<HttpState>,
    Path((id, shard)): Path<(String, String)>,
) -> Result<Json<ShardSnapshot>, ApiError> {
    let snapshot = state.store.get_or_create(&id).shard(&shard)?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    since: Option<Cursor>,
    limit: Option<usize>,
}

async fn changes(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    query: Result<Query<ChangesQuery>, QueryRejection>,
) -> Result<Json<ChangeWindow>, ApiError> {
    let Query(query) = query.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let window = state
        .store
        .list_changes(&id, query.since.unwrap_or(0), query.limit);
    Ok(Json(window))
}

#[derive(Debug, Deserialize)]
struct AckBody {
    cursor: Cursor,
}

async fn ack(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<AckOutcome>, ApiError> {
    let body: AckBody = decode(&body)?;
    Ok(Json(state.store.acknowledge_changes(&id, body.cursor)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplaceBody {
    data: Option<Value>,
    expected_revision: Option<u64>,
    actor: Option<String>,
    reason: Option<String>,
    #[serde(default)]
    scope: Scope,
    #[serde(default)]
    capability_refs: Vec<CapabilityRef>,
    #[serde(default)]
    safety_flags: Vec<String>,
    metadata: Option<Value>,
}

/// Accepts `3`, `"3"` and `W/"3"`.
fn if_match_revision(headers: &HeaderMap) -> Result<Option<u64>, ApiError> {
    let Some(raw) = headers.get(header::IF_MATCH) else {
        return Ok(None);
    };
    let raw = raw
        .to_str()
        .map_err(|_| ApiError::bad_request("If-Match is not valid ASCII"))?;
    let tag = raw.trim().trim_start_matches("W/").trim_matches('"');
    tag.parse()
        .map(Some)
        .map_err(|_| ApiError::bad_request(format!("If-Match '{raw}' is not a revision")))
}

/// Last-resort revision source: a numeric `expectedRevision` inside the
/// payload is consumed and removed. Anything else is left in place.
fn take_embedded_revision(data: &mut Value) -> Option<u64> {
    let fields = data.as_object_mut()?;
    let revision = fields.get("expectedRevision")?.as_u64()?;
    fields.remove("expectedRevision");
    Some(revision)
}

async fn shard_put(
    State(state): State<HttpState>,
    Path((id, shard)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let kind: ShardKind = shard.parse()?;
    let body: ReplaceBody = decode(&body)?;
    let Some(mut data) = body.data else {
        return Err(ApiError::bad_request("body must carry `data`"));
    };
    if body.scope != Scope::Ephemeral {
        return Err(StoreError::CanonicalWriteNotAllowed { scope: body.scope }.into());
    }
    let expected = match body.expected_revision {
        Some(revision) => Some(revision),
        None => if_match_revision(&headers)?,
    };
    let expected = expected
        .or_else(|| take_embedded_revision(&mut data))
        .ok_or(ApiError::RevisionRequired)?;

    let mut meta = MutationMeta::default()
        .scope(body.scope)
        .expect_revision(expected);
    if let Some(actor) = body.actor {
        meta = meta.actor(actor);
    }
    if let Some(reason) = body.reason {
        meta = meta.reason(reason);
    }
    if let Some(metadata) = body.metadata {
        meta.metadata = metadata;
    }
    meta.capability_refs = body.capability_refs;
    meta.safety_flags = body.safety_flags;

    let outcome = match state.store.replace_shard(&id, kind.as_str(), data, &meta) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::debug!(session = %id, shard = %kind, code = err.code(), "replace rejected");
            return Err(err.into());
        }
    };
    tracing::debug!(
        session = %id,
        shard = %kind,
        revision = outcome.revision,
        changed = outcome.changed,
        "shard replaced"
    );
    Ok(Json(json!({
        "shard": kind,
        "changed": outcome.changed,
        "revision": outcome.revision,
        "updatedAt": outcome.updated_at,
        "updatedBy": outcome.updated_by,
    })))
}
