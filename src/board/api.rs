use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};

use super::authz::{Authorizer, RoleAuthorizer};
use super::board_cache::BoardCache;
use super::cache::{CacheBackend, MemoryCache};
use super::coordinator::MoveCoordinator;
use super::counter::{CountPredicate, CounterCache};
use super::db::{BoardDb, DbHandle};
use super::fanout::{FanoutHub, Topic};
use super::models::{Principal, Role};
use super::ws::Keepalive;
use crate::config::ShopConfig;
use crate::errors::BoardError;

pub const USER_HEADER: &str = "x-shop-user";
pub const ROLE_HEADER: &str = "x-shop-role";

// ── Shared application state ──────────────────────────────────────────

/// One instance per process; every component gets its collaborators
/// through here rather than through globals.
pub struct AppState {
    pub db: DbHandle,
    pub board_cache: Arc<BoardCache>,
    pub counter: Arc<CounterCache>,
    pub coordinator: Arc<MoveCoordinator>,
    pub hub: Arc<FanoutHub>,
    pub authorizer: Arc<dyn Authorizer>,
    pub keepalive: Keepalive,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the board services around an opened record store.
    pub fn new(db: BoardDb, config: &ShopConfig) -> Self {
        let db = DbHandle::new(db, config.lock_timeout());
        let backend: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new(config.cache.max_entries));
        let board_cache = Arc::new(BoardCache::new(
            Arc::clone(&backend),
            db.clone(),
            config.board_ttl(),
        ));
        let counter = Arc::new(CounterCache::new(backend, db.clone(), config.counter_ttl()));
        let authorizer: Arc<dyn Authorizer> = Arc::new(RoleAuthorizer);
        let coordinator = Arc::new(MoveCoordinator::new(
            db.clone(),
            Arc::clone(&board_cache),
            Arc::clone(&authorizer),
            config.fanout.event_buffer,
        ));
        let hub = Arc::new(FanoutHub::new(
            Arc::clone(&authorizer),
            Arc::clone(&board_cache),
            Arc::clone(&counter),
            config.fanout.subscriber_buffer,
        ));
        Self {
            db,
            board_cache,
            counter,
            coordinator,
            hub,
            authorizer,
            keepalive: Keepalive::from_config(config),
        }
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateItemRequest {
    pub title: String,
    pub description: Option<String>,
    pub column: Option<String>,
}

#[derive(Deserialize)]
pub struct MoveItemRequest {
    pub column: String,
    pub position: i64,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub key: String,
    pub count: i64,
}

// ── Error handling ────────────────────────────────────────────────────

pub struct ApiError(pub BoardError);

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BoardError::ItemNotFound { .. } => StatusCode::NOT_FOUND,
            BoardError::InvalidColumn { .. } | BoardError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            BoardError::TerminalStateViolation { .. } => StatusCode::CONFLICT,
            BoardError::Forbidden { .. } => StatusCode::FORBIDDEN,
            BoardError::Contention(_) | BoardError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BoardError::CacheRebuildFailure(_) | BoardError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "request failed");
        }
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
            "retryable": self.0.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}

// ── Caller identity ───────────────────────────────────────────────────

/// Principal asserted by the upstream gateway through request headers.
///
/// A missing user header means an anonymous customer; an unknown role is
/// rejected.
pub fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, BoardError> {
    let header = |name: &str| -> Result<Option<String>, BoardError> {
        match headers.get(name) {
            Some(value) => value
                .to_str()
                .map(|s| Some(s.trim().to_string()))
                .map_err(|_| BoardError::InvalidRequest(format!("{} is not valid text", name))),
            None => Ok(None),
        }
    };
    let Some(name) = header(USER_HEADER)?.filter(|n| !n.is_empty()) else {
        return Ok(Principal::anonymous());
    };
    let role = match header(ROLE_HEADER)? {
        Some(raw) => raw.parse::<Role>().map_err(BoardError::InvalidRequest)?,
        None => Role::Customer,
    };
    Ok(Principal::new(name, role))
}

pub struct Caller(pub Principal);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caller(principal_from_headers(&parts.headers)?))
    }
}

fn require_board_access(state: &AppState, principal: &Principal) -> Result<(), ApiError> {
    if state.authorizer.can_subscribe(principal, Topic::Workflow) {
        Ok(())
    } else {
        Err(BoardError::Forbidden {
            principal: principal.name.clone(),
            action: "view the workflow board".to_string(),
        }
        .into())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/board", get(get_board))
        .route("/api/items", post(create_item))
        .route("/api/items/{id}", get(get_item).delete(delete_item))
        .route("/api/items/{id}/move", patch(move_item))
        .route("/api/counts/pending", get(pending_count))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_board(
    State(state): State<SharedState>,
    Caller(principal): Caller,
) -> Result<impl IntoResponse, ApiError> {
    require_board_access(&state, &principal)?;
    let snapshot = state.board_cache.get_snapshot().await?;
    Ok(Json(snapshot))
}

async fn create_item(
    State(state): State<SharedState>,
    Caller(principal): Caller,
    Json(req): Json<CreateItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .coordinator
        .create_item(
            &principal,
            &req.title,
            req.description.as_deref().unwrap_or_default(),
            req.column.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_item(
    State(state): State<SharedState>,
    Caller(principal): Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    require_board_access(&state, &principal)?;
    let item = state.coordinator.get_item(id).await?;
    Ok(Json(item))
}

async fn move_item(
    State(state): State<SharedState>,
    Caller(principal): Caller,
    Path(id): Path<i64>,
    Json(req): Json<MoveItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .coordinator
        .move_item(&principal, id, &req.column, req.position)
        .await?;
    Ok(Json(item))
}

async fn delete_item(
    State(state): State<SharedState>,
    Caller(principal): Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.delete_item(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pending_count(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let predicate = CountPredicate::pending();
    let count = state.counter.get_count(predicate).await?;
    Ok(Json(CountResponse {
        key: predicate.cache_key(),
        count,
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────
