//! Inbound transport server.
//!
//! Counterparties publish marshalled envelopes with
//! `POST /inbound/:subject`. Only this participant's subject is served and
//! only bearer tokens it has vended are accepted; accepted bodies are queued
//! for the dispatch loop.

use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{Arc, RwLock},
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::EngineError;

const CODE_UNKNOWN_SUBJECT: &str = "UNKNOWN_SUBJECT";
const CODE_UNAUTHORIZED: &str = "UNAUTHORIZED";
const CODE_FORBIDDEN: &str = "FORBIDDEN";
const CODE_UNAVAILABLE: &str = "INBOX_UNAVAILABLE";

/// Bearer tokens this participant has vended to counterparties.
#[derive(Clone, Default)]
pub struct AuthorizedTokens {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl AuthorizedTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>) -> Result<(), EngineError> {
        self.inner
            .write()
            .map_err(|_| EngineError::ProtocolViolation("authorized token set poisoned".into()))?
            .insert(token.into());
        Ok(())
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.inner
            .write()
            .map(|mut tokens| tokens.remove(token))
            .unwrap_or(false)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.inner
            .read()
            .map(|tokens| tokens.contains(token))
            .unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct InboundState {
    subject: Arc<str>,
    tokens: AuthorizedTokens,
    inbox: mpsc::Sender<Vec<u8>>,
}

impl InboundState {
    pub fn new(subject: &str, tokens: AuthorizedTokens, inbox: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            subject: Arc::from(subject),
            tokens,
            inbox,
        }
    }
}

pub fn inbound_router(state: InboundState) -> Router {
    Router::new()
        .route("/inbound/:subject", post(publish_handler))
        .with_state(state)
}

async fn publish_handler(
    State(state): State<InboundState>,
    Path(subject): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, InboundError> {
    if subject != *state.subject {
        return Err(InboundError::new(
            StatusCode::NOT_FOUND,
            CODE_UNKNOWN_SUBJECT,
            format!("subject {} is not served here", subject),
        ));
    }

    let token = bearer_token(&headers).ok_or_else(|| {
        InboundError::new(
            StatusCode::UNAUTHORIZED,
            CODE_UNAUTHORIZED,
            "missing bearer token",
        )
    })?;
    if !state.tokens.contains(token) {
        warn!(%subject, "rejected publish with unknown bearer token");
        return Err(InboundError::new(
            StatusCode::FORBIDDEN,
            CODE_FORBIDDEN,
            "bearer token was not issued by this participant",
        ));
    }

    state.inbox.send(body.to_vec()).await.map_err(|_| {
        InboundError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            CODE_UNAVAILABLE,
            "dispatch loop is not running",
        )
    })?;
    debug!(%subject, bytes = body.len(), "queued inbound message");
    Ok(StatusCode::ACCEPTED)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

struct InboundError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl InboundError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: String,
    error_code: &'static str,
}

impl IntoResponse for InboundError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            error_code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Handle to a running inbound server.
pub struct Subscription {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl Subscription {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting messages and wait for the server to drain.
    pub async fn unsubscribe(self) -> Result<(), EngineError> {
        self.cancel.cancel();
        self.handle
            .await
            .map_err(|e| EngineError::Transport(format!("inbound server task: {}", e)))??;
        info!(addr = %self.local_addr, "inbound server stopped");
        Ok(())
    }
}

/// Bind `addr` and serve [`inbound_router`] until the subscription is
/// cancelled.
pub async fn serve_inbound(addr: SocketAddr, state: InboundState) -> Result<Subscription, EngineError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    let subject = state.subject.clone();

    let handle = tokio::spawn(async move {
        axum::serve(listener, inbound_router(state).into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    info!(addr = %local_addr, subject = %subject, "inbound server listening");
    Ok(Subscription {
        local_addr,
        cancel,
        handle,
    })
}
