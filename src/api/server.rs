//! HTTP server for the rate limit action interface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::action::{ActionRequest, ErrorResponse};
use super::service::ActionService;
use crate::error::{Result, TollboothError};
use crate::ratelimit::Clock;
use crate::store::LimitStore;

/// Path of the action endpoint.
pub const ACTION_PATH: &str = "/v1/ratelimit";

impl IntoResponse for TollboothError {
    fn into_response(self) -> Response {
        let status = match &self {
            TollboothError::Validation(_) => StatusCode::BAD_REQUEST,
            TollboothError::Unauthorized => StatusCode::UNAUTHORIZED,
            TollboothError::Storage(_) | TollboothError::Config(_) | TollboothError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = if status.is_server_error() {
            error!(error = %self, "Action failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

struct AppState<S: LimitStore, C: Clock> {
    service: Arc<ActionService<S, C>>,
    identity_header: HeaderName,
}

impl<S: LimitStore, C: Clock> Clone for AppState<S, C> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            identity_header: self.identity_header.clone(),
        }
    }
}

/// Build the router serving the action interface and the health probe.
pub fn router<S, C>(service: Arc<ActionService<S, C>>, identity_header: HeaderName) -> Router
where
    S: LimitStore + 'static,
    C: Clock + 'static,
{
    Router::new()
        .route(ACTION_PATH, post(handle_action::<S, C>))
        .route("/health", get(health))
        .with_state(AppState {
            service,
            identity_header,
        })
}

async fn handle_action<S, C>(
    State(state): State<AppState<S, C>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ActionRequest>, JsonRejection>,
) -> Response
where
    S: LimitStore + 'static,
    C: Clock + 'static,
{
    let caller = headers
        .get(&state.identity_header)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty());
    if caller.is_none() {
        return TollboothError::Unauthorized.into_response();
    }

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected malformed action body");
            return TollboothError::validation(rejection.body_text()).into_response();
        }
    };

    match state.service.handle(caller, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            if err.is_client_error() {
                warn!(error = %err, "Rejected action");
            }
            err.into_response()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

/// HTTP server for the rate limit service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server around an action service.
    pub fn new<S, C>(addr: SocketAddr, service: Arc<ActionService<S, C>>, identity_header: HeaderName) -> Self
    where
        S: LimitStore + 'static,
        C: Clock + 'static,
    {
        Self {
            addr,
            router: router(service, identity_header),
        }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            TollboothError::Io(e)
        })?;

        info!(
            addr = %self.addr,
            path = ACTION_PATH,
            "Starting HTTP server for rate limit actions"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                TollboothError::Io(e)
            })
    }
}
