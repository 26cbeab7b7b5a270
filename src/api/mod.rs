//! HTTP API surface.
//!
//! Thin JSON handlers over the core: routing, extraction, and status-code
//! mapping live here and nothing else does. The callback route is the one
//! with special transport semantics (it always acknowledges success to the
//! gateway); everything else maps core errors onto status codes through
//! [`Error`]'s `IntoResponse` impl, which never leaks gateway payloads or
//! internal details.

pub mod clients;
pub mod loans;
pub mod payments;
pub mod penalties;

use crate::{errors::Error, gateway::GatewayClient, notify::Notifier};
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Ledger store connection
    pub db: DatabaseConnection,
    /// Outbound gateway client
    pub gateway: Arc<GatewayClient>,
    /// Notification sink
    pub notifier: Arc<dyn Notifier>,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/clients",
            post(clients::create_client).get(clients::list_clients),
        )
        .route("/api/loans", post(loans::create_loan).get(loans::list_loans))
        .route("/api/loans/{id}", get(loans::get_loan))
        .route("/api/loans/{id}/approve", put(loans::approve_loan))
        .route("/api/loans/{id}/reject", put(loans::reject_loan))
        .route("/api/loans/{id}/start", put(loans::start_repayment))
        .route("/api/payments/push", post(payments::initiate_push))
        .route("/api/payments/callback", post(payments::gateway_callback))
        .route(
            "/api/payments/{reference}/status",
            get(payments::check_status),
        )
        .route("/api/penalties", post(penalties::create_penalty))
        .route("/api/penalties/{id}/waive", put(penalties::waive_penalty))
        .with_state(state)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation { .. } | Self::InvalidAmount { .. } | Self::MalformedCallback { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            Self::ClientNotFound { .. }
            | Self::LoanNotFound { .. }
            | Self::PaymentNotFound { .. }
            | Self::PenaltyNotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            Self::DuplicateReference { .. } | Self::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, self.to_string())
            }
            Self::GatewayRejected { .. } => (StatusCode::BAD_GATEWAY, self.to_string()),
            // Upstream errors can carry URLs and credentials; sanitize
            Self::GatewayUnavailable(e) => {
                error!(error = %e, "Gateway unreachable");
                (
                    StatusCode::BAD_GATEWAY,
                    "Payment gateway unavailable".to_string(),
                )
            }
            Self::Database(_) | Self::Io(_) | Self::EnvVar(_) | Self::Config { .. } => {
                error!(error = %self, "Internal error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}
