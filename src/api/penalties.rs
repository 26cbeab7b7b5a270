//! Penalty endpoints: manual accrual and waiving.

use crate::{
    api::AppState,
    core::{client::get_client_by_id, loan},
    errors::Result,
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

/// Body for `POST /api/penalties`.
#[derive(Debug, Deserialize)]
pub struct CreatePenaltyRequest {
    /// Loan to penalize
    pub loan_id: i64,
    /// Penalty amount
    pub amount: f64,
    /// Why the penalty is applied
    pub reason: String,
}

/// `POST /api/penalties`
pub async fn create_penalty(
    State(state): State<AppState>,
    Json(body): Json<CreatePenaltyRequest>,
) -> Result<Json<Value>> {
    let created = loan::accrue_penalty(&state.db, body.loan_id, body.amount, &body.reason).await?;

    if let Some(client) = get_client_by_id(&state.db, created.client_id).await? {
        let message = format!(
            "Dear {}, a penalty of KES {:.2} has been applied to your loan: {}.",
            client.name, created.amount, created.reason
        );
        state.notifier.send(&client.phone, &message).await;
    }

    Ok(Json(json!({
        "success": true,
        "message": "Penalty applied successfully",
        "data": created,
    })))
}

/// `PUT /api/penalties/{id}/waive`
pub async fn waive_penalty(
    State(state): State<AppState>,
    Path(penalty_id): Path<i64>,
) -> Result<Json<Value>> {
    let waived = loan::waive_penalty(&state.db, penalty_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Penalty waived successfully",
        "data": waived,
    })))
}
