//! Loan endpoints: application, review, and repayment start.

use crate::{
    api::AppState,
    core::{
        client::get_client_by_id,
        loan::{self, LoanStatus, NewLoan},
    },
    errors::{Error, Result},
};
use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

/// Body for `POST /api/loans`.
#[derive(Debug, Deserialize)]
pub struct CreateLoanRequest {
    /// Client applying for the loan
    pub client_id: i64,
    /// Principal amount
    pub principal: f64,
    /// Flat interest rate in percent
    pub interest_rate: f64,
    /// Penalty rate in percent per missed installment
    pub penalty_rate: f64,
    /// Term length
    pub term: i32,
    /// Term unit (`"days"`, `"weeks"`, `"months"`)
    pub term_unit: String,
    /// Installment cadence (`"daily"`, `"weekly"`, `"monthly"`)
    pub installment_frequency: String,
}

/// Body for `PUT /api/loans/{id}/start`.
#[derive(Debug, Default, Deserialize)]
pub struct StartRepaymentRequest {
    /// First repayment date; defaults to today
    pub payment_start_date: Option<NaiveDate>,
}

/// `POST /api/loans`
pub async fn create_loan(
    State(state): State<AppState>,
    Json(body): Json<CreateLoanRequest>,
) -> Result<Json<Value>> {
    let created = loan::create_loan(
        &state.db,
        NewLoan {
            client_id: body.client_id,
            principal: body.principal,
            interest_rate: body.interest_rate,
            penalty_rate: body.penalty_rate,
            term: body.term,
            term_unit: body.term_unit,
            installment_frequency: body.installment_frequency,
        },
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Loan created successfully",
        "data": created,
    })))
}

/// `GET /api/loans`
pub async fn list_loans(State(state): State<AppState>) -> Result<Json<Value>> {
    let loans = loan::list_loans(&state.db).await?;
    Ok(Json(json!({ "success": true, "data": loans })))
}

/// `GET /api/loans/{id}`
pub async fn get_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<i64>,
) -> Result<Json<Value>> {
    let found = loan::get_loan_by_id(&state.db, loan_id)
        .await?
        .ok_or(Error::LoanNotFound { id: loan_id })?;
    let penalties = loan::list_penalties_for_loan(&state.db, loan_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "loan": found, "penalties": penalties },
    })))
}

/// `PUT /api/loans/{id}/approve`
pub async fn approve_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<i64>,
) -> Result<Json<Value>> {
    let approved =
        loan::transition_loan_status(&state.db, loan_id, LoanStatus::Pending, LoanStatus::Approved)
            .await?;

    // Approval notice is best effort and never blocks the response
    if let Some(client) = get_client_by_id(&state.db, approved.client_id).await? {
        let message = format!(
            "Dear {}, your loan of KES {:.2} has been approved.",
            client.name, approved.principal
        );
        state.notifier.send(&client.phone, &message).await;
    }

    Ok(Json(json!({
        "success": true,
        "message": "Loan approved successfully",
        "data": approved,
    })))
}

/// `PUT /api/loans/{id}/reject`
pub async fn reject_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<i64>,
) -> Result<Json<Value>> {
    let rejected =
        loan::transition_loan_status(&state.db, loan_id, LoanStatus::Pending, LoanStatus::Rejected)
            .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Loan rejected",
        "data": rejected,
    })))
}

/// `PUT /api/loans/{id}/start`
pub async fn start_repayment(
    State(state): State<AppState>,
    Path(loan_id): Path<i64>,
    body: Option<Json<StartRepaymentRequest>>,
) -> Result<Json<Value>> {
    let start_date = body
        .and_then(|Json(b)| b.payment_start_date)
        .unwrap_or_else(|| Utc::now().date_naive());

    let started = loan::start_repayment(&state.db, loan_id, start_date).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Repayment started",
        "data": started,
    })))
}
