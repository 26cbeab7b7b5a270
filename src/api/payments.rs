//! Payment endpoints: push initiation, the gateway callback, and the
//! fallback status poll.

use crate::{
    api::AppState,
    core::{
        payment::{
            self, PaymentStatus, PushPaymentRequest, SettleOutcome, get_payment_by_reference,
        },
        reconcile::{self, CallbackEnvelope, ReconcileOutcome},
    },
    errors::{Error, Result},
    gateway::StatusOutcome,
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

/// Body for `POST /api/payments/push`.
#[derive(Debug, Deserialize)]
pub struct PushRequest {
    /// Payer phone number
    pub phone: String,
    /// Amount to collect
    pub amount: f64,
    /// Loan being repaid, when known
    pub loan_id: Option<i64>,
    /// Paying client, when known
    pub client_id: Option<i64>,
    /// Account reference override (`LOAN<id>` by default, `PEN<id>` for
    /// penalty collection)
    pub account_reference: Option<String>,
}

/// `POST /api/payments/push`
pub async fn initiate_push(
    State(state): State<AppState>,
    Json(body): Json<PushRequest>,
) -> Result<Json<Value>> {
    let receipt = payment::initiate_push_payment(
        &state.db,
        &state.gateway,
        PushPaymentRequest {
            phone: body.phone,
            amount: body.amount,
            loan_id: body.loan_id,
            client_id: body.client_id,
            account_reference: body.account_reference,
        },
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": receipt.customer_message,
        "checkoutRequestID": receipt.checkout_request_id,
        "data": receipt.payment,
    })))
}

/// `POST /api/payments/callback`
///
/// The gateway's retry behavior on non-200 responses is opaque, so this
/// handler acknowledges success at the transport level no matter what
/// happened internally; anomalies are flagged through logging, not status
/// codes, to prevent gateway-side retry storms.
pub async fn gateway_callback(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    match serde_json::from_value::<CallbackEnvelope>(body) {
        Ok(envelope) => {
            let callback = envelope.body.stk_callback;
            match reconcile::process_callback(&state.db, state.notifier.as_ref(), &callback).await
            {
                Ok(ReconcileOutcome::Applied { loan, .. }) => {
                    info!(
                        reference = %callback.checkout_request_id,
                        loan_id = loan.id,
                        "Callback reconciled"
                    );
                }
                Ok(ReconcileOutcome::AlreadySettled { .. }) => {
                    info!(
                        reference = %callback.checkout_request_id,
                        "Replayed callback acknowledged"
                    );
                }
                Ok(ReconcileOutcome::Unmatched { .. } | ReconcileOutcome::Failed { .. }) => {}
                Err(e) => {
                    // Flagged for operator review; still acknowledged below
                    error!(
                        reference = %callback.checkout_request_id,
                        error = %e,
                        "Callback processing failed"
                    );
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "Discarding callback with unrecognized shape");
        }
    }

    Json(json!({ "ResultCode": 0, "ResultDesc": "Callback received successfully" }))
}

/// `GET /api/payments/{reference}/status`
///
/// Returns the local row when it is already terminal; otherwise polls the
/// gateway. The poll is read-only on the gateway side and carries no payer
/// metadata, so a verdict learned here settles the payment against whatever
/// loan it was recorded for; attribution of unmatched funds stays with the
/// callback path.
pub async fn check_status(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<Value>> {
    let row = get_payment_by_reference(&state.db, &reference)
        .await?
        .ok_or_else(|| Error::PaymentNotFound {
            reference: reference.clone(),
        })?;

    if row.status != PaymentStatus::Pending.as_str() {
        return Ok(Json(json!({
            "success": true,
            "status": row.status,
            "data": row,
        })));
    }

    match state.gateway.query_status(&reference).await? {
        StatusOutcome::NotReady => Ok(Json(json!({
            "success": true,
            "status": "pending",
            "message": "Transaction is still being processed",
            "data": row,
        }))),
        StatusOutcome::Settled {
            result_code,
            description,
        } => {
            let outcome = if result_code == "0" {
                SettleOutcome::Success
            } else {
                SettleOutcome::Failure
            };
            let settlement =
                payment::settle_payment(&state.db, &reference, None, outcome, None).await?;
            Ok(Json(json!({
                "success": true,
                "status": settlement.payment.status,
                "message": description,
                "data": settlement.payment,
            })))
        }
    }
}
