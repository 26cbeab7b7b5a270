//! Reconciliation engine - turns asynchronous gateway callbacks into
//! exactly-once ledger effects.
//!
//! Callbacks may arrive duplicated, out of order, or ahead of the local
//! payment record. The engine leans on [`settle_payment`]'s idempotent
//! conditional write for replay safety, creates best-effort rows for
//! callbacks with no local record, and never attributes funds to a loan it
//! could not positively resolve.

use crate::{
    core::{
        client::find_client_by_phone,
        loan::get_open_loan_for_client,
        payment::{
            LoanAttachment, RecordPayment, SettleOutcome, Settlement, get_payment_by_reference,
            record_payment, settle_payment,
        },
    },
    entities::{loan, payment},
    errors::{Error, Result},
    notify::Notifier,
};
use sea_orm::{IntoActiveModel, Set, prelude::*};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

/// Result code the gateway uses for a successful payment.
pub const RESULT_CODE_SUCCESS: i64 = 0;

/// Tag set on a best-effort payment row created for a callback that had no
/// matching local record.
pub const UNRECORDED_TAG: &str = "UNRECORDED";

/// Prefix tagged onto payments whose payer could not be resolved to a
/// client. These require operator reconciliation and are never applied to
/// any loan.
pub const UNMATCHED_PREFIX: &str = "OTHER-";

/// Full callback envelope as delivered by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackEnvelope {
    /// Payload body
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

/// Body wrapper around the STK callback.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackBody {
    /// The callback itself
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

/// One push-payment confirmation from the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    /// Gateway-side merchant request id
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    /// Checkout identifier: the handle for one push-payment attempt
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    /// Numeric result code; zero means success
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    /// Human-readable result description
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    /// Metadata items, present on success
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

/// Named metadata items attached to a successful callback.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    /// The items themselves
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

/// A single name/value metadata pair.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    /// Item name (`"Amount"`, `"MpesaReceiptNumber"`, ...)
    #[serde(rename = "Name")]
    pub name: String,
    /// Item value; the gateway mixes numbers and strings freely
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

/// Settlement fields extracted from a successful callback.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementDetails {
    /// Settled amount
    pub amount: f64,
    /// Gateway receipt code
    pub receipt: String,
    /// Payer phone number in international form
    pub phone: String,
    /// Gateway transaction time, as delivered
    pub transaction_time: Option<String>,
}

/// What the engine did with a callback.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// Settled successfully and applied to the payer's open loan
    Applied {
        /// The settled payment
        payment: payment::Model,
        /// The loan after application
        loan: loan::Model,
    },
    /// The payment was already terminal; nothing was written
    AlreadySettled {
        /// The existing terminal payment
        payment: payment::Model,
    },
    /// Settled successfully but the payer could not be resolved; tagged for
    /// operator reconciliation
    Unmatched {
        /// The settled but unattributed payment
        payment: payment::Model,
    },
    /// The gateway reported a failure; no ledger effect
    Failed {
        /// The failed payment
        payment: payment::Model,
    },
}

impl StkCallback {
    /// Extracts the required success fields, defensively.
    ///
    /// # Errors
    /// [`Error::MalformedCallback`] when a reported-success callback is
    /// missing amount, receipt code, or payer phone.
    pub fn settlement_details(&self) -> Result<SettlementDetails> {
        let items = self
            .callback_metadata
            .as_ref()
            .map(|m| m.items.as_slice())
            .unwrap_or_default();

        let amount = items
            .iter()
            .find(|i| i.name == "Amount")
            .and_then(|i| value_as_f64(i.value.as_ref()));
        let receipt = items
            .iter()
            .find(|i| i.name == "MpesaReceiptNumber")
            .and_then(|i| value_as_string(i.value.as_ref()));
        let phone = items
            .iter()
            .find(|i| i.name == "PhoneNumber")
            .and_then(|i| value_as_string(i.value.as_ref()));
        let transaction_time = items
            .iter()
            .find(|i| i.name == "TransactionDate")
            .and_then(|i| value_as_string(i.value.as_ref()));

        match (amount, receipt, phone) {
            (Some(amount), Some(receipt), Some(phone)) => Ok(SettlementDetails {
                amount,
                receipt,
                phone,
                transaction_time,
            }),
            (amount, receipt, phone) => Err(Error::MalformedCallback {
                message: format!(
                    "Success callback {} missing required metadata (amount: {}, receipt: {}, phone: {})",
                    self.checkout_request_id,
                    amount.is_some(),
                    receipt.is_some(),
                    phone.is_some(),
                ),
            }),
        }
    }
}

fn value_as_f64(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Processes one gateway callback end to end.
///
/// The transport layer acknowledges the gateway with a success response no
/// matter what this returns; an `Err` here means the anomaly was flagged for
/// operator review, not that the gateway should retry.
pub async fn process_callback(
    db: &DatabaseConnection,
    notifier: &dyn Notifier,
    callback: &StkCallback,
) -> Result<ReconcileOutcome> {
    let reference = callback.checkout_request_id.as_str();
    let success = callback.result_code == RESULT_CODE_SUCCESS;

    // 1. Parse metadata defensively before touching the ledger
    let details = if success {
        Some(callback.settlement_details()?)
    } else {
        None
    };

    // 2. Find the pending payment; a callback can legitimately arrive before
    //    (or without) a matching local record
    let existing = get_payment_by_reference(db, reference).await?;
    let payment_row = match existing {
        Some(row) => row,
        None => {
            warn!(
                reference,
                "Callback for unknown checkout id; recording best-effort payment for manual review"
            );
            let amount = details.as_ref().map_or(0.0, |d| d.amount);
            match record_payment(
                db,
                RecordPayment {
                    reference: reference.to_string(),
                    account_reference: Some(UNRECORDED_TAG.to_string()),
                    loan_id: None,
                    client_id: None,
                    amount,
                    method: "mpesa".to_string(),
                },
            )
            .await
            {
                Ok(row) => row,
                // The initiation path won the race; use its row
                Err(Error::DuplicateReference { .. }) => get_payment_by_reference(db, reference)
                    .await?
                    .ok_or_else(|| Error::PaymentNotFound {
                        reference: reference.to_string(),
                    })?,
                Err(e) => return Err(e),
            }
        }
    };

    // 3/4. Resolve the payer to a client and their open loan when the row
    //      has no attachment yet; resolution must precede settlement so the
    //      application happens inside the settlement transaction
    let mut fallback = None;
    if success && payment_row.loan_id.is_none() {
        if let Some(d) = &details {
            if let Some(client) = find_client_by_phone(db, &d.phone).await? {
                if let Some(open) = get_open_loan_for_client(db, client.id).await? {
                    fallback = Some(LoanAttachment {
                        loan_id: open.id,
                        client_id: client.id,
                    });
                } else {
                    warn!(
                        reference,
                        client_id = client.id,
                        "Payer resolved but holds no open loan"
                    );
                }
            }
        }
    }

    let outcome = if success {
        SettleOutcome::Success
    } else {
        SettleOutcome::Failure
    };
    let receipt = details.as_ref().map(|d| d.receipt.as_str());

    // Ledger-level conflicts are retried once, then escalated; the
    // idempotent settle guard makes the retry safe
    let settlement = match settle_payment(db, reference, receipt, outcome, fallback).await {
        Ok(s) => s,
        Err(e @ (Error::Database(_) | Error::InvalidTransition { .. })) => {
            warn!(reference, error = %e, "Settlement conflict; retrying once");
            settle_payment(db, reference, receipt, outcome, fallback).await?
        }
        Err(e) => return Err(e),
    };

    finish_settlement(db, notifier, settlement, details.as_ref()).await
}

/// Maps a completed settlement onto its reconciliation outcome, notifying
/// or tagging as needed.
async fn finish_settlement(
    db: &DatabaseConnection,
    notifier: &dyn Notifier,
    settlement: Settlement,
    details: Option<&SettlementDetails>,
) -> Result<ReconcileOutcome> {
    if settlement.already_settled {
        debug!(
            reference = %settlement.payment.reference,
            "Replayed callback ignored; payment already terminal"
        );
        return Ok(ReconcileOutcome::AlreadySettled {
            payment: settlement.payment,
        });
    }

    match (settlement.loan, details) {
        (Some(loan), details) => {
            if let Some(d) = details {
                notify_payment_received(db, notifier, &loan, d.amount).await;
            }
            info!(
                reference = %settlement.payment.reference,
                loan_id = loan.id,
                balance = loan.remaining_balance,
                "Payment settled and applied"
            );
            Ok(ReconcileOutcome::Applied {
                payment: settlement.payment,
                loan,
            })
        }
        (None, Some(d)) => {
            // Settled funds with no attributable loan: tag, surface, keep
            let tagged = tag_unmatched(db, settlement.payment, &d.receipt).await?;
            error!(
                reference = %tagged.reference,
                receipt = %d.receipt,
                "Settled payment could not be attributed to any client; flagged for operator reconciliation"
            );
            Ok(ReconcileOutcome::Unmatched { payment: tagged })
        }
        (None, None) => {
            debug!(
                reference = %settlement.payment.reference,
                "Failure callback settled; no ledger effect"
            );
            Ok(ReconcileOutcome::Failed {
                payment: settlement.payment,
            })
        }
    }
}

/// Tags a settled-but-unattributed payment for manual reconciliation. The
/// unique reference column is left untouched so replayed callbacks still
/// find the row.
async fn tag_unmatched(
    db: &DatabaseConnection,
    row: payment::Model,
    receipt: &str,
) -> Result<payment::Model> {
    let mut active = row.into_active_model();
    active.account_reference = Set(Some(format!("{UNMATCHED_PREFIX}{receipt}")));
    let updated = active.update(db).await?;
    Ok(updated)
}

async fn notify_payment_received(
    db: &DatabaseConnection,
    notifier: &dyn Notifier,
    loan: &loan::Model,
    amount: f64,
) {
    let client = match crate::entities::Client::find_by_id(loan.client_id).one(db).await {
        Ok(Some(client)) => client,
        Ok(None) => {
            warn!(loan_id = loan.id, "Loan references a missing client; skipping notification");
            return;
        }
        Err(e) => {
            warn!(loan_id = loan.id, error = %e, "Client lookup failed; skipping notification");
            return;
        }
    };

    let message = format!(
        "Dear {}, we have received your payment of KES {:.2}. Remaining balance KES {:.2}. Thank you.",
        client.name, amount, loan.remaining_balance
    );
    notifier.send(&client.phone, &message).await;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::loan::get_loan_by_id;
    use crate::test_utils::*;

    fn success_callback(checkout: &str, amount: f64, receipt: &str, phone: &str) -> StkCallback {
        StkCallback {
            merchant_request_id: Some("29115-34620561-1".to_string()),
            checkout_request_id: checkout.to_string(),
            result_code: RESULT_CODE_SUCCESS,
            result_desc: Some("The service request is processed successfully.".to_string()),
            callback_metadata: Some(CallbackMetadata {
                items: vec![
                    MetadataItem {
                        name: "Amount".to_string(),
                        value: Some(serde_json::json!(amount)),
                    },
                    MetadataItem {
                        name: "MpesaReceiptNumber".to_string(),
                        value: Some(serde_json::json!(receipt)),
                    },
                    MetadataItem {
                        name: "TransactionDate".to_string(),
                        value: Some(serde_json::json!(20_240_615_104_500_i64)),
                    },
                    MetadataItem {
                        name: "PhoneNumber".to_string(),
                        value: Some(serde_json::json!(phone.parse::<i64>().unwrap())),
                    },
                ],
            }),
        }
    }

    fn failure_callback(checkout: &str) -> StkCallback {
        StkCallback {
            merchant_request_id: None,
            checkout_request_id: checkout.to_string(),
            result_code: 1032,
            result_desc: Some("Request cancelled by user".to_string()),
            callback_metadata: None,
        }
    }

    #[tokio::test]
    async fn test_success_callback_applies_payment() -> Result<()> {
        let (db, client, loan) = setup_with_active_loan().await?;
        let notifier = RecordingNotifier::default();
        record_test_payment(&db, "CHK123", loan.id, 2_100.0).await?;

        let outcome = process_callback(
            &db,
            &notifier,
            &success_callback("CHK123", 2_100.0, "RCPT0001", &client.phone),
        )
        .await?;

        let ReconcileOutcome::Applied { payment, loan } = outcome else {
            panic!("expected Applied outcome");
        };
        assert_eq!(payment.status, "completed");
        assert_eq!(payment.receipt_code.as_deref(), Some("RCPT0001"));
        assert_eq!(loan.remaining_balance, 8_400.0);
        assert_eq!(loan.total_paid, 2_100.0);
        assert_eq!(loan.status, "active");

        // The client was told their new balance
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, client.phone);
        assert!(sent[0].1.contains("8400.00"));

        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_callback_is_noop() -> Result<()> {
        let (db, client, loan) = setup_with_active_loan().await?;
        let notifier = RecordingNotifier::default();
        record_test_payment(&db, "CHK123", loan.id, 2_100.0).await?;

        let callback = success_callback("CHK123", 2_100.0, "RCPT0001", &client.phone);
        process_callback(&db, &notifier, &callback).await?;
        let replay = process_callback(&db, &notifier, &callback).await?;

        assert!(matches!(replay, ReconcileOutcome::AlreadySettled { .. }));

        // Balance is 8400, not 6300
        let loan = get_loan_by_id(&db, loan.id).await?.unwrap();
        assert_eq!(loan.remaining_balance, 8_400.0);
        assert_eq!(loan.total_paid, 2_100.0);

        // No second notification either
        assert_eq!(notifier.sent().len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_checkout_resolves_by_phone() -> Result<()> {
        let (db, client, loan) = setup_with_active_loan().await?;
        let notifier = RecordingNotifier::default();

        // No local record exists for this checkout id
        let outcome = process_callback(
            &db,
            &notifier,
            &success_callback("CHK999", 2_100.0, "RCPT0009", &client.phone),
        )
        .await?;

        let ReconcileOutcome::Applied { payment, loan: applied } = outcome else {
            panic!("expected Applied outcome");
        };
        assert_eq!(payment.account_reference.as_deref(), Some(UNRECORDED_TAG));
        assert_eq!(payment.loan_id, Some(loan.id));
        assert_eq!(applied.remaining_balance, 8_400.0);

        Ok(())
    }

    #[tokio::test]
    async fn test_unresolvable_phone_is_tagged_not_applied() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;
        let notifier = RecordingNotifier::default();

        let outcome = process_callback(
            &db,
            &notifier,
            &success_callback("CHK777", 2_100.0, "RCPT0777", "254700000999"),
        )
        .await?;

        let ReconcileOutcome::Unmatched { payment } = outcome else {
            panic!("expected Unmatched outcome");
        };
        assert_eq!(payment.status, "completed");
        assert_eq!(
            payment.account_reference.as_deref(),
            Some("OTHER-RCPT0777")
        );
        assert!(payment.loan_id.is_none());

        // No loan was touched and nobody was notified
        let loan = get_loan_by_id(&db, loan.id).await?.unwrap();
        assert_eq!(loan.remaining_balance, 10_500.0);
        assert!(notifier.sent().is_empty());

        // A replay finds the settled row by its unchanged reference
        let replay = process_callback(
            &db,
            &notifier,
            &success_callback("CHK777", 2_100.0, "RCPT0777", "254700000999"),
        )
        .await?;
        assert!(matches!(replay, ReconcileOutcome::AlreadySettled { .. }));

        Ok(())
    }

    #[tokio::test]
    async fn test_failure_callback_settles_failed() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;
        let notifier = RecordingNotifier::default();
        record_test_payment(&db, "CHK500", loan.id, 2_100.0).await?;

        let outcome = process_callback(&db, &notifier, &failure_callback("CHK500")).await?;

        let ReconcileOutcome::Failed { payment } = outcome else {
            panic!("expected Failed outcome");
        };
        assert_eq!(payment.status, "failed");

        let loan = get_loan_by_id(&db, loan.id).await?.unwrap();
        assert_eq!(loan.remaining_balance, 10_500.0);
        assert_eq!(loan.total_paid, 0.0);
        assert!(notifier.sent().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_success_callback_rejected() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;
        let notifier = RecordingNotifier::default();
        record_test_payment(&db, "CHK600", loan.id, 2_100.0).await?;

        let mut callback = success_callback("CHK600", 2_100.0, "RCPT", "254712345678");
        callback
            .callback_metadata
            .as_mut()
            .unwrap()
            .items
            .retain(|i| i.name != "MpesaReceiptNumber");

        let result = process_callback(&db, &notifier, &callback).await;
        assert!(matches!(result, Err(Error::MalformedCallback { .. })));

        // The payment is untouched and still settleable
        let row = get_payment_by_reference(&db, "CHK600").await?.unwrap();
        assert_eq!(row.status, "pending");

        Ok(())
    }

    #[test]
    fn test_callback_envelope_deserializes_gateway_shape() {
        let raw = r#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": 2100.00},
                            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                            {"Name": "TransactionDate", "Value": 20191219102115},
                            {"Name": "PhoneNumber", "Value": 254708374149}
                        ]
                    }
                }
            }
        }"#;

        let envelope: CallbackEnvelope = serde_json::from_str(raw).unwrap();
        let callback = envelope.body.stk_callback;
        assert_eq!(callback.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(callback.result_code, 0);

        let details = callback.settlement_details().unwrap();
        assert_eq!(details.amount, 2100.0);
        assert_eq!(details.receipt, "NLJ7RT61SV");
        assert_eq!(details.phone, "254708374149");
    }

    #[test]
    fn test_failure_callback_needs_no_metadata() {
        let callback = failure_callback("CHK1");
        assert!(callback.settlement_details().is_err());
    }
}
