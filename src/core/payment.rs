//! Payment ledger operations: recording push-payment attempts and settling
//! them exactly once.
//!
//! `settle_payment` is the system's core defense against duplicated or
//! replayed gateway callbacks: the terminal-status write is a conditional
//! UPDATE guarded on `status = 'pending'`, and the loan balance application
//! happens inside the same transaction, so a payment can settle at most once
//! no matter how many times its callback is delivered.

use crate::{
    core::loan::{apply_payment_on, mark_penalty_paid_on},
    entities::{Loan, Payment, loan, payment, penalty},
    errors::{Error, Result},
    gateway::GatewayClient,
};
use chrono::Utc;
use sea_orm::{Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::warn;

/// Account references carrying this prefix settle a penalty rather than a
/// plain installment.
pub const PENALTY_REF_PREFIX: &str = "PEN";

/// Payment lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    /// Prompt issued, awaiting the gateway's verdict
    Pending,
    /// Settled successfully; terminal
    Completed,
    /// Settled as failed; terminal
    Failed,
}

impl PaymentStatus {
    /// Canonical string form, as stored on the payment row.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Final verdict for a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The payer completed the payment
    Success,
    /// The payment failed or was cancelled
    Failure,
}

/// A loan to attach to a payment at settlement time, resolved by the
/// reconciliation engine when the payment was recorded without one.
#[derive(Debug, Clone, Copy)]
pub struct LoanAttachment {
    /// Loan to apply the payment to
    pub loan_id: i64,
    /// Client who holds that loan
    pub client_id: i64,
}

/// The result of a settlement attempt.
#[derive(Debug, Clone)]
pub struct Settlement {
    /// The payment row after settlement
    pub payment: payment::Model,
    /// The loan the payment was applied to, if any
    pub loan: Option<loan::Model>,
    /// The penalty collected by this payment, if it carried a penalty marker
    pub penalty: Option<penalty::Model>,
    /// True when the payment was already terminal and nothing was written
    pub already_settled: bool,
}

/// Fields for recording a new pending payment.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    /// Unique external reference (gateway checkout id or internal reference)
    pub reference: String,
    /// Account reference supplied at prompt time
    pub account_reference: Option<String>,
    /// Loan the payment is intended for, when known
    pub loan_id: Option<i64>,
    /// Client who is paying, when known
    pub client_id: Option<i64>,
    /// Expected amount
    pub amount: f64,
    /// Payment method (`"mpesa"`, `"cash"`)
    pub method: String,
}

/// Records a payment attempt with status `pending`.
///
/// First writer wins: if any payment already carries this reference the call
/// fails with [`Error::DuplicateReference`] and nothing is written. The
/// unique index on the reference column backs this check against races.
pub async fn record_payment(db: &DatabaseConnection, fields: RecordPayment) -> Result<payment::Model> {
    if !fields.amount.is_finite() || fields.amount < 0.0 {
        return Err(Error::InvalidAmount {
            amount: fields.amount,
        });
    }
    if fields.reference.trim().is_empty() {
        return Err(Error::Validation {
            message: "Payment reference cannot be empty".to_string(),
        });
    }

    let existing = Payment::find()
        .filter(payment::Column::Reference.eq(fields.reference.as_str()))
        .one(db)
        .await?;
    if existing.is_some() {
        return Err(Error::DuplicateReference {
            reference: fields.reference,
        });
    }

    let model = payment::ActiveModel {
        loan_id: Set(fields.loan_id),
        client_id: Set(fields.client_id),
        amount: Set(fields.amount),
        method: Set(fields.method),
        reference: Set(fields.reference),
        account_reference: Set(fields.account_reference),
        receipt_code: Set(None),
        status: Set(PaymentStatus::Pending.as_str().to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    let result = model.insert(db).await?;
    Ok(result)
}

/// Finds a payment by its unique external reference.
pub async fn get_payment_by_reference(
    db: &DatabaseConnection,
    reference: &str,
) -> Result<Option<payment::Model>> {
    Payment::find()
        .filter(payment::Column::Reference.eq(reference))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Settles the payment with the given reference, exactly once.
///
/// Runs as a single transaction:
/// - an already-terminal payment is returned unchanged (idempotent no-op);
/// - the terminal-status write is conditional on `status = 'pending'`, so a
///   racing settlement loses cleanly and is reported as already settled;
/// - on [`SettleOutcome::Success`] the amount is applied to the payment's
///   loan (or to `fallback` when the row has none) in the same transaction;
/// - a success whose account reference carries the penalty marker also
///   flips the named penalty to `paid`;
/// - on [`SettleOutcome::Failure`] the status becomes `failed` with no
///   ledger side effect.
pub async fn settle_payment(
    db: &DatabaseConnection,
    reference: &str,
    receipt_code: Option<&str>,
    outcome: SettleOutcome,
    fallback: Option<LoanAttachment>,
) -> Result<Settlement> {
    let txn = db.begin().await?;

    let pending = Payment::find()
        .filter(payment::Column::Reference.eq(reference))
        .one(&txn)
        .await?
        .ok_or_else(|| Error::PaymentNotFound {
            reference: reference.to_string(),
        })?;

    if pending.status != PaymentStatus::Pending.as_str() {
        txn.commit().await?;
        return Ok(Settlement {
            payment: pending,
            loan: None,
            penalty: None,
            already_settled: true,
        });
    }

    let attachment = pending
        .loan_id
        .map(|loan_id| LoanAttachment {
            loan_id,
            client_id: pending.client_id.unwrap_or_default(),
        })
        .or(fallback);

    let terminal = match outcome {
        SettleOutcome::Success => PaymentStatus::Completed,
        SettleOutcome::Failure => PaymentStatus::Failed,
    };

    let mut update = Payment::update_many()
        .col_expr(payment::Column::Status, Expr::value(terminal.as_str()))
        .col_expr(
            payment::Column::ReceiptCode,
            Expr::value(receipt_code.map(ToString::to_string)),
        )
        .filter(payment::Column::Id.eq(pending.id))
        .filter(payment::Column::Status.eq(PaymentStatus::Pending.as_str()));
    if pending.loan_id.is_none() {
        if let Some(attach) = attachment {
            update = update
                .col_expr(payment::Column::LoanId, Expr::value(Some(attach.loan_id)))
                .col_expr(
                    payment::Column::ClientId,
                    Expr::value(Some(attach.client_id)),
                );
        }
    }
    let written = update.exec(&txn).await?;

    if written.rows_affected == 0 {
        // A concurrent settlement won the conditional write
        let current = Payment::find_by_id(pending.id)
            .one(&txn)
            .await?
            .ok_or_else(|| Error::PaymentNotFound {
                reference: reference.to_string(),
            })?;
        txn.commit().await?;
        return Ok(Settlement {
            payment: current,
            loan: None,
            penalty: None,
            already_settled: true,
        });
    }

    let mut applied_loan = None;
    let mut collected_penalty = None;
    if outcome == SettleOutcome::Success {
        if let Some(attach) = attachment {
            applied_loan = Some(apply_payment_on(&txn, attach.loan_id, pending.amount).await?);
        }
        if let Some(penalty_id) = penalty_id_from_account_reference(&pending.account_reference) {
            collected_penalty = Some(mark_penalty_paid_on(&txn, penalty_id).await?);
        }
    }

    let payment = Payment::find_by_id(pending.id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::PaymentNotFound {
            reference: reference.to_string(),
        })?;

    txn.commit().await?;

    Ok(Settlement {
        payment,
        loan: applied_loan,
        penalty: collected_penalty,
        already_settled: false,
    })
}

/// Extracts the penalty id from a `PEN<id>`-style account reference.
fn penalty_id_from_account_reference(account_reference: &Option<String>) -> Option<i64> {
    let reference = account_reference.as_deref()?;
    let digits = reference.strip_prefix(PENALTY_REF_PREFIX)?;
    match digits.parse::<i64>() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(reference, "Penalty-marked reference with unparseable id");
            None
        }
    }
}

/// A push-payment prompt request.
#[derive(Debug, Clone)]
pub struct PushPaymentRequest {
    /// Payer phone number (any accepted local or international form)
    pub phone: String,
    /// Amount to collect
    pub amount: f64,
    /// Loan the collection is for, when known
    pub loan_id: Option<i64>,
    /// Paying client, when known
    pub client_id: Option<i64>,
    /// Account reference; defaults to `LOAN<id>` when a loan is given
    pub account_reference: Option<String>,
}

/// The result of issuing a push-payment prompt.
#[derive(Debug, Clone)]
pub struct PushReceipt {
    /// The gateway's checkout identifier for this attempt
    pub checkout_request_id: String,
    /// Human-readable prompt-sent message from the gateway
    pub customer_message: String,
    /// The pending payment recorded for the attempt
    pub payment: payment::Model,
}

/// Issues a push-payment prompt and records the pending [`payment::Model`]
/// keyed by the returned checkout identifier.
///
/// The gateway call happens first; a rejected push creates no payment row,
/// and a duplicate reference is rejected rather than silently duplicated.
pub async fn initiate_push_payment(
    db: &DatabaseConnection,
    gateway: &GatewayClient,
    request: PushPaymentRequest,
) -> Result<PushReceipt> {
    if !request.amount.is_finite() || request.amount <= 0.0 {
        return Err(Error::InvalidAmount {
            amount: request.amount,
        });
    }

    let (loan, client_id) = match request.loan_id {
        Some(loan_id) => {
            let loan = Loan::find_by_id(loan_id)
                .one(db)
                .await?
                .ok_or(Error::LoanNotFound { id: loan_id })?;
            let client_id = loan.client_id;
            (Some(loan), request.client_id.or(Some(client_id)))
        }
        None => (None, request.client_id),
    };

    let account_reference = request.account_reference.unwrap_or_else(|| {
        loan.as_ref()
            .map_or_else(|| "PAYMENT".to_string(), |l| format!("LOAN{}", l.id))
    });
    let description = loan.as_ref().map_or_else(
        || "Loan repayment".to_string(),
        |l| format!("Loan repayment - {}", l.id),
    );

    let push = gateway
        .initiate_push(
            &request.phone,
            request.amount,
            &account_reference,
            &description,
        )
        .await?;

    let payment = record_payment(
        db,
        RecordPayment {
            reference: push.checkout_request_id.clone(),
            account_reference: Some(account_reference),
            loan_id: loan.as_ref().map(|l| l.id),
            client_id,
            amount: request.amount,
            method: "mpesa".to_string(),
        },
    )
    .await?;

    Ok(PushReceipt {
        checkout_request_id: push.checkout_request_id,
        customer_message: push.customer_message,
        payment,
    })
}
