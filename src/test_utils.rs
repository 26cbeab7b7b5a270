//! Shared test utilities.
//!
//! Common helpers for setting up in-memory test databases and creating test
//! entities with sensible defaults. The default loan mirrors the reference
//! scenario used throughout the tests: principal 10000 at 5% over 5 monthly
//! installments of 2100.00, penalty rate 2.5%.

use crate::{
    core::{
        client,
        loan::{self, NewLoan},
        payment::{RecordPayment, record_payment},
    },
    entities,
    errors::{Error, Result},
    notify::Notifier,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::{DatabaseConnection, IntoActiveModel, Set, prelude::*};
use std::sync::Mutex;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Default loan terms for tests: 10000 at 5% over 5 monthly installments.
#[must_use]
pub fn test_loan_terms(client_id: i64) -> NewLoan {
    NewLoan {
        client_id,
        principal: 10_000.0,
        interest_rate: 5.0,
        penalty_rate: 2.5,
        term: 5,
        term_unit: "months".to_string(),
        installment_frequency: "monthly".to_string(),
    }
}

/// Sets up a database with one registered client.
pub async fn setup_with_client() -> Result<(DatabaseConnection, entities::client::Model)> {
    let db = setup_test_db().await?;
    let client = client::create_client(&db, "Wanjiku Kamau", "254712345678", None).await?;
    Ok((db, client))
}

/// Sets up a database with a client and a freshly created (`pending`) loan.
pub async fn setup_with_loan() -> Result<(
    DatabaseConnection,
    entities::client::Model,
    entities::loan::Model,
)> {
    let (db, client) = setup_with_client().await?;
    let loan = loan::create_loan(&db, test_loan_terms(client.id)).await?;
    Ok((db, client, loan))
}

/// Sets up a database with a client and an `active` loan ready to receive
/// payments.
pub async fn setup_with_active_loan() -> Result<(
    DatabaseConnection,
    entities::client::Model,
    entities::loan::Model,
)> {
    let (db, client) = setup_with_client().await?;
    let loan = create_active_loan(&db, client.id).await?;
    Ok((db, client, loan))
}

/// Creates a loan and forces it straight to `active`.
pub async fn create_active_loan(
    db: &DatabaseConnection,
    client_id: i64,
) -> Result<entities::loan::Model> {
    let created = loan::create_loan(db, test_loan_terms(client_id)).await?;
    force_loan_status(db, created.id, "active").await?;
    refreshed_loan(db, created.id).await
}

/// Overwrites a loan's status directly, bypassing transition guards.
pub async fn force_loan_status(db: &DatabaseConnection, loan_id: i64, status: &str) -> Result<()> {
    let model = refreshed_loan(db, loan_id).await?;
    let mut active = model.into_active_model();
    active.status = Set(status.to_string());
    active.update(db).await?;
    Ok(())
}

/// Overwrites a loan's due date and payment start date directly.
pub async fn force_loan_dates(
    db: &DatabaseConnection,
    loan_id: i64,
    due_date: NaiveDate,
    payment_start_date: Option<NaiveDate>,
) -> Result<()> {
    let model = refreshed_loan(db, loan_id).await?;
    let mut active = model.into_active_model();
    active.due_date = Set(due_date);
    active.payment_start_date = Set(payment_start_date);
    active.update(db).await?;
    Ok(())
}

/// Overwrites a loan's installment frequency directly (for failure-path
/// tests).
pub async fn force_loan_frequency(
    db: &DatabaseConnection,
    loan_id: i64,
    frequency: &str,
) -> Result<()> {
    let model = refreshed_loan(db, loan_id).await?;
    let mut active = model.into_active_model();
    active.installment_frequency = Set(frequency.to_string());
    active.update(db).await?;
    Ok(())
}

async fn refreshed_loan(db: &DatabaseConnection, loan_id: i64) -> Result<entities::loan::Model> {
    entities::Loan::find_by_id(loan_id)
        .one(db)
        .await?
        .ok_or(Error::LoanNotFound { id: loan_id })
}

/// Records a pending mobile-money payment linked to the given loan.
pub async fn record_test_payment(
    db: &DatabaseConnection,
    reference: &str,
    loan_id: i64,
    amount: f64,
) -> Result<entities::payment::Model> {
    let loan = refreshed_loan(db, loan_id).await?;
    record_payment(
        db,
        RecordPayment {
            reference: reference.to_string(),
            account_reference: Some(format!("LOAN{loan_id}")),
            loan_id: Some(loan_id),
            client_id: Some(loan.client_id),
            amount,
            method: "mpesa".to_string(),
        },
    )
    .await
}

/// Notifier test double that records every message instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    /// Messages sent so far as `(recipient, message)` pairs.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &str, message: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((recipient.to_string(), message.to_string()));
        }
    }
}
