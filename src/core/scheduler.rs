//! Penalty and reminder scheduler.
//!
//! A single periodic pass over all repaying loans: loans due today get a
//! reminder, loans past due with a positive balance get a penalty accrued,
//! their status moved to `overdue`, and their due date rolled to the next
//! installment boundary. The rollover is the idempotence guard: a missed
//! boundary is penalized exactly once no matter how often the pass runs.
//!
//! The pass takes `today` as an argument so it stays deterministic under
//! test; the background task feeds it the current date.

use crate::{
    config::settings::SchedulerSettings,
    core::{
        loan::{LoanStatus, accrue_penalty_on, roll_due_date_on},
        schedule::{self, Frequency},
    },
    entities::{Client, Loan, loan},
    errors::{Error, Result},
    notify::Notifier,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{TransactionTrait, prelude::*, sea_query::Expr};
use std::{sync::Arc, time::Duration};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// What the pass did to a single loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoanOutcome {
    /// Due today; reminder sent, ledger untouched
    Reminded,
    /// Past due; penalty accrued and due date rolled forward
    Penalized,
    /// Nothing to do for this loan today
    Untouched,
}

/// Summary of one scheduler pass.
#[derive(Debug, Clone)]
pub struct PassSummary {
    /// The date the pass evaluated loans against
    pub run_date: NaiveDate,
    /// Loans considered (status `active` or `overdue`)
    pub loans_scanned: usize,
    /// Due-today reminders sent
    pub reminders_sent: usize,
    /// Penalties accrued
    pub penalties_accrued: usize,
    /// Loans skipped because repayment has not started
    pub skipped_not_started: usize,
    /// Loans whose processing failed; failures never abort the pass
    pub failures: usize,
}

/// Runs one penalty-and-reminder pass for the given date.
///
/// Errors on individual loans are logged and counted; the pass itself only
/// fails if the initial loan scan does.
pub async fn run_penalty_pass(
    db: &DatabaseConnection,
    notifier: &dyn Notifier,
    today: NaiveDate,
) -> Result<PassSummary> {
    let loans = Loan::find()
        .filter(loan::Column::Status.is_in([
            LoanStatus::Active.as_str(),
            LoanStatus::Overdue.as_str(),
        ]))
        .all(db)
        .await?;

    let mut summary = PassSummary {
        run_date: today,
        loans_scanned: loans.len(),
        reminders_sent: 0,
        penalties_accrued: 0,
        skipped_not_started: 0,
        failures: 0,
    };

    for current in loans {
        // Loans without a payment start date have not entered repayment
        if current.payment_start_date.is_none() {
            summary.skipped_not_started += 1;
            continue;
        }

        match process_loan(db, notifier, &current, today).await {
            Ok(LoanOutcome::Reminded) => summary.reminders_sent += 1,
            Ok(LoanOutcome::Penalized) => summary.penalties_accrued += 1,
            Ok(LoanOutcome::Untouched) => {}
            Err(e) => {
                // Per-loan isolation: log and keep going
                error!(loan_id = current.id, error = %e, "Scheduler pass failed for loan");
                summary.failures += 1;
            }
        }
    }

    Ok(summary)
}

async fn process_loan(
    db: &DatabaseConnection,
    notifier: &dyn Notifier,
    current: &loan::Model,
    today: NaiveDate,
) -> Result<LoanOutcome> {
    if current.due_date == today {
        let client = client_for(db, current).await?;
        let message = format!(
            "Dear {}, your loan payment of KES {:.2} is due today.",
            client.name, current.installment_amount
        );
        notifier.send(&client.phone, &message).await;
        return Ok(LoanOutcome::Reminded);
    }

    if current.due_date < today && current.remaining_balance > 0.0 {
        let frequency = Frequency::parse(&current.installment_frequency)?;
        // Penalty basis is the installment amount
        let penalty_amount =
            schedule::round2(current.installment_amount * current.penalty_rate / 100.0);

        // Accrual, status change, and due-date rollover are one unit of
        // work; a crash between them could otherwise double-penalize the
        // same boundary on the next run
        let txn = db.begin().await?;
        accrue_penalty_on(&txn, current.id, penalty_amount, "Installment defaulted").await?;
        Loan::update_many()
            .col_expr(
                loan::Column::Status,
                Expr::value(LoanStatus::Overdue.as_str()),
            )
            .filter(loan::Column::Id.eq(current.id))
            .filter(loan::Column::Status.eq(LoanStatus::Active.as_str()))
            .exec(&txn)
            .await?;
        roll_due_date_on(&txn, current.id, current.due_date, frequency).await?;
        let updated = Loan::find_by_id(current.id)
            .one(&txn)
            .await?
            .ok_or(Error::LoanNotFound { id: current.id })?;
        txn.commit().await?;

        let client = client_for(db, current).await?;
        let message = format!(
            "Dear {}, a penalty of KES {:.2} has been applied for a missed installment. Your new balance is KES {:.2}.",
            client.name, penalty_amount, updated.remaining_balance
        );
        notifier.send(&client.phone, &message).await;
        return Ok(LoanOutcome::Penalized);
    }

    Ok(LoanOutcome::Untouched)
}

async fn client_for(
    db: &DatabaseConnection,
    current: &loan::Model,
) -> Result<crate::entities::client::Model> {
    Client::find_by_id(current.client_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::ClientNotFound {
            key: current.client_id.to_string(),
        })
}

/// Background scheduler task: runs [`run_penalty_pass`] once per configured
/// interval.
///
/// A single task drives the loop, so passes never overlap; if one pass runs
/// long, missed ticks are skipped rather than queued.
pub async fn run(db: DatabaseConnection, notifier: Arc<dyn Notifier>, settings: SchedulerSettings) {
    if !settings.enabled {
        info!("Scheduler disabled by configuration");
        return;
    }

    let mut interval = tokio::time::interval(Duration::from_secs(settings.interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let today = Utc::now().date_naive();
        match run_penalty_pass(&db, notifier.as_ref(), today).await {
            Ok(summary) => info!(
                date = %summary.run_date,
                scanned = summary.loans_scanned,
                reminders = summary.reminders_sent,
                penalties = summary.penalties_accrued,
                skipped = summary.skipped_not_started,
                failures = summary.failures,
                "Scheduler pass complete"
            ),
            Err(e) => error!(error = %e, "Scheduler pass aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::loan::{apply_payment_on, get_loan_by_id, list_penalties_for_loan};
    use crate::test_utils::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_due_today_sends_reminder_without_ledger_change() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;
        let today = date(2024, 6, 15);
        force_loan_dates(&db, loan.id, today, Some(date(2024, 1, 15))).await?;
        let notifier = RecordingNotifier::default();

        let summary = run_penalty_pass(&db, &notifier, today).await?;
        assert_eq!(summary.reminders_sent, 1);
        assert_eq!(summary.penalties_accrued, 0);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("due today"));

        let after = get_loan_by_id(&db, loan.id).await?.unwrap();
        assert_eq!(after.remaining_balance, 10_500.0);
        assert_eq!(after.penalties, 0.0);
        assert_eq!(after.due_date, today);

        Ok(())
    }

    #[tokio::test]
    async fn test_overdue_loan_accrues_penalty_and_rolls_due_date() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;
        // Pay one installment so the balance is 8400 before the miss
        apply_payment_on(&db, loan.id, 2_100.0).await?;
        let due = date(2024, 6, 15);
        let today = date(2024, 6, 16);
        force_loan_dates(&db, loan.id, due, Some(date(2024, 1, 15))).await?;
        let notifier = RecordingNotifier::default();

        let summary = run_penalty_pass(&db, &notifier, today).await?;
        assert_eq!(summary.penalties_accrued, 1);

        // installment 2100 at penalty rate 2.5% -> 52.50
        let after = get_loan_by_id(&db, loan.id).await?.unwrap();
        assert_eq!(after.remaining_balance, 8_452.5);
        assert_eq!(after.penalties, 52.5);
        assert_eq!(after.status, "overdue");
        // Monthly cadence: rolled to the next boundary
        assert_eq!(after.due_date, date(2024, 7, 15));

        let penalties = list_penalties_for_loan(&db, loan.id).await?;
        assert_eq!(penalties.len(), 1);
        assert_eq!(penalties[0].amount, 52.5);
        assert_eq!(penalties[0].status, "active");

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("52.50"));
        assert!(sent[0].1.contains("8452.50"));

        Ok(())
    }

    #[tokio::test]
    async fn test_same_boundary_never_penalized_twice() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;
        let due = date(2024, 6, 15);
        let today = date(2024, 6, 16);
        force_loan_dates(&db, loan.id, due, Some(date(2024, 1, 15))).await?;
        let notifier = RecordingNotifier::default();

        run_penalty_pass(&db, &notifier, today).await?;
        // Second run the same day: due date has rolled past today
        let second = run_penalty_pass(&db, &notifier, today).await?;
        assert_eq!(second.penalties_accrued, 0);

        let after = get_loan_by_id(&db, loan.id).await?.unwrap();
        assert_eq!(after.penalties, 52.5);
        assert_eq!(list_penalties_for_loan(&db, loan.id).await?.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_not_started_loans_are_skipped() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;
        let due = date(2024, 6, 15);
        force_loan_dates(&db, loan.id, due, None).await?;
        let notifier = RecordingNotifier::default();

        let summary = run_penalty_pass(&db, &notifier, date(2024, 6, 16)).await?;
        assert_eq!(summary.skipped_not_started, 1);
        assert_eq!(summary.penalties_accrued, 0);

        let after = get_loan_by_id(&db, loan.id).await?.unwrap();
        assert_eq!(after.penalties, 0.0);
        assert_eq!(after.status, "active");

        Ok(())
    }

    #[tokio::test]
    async fn test_settled_overdue_loan_untouched() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;
        // Pay the loan off entirely
        apply_payment_on(&db, loan.id, 10_500.0).await?;
        force_loan_dates(&db, loan.id, date(2024, 6, 15), Some(date(2024, 1, 15))).await?;
        let notifier = RecordingNotifier::default();

        let summary = run_penalty_pass(&db, &notifier, date(2024, 6, 16)).await?;
        // Paid loans are not scanned at all
        assert_eq!(summary.loans_scanned, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_one_bad_loan_does_not_abort_the_pass() -> Result<()> {
        let (db, client) = setup_with_client().await?;
        let good = create_active_loan(&db, client.id).await?;
        let bad = create_active_loan(&db, client.id).await?;

        let due = date(2024, 6, 15);
        force_loan_dates(&db, good.id, due, Some(date(2024, 1, 15))).await?;
        force_loan_dates(&db, bad.id, due, Some(date(2024, 1, 15))).await?;
        force_loan_frequency(&db, bad.id, "bogus").await?;

        let notifier = RecordingNotifier::default();
        let summary = run_penalty_pass(&db, &notifier, date(2024, 6, 16)).await?;

        assert_eq!(summary.failures, 1);
        assert_eq!(summary.penalties_accrued, 1);

        let good_after = get_loan_by_id(&db, good.id).await?.unwrap();
        assert_eq!(good_after.penalties, 52.5);
        let bad_after = get_loan_by_id(&db, bad.id).await?.unwrap();
        assert_eq!(bad_after.penalties, 0.0);

        Ok(())
    }
}
