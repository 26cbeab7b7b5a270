//! Loan ledger operations.
//!
//! Every mutation here is a single unit of work: either its own transaction,
//! or a `*_on` variant that runs inside a caller-owned transaction so that a
//! settlement or a scheduler step can bundle several ledger writes
//! atomically. Status changes go through single conditional UPDATE
//! statements, so concurrent lifecycle races surface as
//! [`Error::InvalidTransition`] instead of lost updates.

use crate::{
    core::schedule::{self, Frequency, TermUnit},
    entities::{Client, Loan, Penalty, loan, penalty},
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};

/// Loan lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanStatus {
    /// Application recorded, awaiting review
    Pending,
    /// Approved by a reviewer, repayment not yet started
    Approved,
    /// Rejected by a reviewer; terminal
    Rejected,
    /// In repayment
    Active,
    /// Missed at least one due date with a positive balance
    Overdue,
    /// Balance reached zero; terminal
    Paid,
}

impl LoanStatus {
    /// Canonical string form, as stored on the loan row.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Active => "active",
            Self::Overdue => "overdue",
            Self::Paid => "paid",
        }
    }

    /// Parses the stored string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "active" => Ok(Self::Active),
            "overdue" => Ok(Self::Overdue),
            "paid" => Ok(Self::Paid),
            other => Err(Error::Validation {
                message: format!("Unknown loan status: {other}"),
            }),
        }
    }
}

/// Penalty lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyStatus {
    /// Outstanding
    Active,
    /// Forgiven by an operator; terminal
    Waived,
    /// Collected through a penalty-marked payment; terminal
    Paid,
}

impl PenaltyStatus {
    /// Canonical string form, as stored on the penalty row.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Waived => "waived",
            Self::Paid => "paid",
        }
    }
}

/// Terms of a new loan application.
#[derive(Debug, Clone)]
pub struct NewLoan {
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

/// Creates a loan from the given terms: computes the schedule, persists the
/// row with status `pending` and balance equal to the total repayable.
pub async fn create_loan(db: &DatabaseConnection, terms: NewLoan) -> Result<loan::Model> {
    if !terms.penalty_rate.is_finite() || terms.penalty_rate < 0.0 {
        return Err(Error::Validation {
            message: format!(
                "Penalty rate must be non-negative, got {}",
                terms.penalty_rate
            ),
        });
    }
    let term_unit = TermUnit::parse(&terms.term_unit)?;
    Frequency::parse(&terms.installment_frequency)?;

    let issued_on = Utc::now().date_naive();
    let computed = schedule::compute_schedule(
        terms.principal,
        terms.interest_rate,
        terms.term,
        term_unit,
        issued_on,
    )?;

    Client::find_by_id(terms.client_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::ClientNotFound {
            key: terms.client_id.to_string(),
        })?;

    let now = Utc::now();
    let model = loan::ActiveModel {
        client_id: Set(terms.client_id),
        principal: Set(terms.principal),
        interest_rate: Set(terms.interest_rate),
        penalty_rate: Set(terms.penalty_rate),
        term: Set(terms.term),
        term_unit: Set(terms.term_unit),
        installment_frequency: Set(terms.installment_frequency),
        installment_amount: Set(computed.installment_amount),
        total_repayable: Set(computed.total_repayable),
        remaining_balance: Set(computed.total_repayable),
        penalties: Set(0.0),
        total_paid: Set(0.0),
        due_date: Set(computed.due_date),
        payment_start_date: Set(None),
        status: Set(LoanStatus::Pending.as_str().to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let result = model.insert(db).await?;
    Ok(result)
}

/// Finds a loan by its unique ID.
pub async fn get_loan_by_id(db: &DatabaseConnection, loan_id: i64) -> Result<Option<loan::Model>> {
    Loan::find_by_id(loan_id).one(db).await.map_err(Into::into)
}

/// Retrieves all loans, newest first.
pub async fn list_loans(db: &DatabaseConnection) -> Result<Vec<loan::Model>> {
    Loan::find()
        .order_by_desc(loan::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Finds the client's open loan, if any: the oldest loan still collecting
/// repayments (`active`, `overdue`, or `approved`).
pub async fn get_open_loan_for_client(
    db: &DatabaseConnection,
    client_id: i64,
) -> Result<Option<loan::Model>> {
    Loan::find()
        .filter(loan::Column::ClientId.eq(client_id))
        .filter(loan::Column::Status.is_in([
            LoanStatus::Active.as_str(),
            LoanStatus::Overdue.as_str(),
            LoanStatus::Approved.as_str(),
        ]))
        .order_by_asc(loan::Column::CreatedAt)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Moves a loan from `from` to `to` with a single conditional UPDATE.
///
/// The status guard is the WHERE clause itself, so two racing reviewers
/// cannot both win: the loser's UPDATE matches zero rows and surfaces as
/// [`Error::InvalidTransition`].
pub async fn transition_loan_status(
    db: &DatabaseConnection,
    loan_id: i64,
    from: LoanStatus,
    to: LoanStatus,
) -> Result<loan::Model> {
    Loan::find_by_id(loan_id)
        .one(db)
        .await?
        .ok_or(Error::LoanNotFound { id: loan_id })?;

    let updated = Loan::update_many()
        .col_expr(loan::Column::Status, Expr::value(to.as_str()))
        .col_expr(loan::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(loan::Column::Id.eq(loan_id))
        .filter(loan::Column::Status.eq(from.as_str()))
        .exec(db)
        .await?;

    if updated.rows_affected == 0 {
        return Err(Error::InvalidTransition {
            entity: "loan",
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        });
    }

    Loan::find_by_id(loan_id)
        .one(db)
        .await?
        .ok_or(Error::LoanNotFound { id: loan_id })
}

/// Sets the payment start date and activates the loan (`approved` ->
/// `active`). Penalties and reminders stay inactive until this is called.
pub async fn start_repayment(
    db: &DatabaseConnection,
    loan_id: i64,
    start_date: NaiveDate,
) -> Result<loan::Model> {
    Loan::find_by_id(loan_id)
        .one(db)
        .await?
        .ok_or(Error::LoanNotFound { id: loan_id })?;

    let updated = Loan::update_many()
        .col_expr(
            loan::Column::Status,
            Expr::value(LoanStatus::Active.as_str()),
        )
        .col_expr(loan::Column::PaymentStartDate, Expr::value(start_date))
        .col_expr(loan::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(loan::Column::Id.eq(loan_id))
        .filter(loan::Column::Status.eq(LoanStatus::Approved.as_str()))
        .exec(db)
        .await?;

    if updated.rows_affected == 0 {
        return Err(Error::InvalidTransition {
            entity: "loan",
            from: LoanStatus::Approved.as_str().to_string(),
            to: LoanStatus::Active.as_str().to_string(),
        });
    }

    Loan::find_by_id(loan_id)
        .one(db)
        .await?
        .ok_or(Error::LoanNotFound { id: loan_id })
}

/// Applies a completed payment to a loan inside the caller's transaction:
/// decrements the remaining balance (floored at zero), increments the
/// cumulative paid amount, and transitions the status to `paid` when the
/// balance reaches zero (or `approved` -> `active` on a first payment).
///
/// This is only ever called from inside a settlement transaction so the
/// balance update and the payment's terminal-status write land atomically.
pub async fn apply_payment_on<C>(conn: &C, loan_id: i64, amount: f64) -> Result<loan::Model>
where
    C: ConnectionTrait,
{
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::InvalidAmount { amount });
    }

    let current = Loan::find_by_id(loan_id)
        .one(conn)
        .await?
        .ok_or(Error::LoanNotFound { id: loan_id })?;

    let new_paid = schedule::round2(current.total_paid + amount);
    let new_balance = schedule::round2((current.remaining_balance - amount).max(0.0));
    let new_status = if new_balance <= 0.0 {
        LoanStatus::Paid.as_str()
    } else if current.status == LoanStatus::Approved.as_str() {
        // A payment landing before repayment formally started still
        // activates the loan
        LoanStatus::Active.as_str()
    } else {
        current.status.as_str()
    }
    .to_string();

    let mut active: loan::ActiveModel = current.into();
    active.total_paid = Set(new_paid);
    active.remaining_balance = Set(new_balance);
    active.status = Set(new_status);
    active.updated_at = Set(Utc::now());

    active.update(conn).await.map_err(Into::into)
}

/// Accrues a penalty inside the caller's transaction: inserts the penalty
/// row as `active` and atomically adds the amount to both the loan's
/// cumulative penalties and its remaining balance.
pub async fn accrue_penalty_on<C>(
    conn: &C,
    loan_id: i64,
    amount: f64,
    reason: &str,
) -> Result<penalty::Model>
where
    C: ConnectionTrait,
{
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::InvalidAmount { amount });
    }
    let amount = schedule::round2(amount);

    let loan = Loan::find_by_id(loan_id)
        .one(conn)
        .await?
        .ok_or(Error::LoanNotFound { id: loan_id })?;

    let row = penalty::ActiveModel {
        loan_id: Set(loan_id),
        client_id: Set(loan.client_id),
        amount: Set(amount),
        reason: Set(reason.to_string()),
        status: Set(PenaltyStatus::Active.as_str().to_string()),
        created_at: Set(Utc::now()),
        waived_at: Set(None),
        ..Default::default()
    };
    let created = row.insert(conn).await?;

    // Atomic column-level update: penalties and balance move together
    Loan::update_many()
        .col_expr(
            loan::Column::Penalties,
            Expr::col(loan::Column::Penalties).add(amount),
        )
        .col_expr(
            loan::Column::RemainingBalance,
            Expr::col(loan::Column::RemainingBalance).add(amount),
        )
        .col_expr(loan::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(loan::Column::Id.eq(loan_id))
        .exec(conn)
        .await?;

    Ok(created)
}

/// Accrues a penalty as its own transaction. Used by the manual penalty
/// action; the scheduler uses [`accrue_penalty_on`] inside its per-loan
/// transaction instead.
pub async fn accrue_penalty(
    db: &DatabaseConnection,
    loan_id: i64,
    amount: f64,
    reason: &str,
) -> Result<penalty::Model> {
    let txn = db.begin().await?;
    let created = accrue_penalty_on(&txn, loan_id, amount, reason).await?;
    txn.commit().await?;
    Ok(created)
}

/// Advances a loan's due date to the next installment boundary inside the
/// caller's transaction. Owned by the scheduler's overdue rollover rule.
pub async fn roll_due_date_on<C>(
    conn: &C,
    loan_id: i64,
    current_due: NaiveDate,
    frequency: Frequency,
) -> Result<NaiveDate>
where
    C: ConnectionTrait,
{
    let next = schedule::next_due_date(current_due, frequency);
    Loan::update_many()
        .col_expr(loan::Column::DueDate, Expr::value(next))
        .col_expr(loan::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(loan::Column::Id.eq(loan_id))
        .exec(conn)
        .await?;
    Ok(next)
}

/// Finds a penalty by its unique ID.
pub async fn get_penalty_by_id(
    db: &DatabaseConnection,
    penalty_id: i64,
) -> Result<Option<penalty::Model>> {
    Penalty::find_by_id(penalty_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Retrieves all penalties for a loan, newest first.
pub async fn list_penalties_for_loan(
    db: &DatabaseConnection,
    loan_id: i64,
) -> Result<Vec<penalty::Model>> {
    Penalty::find()
        .filter(penalty::Column::LoanId.eq(loan_id))
        .order_by_desc(penalty::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Waives an active penalty. One-way: only `active` penalties can be
/// waived, and the amount is left untouched on the loan (the charge stands
/// in the cumulative totals; only collection stops).
pub async fn waive_penalty(db: &DatabaseConnection, penalty_id: i64) -> Result<penalty::Model> {
    Penalty::find_by_id(penalty_id)
        .one(db)
        .await?
        .ok_or(Error::PenaltyNotFound { id: penalty_id })?;

    let updated = Penalty::update_many()
        .col_expr(
            penalty::Column::Status,
            Expr::value(PenaltyStatus::Waived.as_str()),
        )
        .col_expr(penalty::Column::WaivedAt, Expr::value(Some(Utc::now())))
        .filter(penalty::Column::Id.eq(penalty_id))
        .filter(penalty::Column::Status.eq(PenaltyStatus::Active.as_str()))
        .exec(db)
        .await?;

    if updated.rows_affected == 0 {
        return Err(Error::InvalidTransition {
            entity: "penalty",
            from: PenaltyStatus::Active.as_str().to_string(),
            to: PenaltyStatus::Waived.as_str().to_string(),
        });
    }

    Penalty::find_by_id(penalty_id)
        .one(db)
        .await?
        .ok_or(Error::PenaltyNotFound { id: penalty_id })
}

/// Marks an active penalty as collected inside the caller's transaction.
/// Already-terminal penalties are returned unchanged; settlement replay must
/// not flip a waived penalty back to paid.
pub async fn mark_penalty_paid_on<C>(conn: &C, penalty_id: i64) -> Result<penalty::Model>
where
    C: ConnectionTrait,
{
    Penalty::update_many()
        .col_expr(
            penalty::Column::Status,
            Expr::value(PenaltyStatus::Paid.as_str()),
        )
        .filter(penalty::Column::Id.eq(penalty_id))
        .filter(penalty::Column::Status.eq(PenaltyStatus::Active.as_str()))
        .exec(conn)
        .await?;

    Penalty::find_by_id(penalty_id)
        .one(conn)
        .await?
        .ok_or(Error::PenaltyNotFound { id: penalty_id })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_create_loan_computes_schedule() -> Result<()> {
        let (db, client) = setup_with_client().await?;

        let loan = create_loan(&db, test_loan_terms(client.id)).await?;
        assert_eq!(loan.total_repayable, 10_500.0);
        assert_eq!(loan.installment_amount, 2_100.0);
        assert_eq!(loan.remaining_balance, 10_500.0);
        assert_eq!(loan.total_paid, 0.0);
        assert_eq!(loan.penalties, 0.0);
        assert_eq!(loan.status, "pending");
        assert!(loan.payment_start_date.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_create_loan_unknown_client() -> Result<()> {
        let db = setup_test_db().await?;

        let result = create_loan(&db, test_loan_terms(999)).await;
        assert!(matches!(result, Err(Error::ClientNotFound { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_create_loan_rejects_bad_terms() -> Result<()> {
        let (db, client) = setup_with_client().await?;

        let mut terms = test_loan_terms(client.id);
        terms.principal = 0.0;
        assert!(matches!(
            create_loan(&db, terms).await,
            Err(Error::InvalidAmount { .. })
        ));

        let mut terms = test_loan_terms(client.id);
        terms.penalty_rate = -1.0;
        assert!(matches!(
            create_loan(&db, terms).await,
            Err(Error::Validation { .. })
        ));

        let mut terms = test_loan_terms(client.id);
        terms.term_unit = "fortnights".to_string();
        assert!(matches!(
            create_loan(&db, terms).await,
            Err(Error::Validation { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_transition_guard_blocks_races() -> Result<()> {
        let (db, _client, loan) = setup_with_loan().await?;

        let approved =
            transition_loan_status(&db, loan.id, LoanStatus::Pending, LoanStatus::Approved)
                .await?;
        assert_eq!(approved.status, "approved");

        // A second reviewer racing the same approval loses
        let second =
            transition_loan_status(&db, loan.id, LoanStatus::Pending, LoanStatus::Approved).await;
        assert!(matches!(second, Err(Error::InvalidTransition { .. })));

        // And a reject after approval loses too
        let reject =
            transition_loan_status(&db, loan.id, LoanStatus::Pending, LoanStatus::Rejected).await;
        assert!(matches!(reject, Err(Error::InvalidTransition { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_start_repayment_sets_date_and_activates() -> Result<()> {
        let (db, _client, loan) = setup_with_loan().await?;
        transition_loan_status(&db, loan.id, LoanStatus::Pending, LoanStatus::Approved).await?;

        let start = chrono::Utc::now().date_naive();
        let active = start_repayment(&db, loan.id, start).await?;
        assert_eq!(active.status, "active");
        assert_eq!(active.payment_start_date, Some(start));

        // Not repeatable
        let again = start_repayment(&db, loan.id, start).await;
        assert!(matches!(again, Err(Error::InvalidTransition { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_apply_payment_decrements_and_floors() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;

        let after = apply_payment_on(&db, loan.id, 2_100.0).await?;
        assert_eq!(after.remaining_balance, 8_400.0);
        assert_eq!(after.total_paid, 2_100.0);
        assert_eq!(after.status, "active");

        // Overpayment floors the balance at zero and settles the loan
        let settled = apply_payment_on(&db, loan.id, 9_000.0).await?;
        assert_eq!(settled.remaining_balance, 0.0);
        assert_eq!(settled.total_paid, 11_100.0);
        assert_eq!(settled.status, "paid");

        Ok(())
    }

    #[tokio::test]
    async fn test_apply_payment_activates_approved_loan() -> Result<()> {
        let (db, _client, loan) = setup_with_loan().await?;
        transition_loan_status(&db, loan.id, LoanStatus::Pending, LoanStatus::Approved).await?;

        let after = apply_payment_on(&db, loan.id, 2_100.0).await?;
        assert_eq!(after.status, "active");
        assert_eq!(after.remaining_balance, 8_400.0);

        Ok(())
    }

    #[tokio::test]
    async fn test_apply_payment_rejects_bad_amounts() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;

        for bad in [0.0, -5.0, f64::NAN] {
            let result = apply_payment_on(&db, loan.id, bad).await;
            assert!(matches!(result, Err(Error::InvalidAmount { .. })));
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_accrue_penalty_moves_both_totals() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;

        let penalty = accrue_penalty(&db, loan.id, 52.5, "Installment defaulted").await?;
        assert_eq!(penalty.amount, 52.5);
        assert_eq!(penalty.status, "active");
        assert_eq!(penalty.loan_id, loan.id);

        let updated = get_loan_by_id(&db, loan.id).await?.unwrap();
        assert_eq!(updated.penalties, 52.5);
        assert_eq!(updated.remaining_balance, 10_552.5);

        // Balance identity holds
        assert_eq!(
            updated.remaining_balance,
            (updated.total_repayable + updated.penalties - updated.total_paid).max(0.0)
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_waive_penalty_is_one_way() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;
        let penalty = accrue_penalty(&db, loan.id, 52.5, "Installment defaulted").await?;

        let waived = waive_penalty(&db, penalty.id).await?;
        assert_eq!(waived.status, "waived");
        assert!(waived.waived_at.is_some());
        // Amount is immutable and stays on the loan's totals
        assert_eq!(waived.amount, 52.5);

        let again = waive_penalty(&db, penalty.id).await;
        assert!(matches!(again, Err(Error::InvalidTransition { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_mark_penalty_paid_skips_waived() -> Result<()> {
        let (db, _client, loan) = setup_with_active_loan().await?;
        let penalty = accrue_penalty(&db, loan.id, 52.5, "Installment defaulted").await?;
        waive_penalty(&db, penalty.id).await?;

        let after = mark_penalty_paid_on(&db, penalty.id).await?;
        assert_eq!(after.status, "waived");

        Ok(())
    }

    #[tokio::test]
    async fn test_open_loan_lookup_prefers_oldest() -> Result<()> {
        let (db, client) = setup_with_client().await?;

        let first = create_loan(&db, test_loan_terms(client.id)).await?;
        let second = create_loan(&db, test_loan_terms(client.id)).await?;
        force_loan_status(&db, first.id, "active").await?;
        force_loan_status(&db, second.id, "overdue").await?;

        let open = get_open_loan_for_client(&db, client.id).await?.unwrap();
        assert_eq!(open.id, first.id);

        // Paid and rejected loans are not open
        force_loan_status(&db, first.id, "paid").await?;
        force_loan_status(&db, second.id, "rejected").await?;
        assert!(get_open_loan_for_client(&db, client.id).await?.is_none());

        Ok(())
    }
}
