//! Schedule calculator - pure loan arithmetic.
//!
//! Computes interest, total repayable, installment amount, and due dates from
//! loan terms. Everything here is deterministic and side-effect free; the
//! ledger and the scheduler both call into this module so that currency
//! rounding happens in exactly one place.

use crate::errors::{Error, Result};
use chrono::{Days, Months, NaiveDate};

/// The computed repayment schedule for a loan.
#[derive(Debug, Clone, PartialEq)]
pub struct LoanSchedule {
    /// Flat interest: `principal * rate / 100`
    pub total_interest: f64,
    /// Principal plus interest
    pub total_repayable: f64,
    /// Per-installment amount, rounded to currency precision
    pub installment_amount: f64,
    /// First due date: issue date advanced by the full term
    pub due_date: NaiveDate,
}

/// Unit of a loan's term length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermUnit {
    /// Term counted in days
    Days,
    /// Term counted in weeks
    Weeks,
    /// Term counted in months
    Months,
}

impl TermUnit {
    /// Canonical string form, as stored on the loan row.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Months => "months",
        }
    }

    /// Parses the stored string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "days" => Ok(Self::Days),
            "weeks" => Ok(Self::Weeks),
            "months" => Ok(Self::Months),
            other => Err(Error::Validation {
                message: format!("Unknown term unit: {other}"),
            }),
        }
    }
}

/// Cadence at which installments fall due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    /// One installment per day
    Daily,
    /// One installment per week
    Weekly,
    /// One installment per month
    Monthly,
}

impl Frequency {
    /// Canonical string form, as stored on the loan row.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Parses the stored string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(Error::Validation {
                message: format!("Unknown installment frequency: {other}"),
            }),
        }
    }
}

/// Rounds an amount to currency precision: 2 decimal places, half-up.
///
/// This is the single canonical rounding point for the crate; every computed
/// monetary value passes through it before being persisted.
#[must_use]
pub fn round2(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Computes the repayment schedule for the given terms.
///
/// # Errors
/// Returns [`Error::InvalidAmount`] for a non-positive or non-finite
/// principal, and [`Error::Validation`] for a non-positive term or negative
/// interest rate.
pub fn compute_schedule(
    principal: f64,
    interest_rate: f64,
    term: i32,
    term_unit: TermUnit,
    issued_on: NaiveDate,
) -> Result<LoanSchedule> {
    if !principal.is_finite() || principal <= 0.0 {
        return Err(Error::InvalidAmount { amount: principal });
    }
    if !interest_rate.is_finite() || interest_rate < 0.0 {
        return Err(Error::Validation {
            message: format!("Interest rate must be non-negative, got {interest_rate}"),
        });
    }
    if term <= 0 {
        return Err(Error::Validation {
            message: format!("Term must be positive, got {term}"),
        });
    }

    let total_interest = round2(principal * interest_rate / 100.0);
    let total_repayable = round2(principal + total_interest);
    let installment_amount = round2(total_repayable / f64::from(term));
    let due_date = advance_date(issued_on, term_unit, term);

    Ok(LoanSchedule {
        total_interest,
        total_repayable,
        installment_amount,
        due_date,
    })
}

/// Advances a date by `count` units. Month arithmetic clamps to the last day
/// of shorter months (Jan 31 + 1 month = Feb 28/29).
#[must_use]
pub fn advance_date(date: NaiveDate, unit: TermUnit, count: i32) -> NaiveDate {
    let count = count.unsigned_abs();
    match unit {
        TermUnit::Days => date
            .checked_add_days(Days::new(u64::from(count)))
            .unwrap_or(date),
        TermUnit::Weeks => date
            .checked_add_days(Days::new(u64::from(count) * 7))
            .unwrap_or(date),
        TermUnit::Months => date
            .checked_add_months(Months::new(count))
            .unwrap_or(date),
    }
}

/// The next installment boundary after `due_date` for the given cadence.
/// Used by the scheduler's overdue rollover so a missed boundary is only
/// penalized once.
#[must_use]
pub fn next_due_date(due_date: NaiveDate, frequency: Frequency) -> NaiveDate {
    match frequency {
        Frequency::Daily => advance_date(due_date, TermUnit::Days, 1),
        Frequency::Weekly => advance_date(due_date, TermUnit::Weeks, 1),
        Frequency::Monthly => advance_date(due_date, TermUnit::Months, 1),
    }
}
