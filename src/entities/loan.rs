//! Loan entity - The ledger's source of truth for a loan's financial state.
//!
//! `status` is the authoritative lifecycle field: `"pending"` at application
//! time, `"approved"`/`"rejected"` after review, `"active"` once a payment
//! start date is set, `"overdue"` when the scheduler detects a missed due
//! date, `"paid"` when the balance reaches zero. The ledger maintains the
//! invariant `remaining_balance == max(0, total_repayable + penalties -
//! total_paid)` across every mutation.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Loan database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "loans")]
pub struct Model {
    /// Unique identifier for the loan
    #[sea_orm(primary_key)]
    pub id: i64,
    /// ID of the client who holds this loan
    pub client_id: i64,
    /// Disbursed principal amount
    pub principal: f64,
    /// Flat interest rate in percent
    pub interest_rate: f64,
    /// Penalty rate in percent, applied per missed installment
    pub penalty_rate: f64,
    /// Number of term units until the first due date
    pub term: i32,
    /// Term unit: `"days"`, `"weeks"`, or `"months"`
    pub term_unit: String,
    /// Installment cadence: `"daily"`, `"weekly"`, or `"monthly"`
    pub installment_frequency: String,
    /// Computed per-installment amount (currency precision)
    pub installment_amount: f64,
    /// Computed principal + interest
    pub total_repayable: f64,
    /// Outstanding balance, floored at zero
    pub remaining_balance: f64,
    /// Cumulative penalties accrued on this loan
    pub penalties: f64,
    /// Cumulative amount collected through completed payments
    pub total_paid: f64,
    /// Next installment due date
    pub due_date: Date,
    /// When repayment begins; penalties and reminders are inactive until set
    pub payment_start_date: Option<Date>,
    /// Lifecycle status: `"pending"`, `"approved"`, `"rejected"`,
    /// `"active"`, `"overdue"`, or `"paid"`
    pub status: String,
    /// When the loan application was created
    pub created_at: DateTimeUtc,
    /// When the loan was last mutated
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Loan and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each loan belongs to one client
    #[sea_orm(
        belongs_to = "super::client::Entity",
        from = "Column::ClientId",
        to = "super::client::Column::Id"
    )]
    Client,
    /// Payments applied against this loan
    #[sea_orm(has_many = "super::payment::Entity")]
    Payment,
    /// Penalties accrued on this loan
    #[sea_orm(has_many = "super::penalty::Entity")]
    Penalty,
}

impl Related<super::client::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Client.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl Related<super::penalty::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Penalty.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
