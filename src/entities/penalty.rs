//! Penalty entity - A charge accrued on a loan for a missed installment.
//!
//! Created only by the scheduler or an explicit penalty action. The amount is
//! immutable once created; only the status moves, and only one way:
//! `"active"` to `"waived"` or `"active"` to `"paid"`.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Penalty database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "penalties")]
pub struct Model {
    /// Unique identifier for the penalty
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Loan the penalty was accrued on
    pub loan_id: i64,
    /// Client who holds the loan
    pub client_id: i64,
    /// Penalty amount; immutable after creation
    pub amount: f64,
    /// Why the penalty was applied
    pub reason: String,
    /// Lifecycle status: `"active"`, `"waived"`, or `"paid"`
    pub status: String,
    /// When the penalty was accrued
    pub created_at: DateTimeUtc,
    /// When the penalty was waived, if it was
    pub waived_at: Option<DateTimeUtc>,
}

/// Defines relationships between Penalty and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each penalty belongs to one loan
    #[sea_orm(
        belongs_to = "super::loan::Entity",
        from = "Column::LoanId",
        to = "super::loan::Column::Id"
    )]
    Loan,
}

impl Related<super::loan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Loan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
