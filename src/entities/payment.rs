//! Payment entity - One row per payment attempt, keyed by external reference.
//!
//! A payment created from a push-payment request starts `"pending"` and is
//! mutated at most once into a terminal `"completed"` or `"failed"` state; it
//! is never deleted. The unique `reference` column (the gateway's checkout
//! identifier, or an internal reference) is the idempotency key that makes
//! replayed gateway callbacks safe no-ops.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payment database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    /// Unique identifier for the payment
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Loan this payment settles against; null until matched
    pub loan_id: Option<i64>,
    /// Client who paid; null until resolved
    pub client_id: Option<i64>,
    /// Payment amount
    pub amount: f64,
    /// Payment method: `"mpesa"` or `"cash"`
    pub method: String,
    /// External checkout identifier or internal reference, unique
    #[sea_orm(unique)]
    pub reference: String,
    /// Account reference supplied at prompt time (`"LOAN<id>"`, `"PEN<id>"`),
    /// or an `"OTHER-"` tag once flagged unmatched
    pub account_reference: Option<String>,
    /// Gateway receipt code; null until settlement
    pub receipt_code: Option<String>,
    /// Lifecycle status: `"pending"`, `"completed"`, or `"failed"`
    pub status: String,
    /// When the payment attempt was recorded
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Payment and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each matched payment belongs to one loan
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
