//! Client entity - Represents a borrower in the client directory.
//!
//! The directory itself is a thin collaborator; the ledger only needs it to
//! resolve a payer's phone number to a client during reconciliation, so the
//! phone column is unique and stored in normalized international form.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Client database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "clients")]
pub struct Model {
    /// Unique identifier for the client
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Full name used in notification messages
    pub name: String,
    /// Phone number in international form (`2547...`), unique per client
    #[sea_orm(unique)]
    pub phone: String,
    /// Optional contact email
    pub email: Option<String>,
    /// When the client was registered
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Client and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// A client can hold many loans
    #[sea_orm(has_many = "super::loan::Entity")]
    Loan,
}

impl Related<super::loan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Loan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
