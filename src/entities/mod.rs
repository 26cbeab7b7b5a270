//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod client;
pub mod loan;
pub mod payment;
pub mod penalty;

// Re-export specific types to avoid conflicts
pub use client::{Column as ClientColumn, Entity as Client, Model as ClientModel};
pub use loan::{Column as LoanColumn, Entity as Loan, Model as LoanModel};
pub use payment::{Column as PaymentColumn, Entity as Payment, Model as PaymentModel};
pub use penalty::{Column as PenaltyColumn, Entity as Penalty, Model as PenaltyModel};
