//! Database configuration module for the loan ledger.
//!
//! Handles `SQLite` connection and table creation using `SeaORM`. Tables are
//! generated with `Schema::create_table_from_entity` so the database schema
//! always matches the entity definitions, including the unique index on the
//! payment reference column that backs idempotent settlement lookups.

use crate::entities::{Client, Loan, Payment, Penalty};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};

/// Establishes a connection to the database at the given URL.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    Database::connect(database_url).await.map_err(Into::into)
}

/// Creates all necessary database tables using `SeaORM`'s schema generation
/// from entity definitions.
///
/// Creates tables for clients, loans, payments, and penalties. Existing
/// tables are left untouched.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let client_table = schema.create_table_from_entity(Client).if_not_exists().to_owned();
    let loan_table = schema.create_table_from_entity(Loan).if_not_exists().to_owned();
    let payment_table = schema.create_table_from_entity(Payment).if_not_exists().to_owned();
    let penalty_table = schema.create_table_from_entity(Penalty).if_not_exists().to_owned();

    db.execute(builder.build(&client_table)).await?;
    db.execute(builder.build(&loan_table)).await?;
    db.execute(builder.build(&payment_table)).await?;
    db.execute(builder.build(&penalty_table)).await?;

    Ok(())
}
