//! Client directory operations.
//!
//! The directory is a thin collaborator: the ledger only needs enough of it
//! to resolve a payer's phone number during reconciliation and to address
//! notifications. Phone numbers are normalized to international form on the
//! way in so callback metadata matches without further massaging.

use crate::{
    entities::{Client, client},
    errors::{Error, Result},
    gateway,
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, prelude::*};

/// Registers a client, normalizing and de-duplicating the phone number.
pub async fn create_client(
    db: &DatabaseConnection,
    name: &str,
    phone: &str,
    email: Option<String>,
) -> Result<client::Model> {
    if name.trim().is_empty() {
        return Err(Error::Validation {
            message: "Client name cannot be empty".to_string(),
        });
    }
    let phone = gateway::normalize_phone(phone)?;

    let existing = Client::find()
        .filter(client::Column::Phone.eq(phone.as_str()))
        .one(db)
        .await?;
    if existing.is_some() {
        return Err(Error::Validation {
            message: format!("A client with phone {phone} already exists"),
        });
    }

    let model = client::ActiveModel {
        name: Set(name.trim().to_string()),
        phone: Set(phone),
        email: Set(email),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    let result = model.insert(db).await?;
    Ok(result)
}

/// Finds a client by phone number in any accepted form.
pub async fn find_client_by_phone(
    db: &DatabaseConnection,
    phone: &str,
) -> Result<Option<client::Model>> {
    let normalized = match gateway::normalize_phone(phone) {
        Ok(p) => p,
        // An unparseable payer number can never match a stored client
        Err(_) => return Ok(None),
    };
    Client::find()
        .filter(client::Column::Phone.eq(normalized))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a client by its unique ID.
pub async fn get_client_by_id(
    db: &DatabaseConnection,
    client_id: i64,
) -> Result<Option<client::Model>> {
    Client::find_by_id(client_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Retrieves all clients, ordered by name.
pub async fn list_clients(db: &DatabaseConnection) -> Result<Vec<client::Model>> {
    Client::find()
        .order_by_asc(client::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}
