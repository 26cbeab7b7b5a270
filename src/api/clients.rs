//! Minimal client directory endpoints.

use crate::{api::AppState, core::client, errors::Result};
use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};

/// Body for `POST /api/clients`.
#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    /// Client's full name
    pub name: String,
    /// Phone number in any accepted form
    pub phone: String,
    /// Optional contact email
    pub email: Option<String>,
}

/// `POST /api/clients`
pub async fn create_client(
    State(state): State<AppState>,
    Json(body): Json<CreateClientRequest>,
) -> Result<Json<Value>> {
    let created = client::create_client(&state.db, &body.name, &body.phone, body.email).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Client registered successfully",
        "data": created,
    })))
}

/// `GET /api/clients`
pub async fn list_clients(State(state): State<AppState>) -> Result<Json<Value>> {
    let clients = client::list_clients(&state.db).await?;
    Ok(Json(json!({ "success": true, "data": clients })))
}
