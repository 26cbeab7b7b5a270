//! Notification sink - fire-and-forget outbound messages.
//!
//! The ledger core only knows the [`Notifier`] capability: send a message to
//! a recipient and never fail the caller. Delivery problems are logged and
//! dropped; a payment settlement or a scheduler pass must not depend on an
//! SMS provider being up.

use crate::config::settings::SmsSettings;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Capability to deliver a message to a recipient. Backends are swappable;
/// failures never propagate.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends `message` to `recipient`, best effort.
    async fn send(&self, recipient: &str, message: &str);
}

/// SMS delivery through a bulk-SMS HTTP provider.
pub struct SmsNotifier {
    http: reqwest::Client,
    settings: SmsSettings,
}

impl SmsNotifier {
    /// Builds the notifier from SMS settings.
    pub fn new(settings: SmsSettings) -> crate::errors::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { http, settings })
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    async fn send(&self, recipient: &str, message: &str) {
        if !self.settings.enabled || self.settings.api_url.is_empty() {
            debug!(recipient, "SMS disabled; dropping message");
            return;
        }

        let body = json!({
            "apikey": self.settings.api_key,
            "partnerID": self.settings.partner_id,
            "shortcode": self.settings.shortcode,
            "mobile": recipient,
            "message": message,
        });

        match self.http.post(&self.settings.api_url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!(recipient, "SMS dispatched");
            }
            Ok(response) => {
                warn!(recipient, status = %response.status(), "SMS provider rejected message");
            }
            Err(e) => {
                warn!(recipient, error = %e, "SMS delivery failed");
            }
        }
    }
}

/// Notifier that only logs. Used when no SMS transport is configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, recipient: &str, message: &str) {
        debug!(recipient, message, "Notification (no transport configured)");
    }
}
