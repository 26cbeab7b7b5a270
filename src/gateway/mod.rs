//! Payment gateway client - outbound adapter for the mobile-money STK-push
//! API.
//!
//! Request signing (shortcode + passkey + timestamp, base64) and timestamp
//! formatting are pure functions, and wall-clock access goes through the
//! [`Clock`] trait, so everything except the actual HTTP exchange is
//! testable without network access. Write-side calls (the push itself) use a
//! bounded timeout and are never retried here; the read-only status query
//! may be retried by the caller.

use crate::config::settings::GatewaySettings;
use crate::errors::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Gateway error code for a transaction that has not settled yet. A status
/// query hitting this is retryable, not failed.
const NOT_READY_ERROR_CODE: &str = "500.001.1001";

/// Source of "now" for timestamping and token expiry. Injected so signing
/// is deterministic under test.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`] used in production.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Formats an instant the way the gateway expects: `YYYYMMDDHHMMSS`.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Builds the request password: base64 of shortcode + passkey + timestamp.
#[must_use]
pub fn password(short_code: &str, pass_key: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{short_code}{pass_key}{timestamp}"))
}

/// Normalizes a phone number to international form (`2547...`).
///
/// Accepts local (`07...`), prefixed (`+254...`), and already-international
/// forms; whitespace and dashes are dropped.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation {
            message: format!("Invalid phone number: {raw}"),
        });
    }

    let normalized = if let Some(rest) = digits.strip_prefix('0') {
        format!("254{rest}")
    } else {
        digits.to_string()
    };

    if normalized.len() < 10 || normalized.len() > 15 {
        return Err(Error::Validation {
            message: format!("Invalid phone number length: {raw}"),
        });
    }

    Ok(normalized)
}

/// A successfully submitted push-payment prompt.
#[derive(Debug, Clone)]
pub struct PushResponse {
    /// The gateway's handle for this push-payment attempt
    pub checkout_request_id: String,
    /// Gateway-side merchant request id
    pub merchant_request_id: Option<String>,
    /// Human-readable prompt-sent message
    pub customer_message: String,
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The gateway has a final verdict for the transaction
    Settled {
        /// Numeric result code as a string; `"0"` means success
        result_code: String,
        /// Human-readable description
        description: String,
    },
    /// The transaction is still being processed; query again later
    NotReady,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// HTTP client for the mobile-money gateway with a process-local access
/// token cache.
pub struct GatewayClient {
    settings: GatewaySettings,
    http: reqwest::Client,
    clock: Box<dyn Clock>,
    token: Mutex<Option<CachedToken>>,
}

impl GatewayClient {
    /// Builds a client with the system clock.
    pub fn new(settings: GatewaySettings) -> Result<Self> {
        Self::with_clock(settings, Box::new(SystemClock))
    }

    /// Builds a client with an injected clock (tests).
    pub fn with_clock(settings: GatewaySettings, clock: Box<dyn Clock>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            settings,
            http,
            clock,
            token: Mutex::new(None),
        })
    }

    /// Returns a valid access token, refreshing the cache when the current
    /// one is within a minute of expiry. Concurrent callers may refresh
    /// redundantly; the worst case is an extra token fetch.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        let now = self.clock.now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at > now + ChronoDuration::seconds(60) {
                return Ok(token.token.clone());
            }
        }

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.settings.base_url
        );
        let response = self
            .http
            .get(&url)
            .basic_auth(
                &self.settings.consumer_key,
                Some(&self.settings.consumer_secret),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::GatewayRejected {
                message: format!("Token request failed with status {}", response.status()),
            });
        }

        let body: TokenResponse = response.json().await?;
        let expires_in = body.expires_in_seconds();
        debug!(expires_in, "Gateway access token refreshed");

        let token = body.access_token;
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: now + ChronoDuration::seconds(expires_in),
        });
        Ok(token)
    }

    /// Requests a push-payment prompt on the payer's device.
    ///
    /// The amount must be positive; it is rounded to the gateway's smallest
    /// unit (whole currency units). Never retried: a timeout here must not
    /// risk double-prompting the payer.
    pub async fn initiate_push(
        &self,
        phone: &str,
        amount: f64,
        account_reference: &str,
        description: &str,
    ) -> Result<PushResponse> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Error::InvalidAmount { amount });
        }
        let phone = normalize_phone(phone)?;
        let token = self.access_token().await?;

        let timestamp = format_timestamp(self.clock.now());
        let password = password(&self.settings.short_code, &self.settings.pass_key, &timestamp);

        let payload = json!({
            "BusinessShortCode": self.settings.short_code,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": amount.round() as i64,
            "PartyA": phone,
            "PartyB": self.settings.short_code,
            "PhoneNumber": phone,
            "CallBackURL": self.settings.callback_url,
            "AccountReference": account_reference,
            "TransactionDesc": description,
        });

        let response = self
            .http
            .post(format!(
                "{}/mpesa/stkpush/v1/processrequest",
                self.settings.base_url
            ))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body: GatewayErrorBody = response.json().await.unwrap_or_default();
            return Err(Error::GatewayRejected {
                message: body
                    .error_message
                    .unwrap_or_else(|| format!("Push request failed with status {status}")),
            });
        }

        let body: StkPushResponse = response.json().await?;
        if body.response_code.as_deref() != Some("0") {
            return Err(Error::GatewayRejected {
                message: body
                    .response_description
                    .unwrap_or_else(|| "Push request rejected".to_string()),
            });
        }

        let checkout_request_id = body.checkout_request_id.ok_or_else(|| {
            Error::GatewayRejected {
                message: "Accepted push response missing checkout id".to_string(),
            }
        })?;
        info!(%checkout_request_id, "Push-payment prompt submitted");

        Ok(PushResponse {
            checkout_request_id,
            merchant_request_id: body.merchant_request_id,
            customer_message: body
                .customer_message
                .unwrap_or_else(|| "Prompt sent. Check your phone to complete payment.".to_string()),
        })
    }

    /// Queries the gateway for the final verdict on a push attempt. Used as
    /// a fallback poll when no callback has arrived in the expected window.
    pub async fn query_status(&self, checkout_request_id: &str) -> Result<StatusOutcome> {
        let token = self.access_token().await?;

        let timestamp = format_timestamp(self.clock.now());
        let password = password(&self.settings.short_code, &self.settings.pass_key, &timestamp);

        let payload = json!({
            "BusinessShortCode": self.settings.short_code,
            "Password": password,
            "Timestamp": timestamp,
            "CheckoutRequestID": checkout_request_id,
        });

        let response = self
            .http
            .post(format!(
                "{}/mpesa/stkpushquery/v1/query",
                self.settings.base_url
            ))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body: GatewayErrorBody = response.json().await.unwrap_or_default();
            // "Still processing" is a retryable outcome, not a failure
            if body.error_code.as_deref() == Some(NOT_READY_ERROR_CODE) {
                return Ok(StatusOutcome::NotReady);
            }
            return Err(Error::GatewayRejected {
                message: body
                    .error_message
                    .unwrap_or_else(|| format!("Status query failed with status {status}")),
            });
        }

        let body: StkQueryResponse = response.json().await?;
        Ok(StatusOutcome::Settled {
            result_code: body.result_code.unwrap_or_default(),
            description: body.result_desc.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// The gateway serializes this inconsistently (string or number)
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    fn expires_in_seconds(&self) -> i64 {
        match &self.expires_in {
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(3600),
            Some(serde_json::Value::String(s)) => s.parse().unwrap_or(3600),
            _ => 3600,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID", default)]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode", default)]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription", default)]
    response_description: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    customer_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StkQueryResponse {
    #[serde(rename = "ResultCode", default)]
    result_code: Option<String>,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayErrorBody {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}
