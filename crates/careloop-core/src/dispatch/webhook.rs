//! Webhook transport: POSTs each notification to a per-channel provider URL.
//!
//! The provider sees a JSON envelope of channel, contact and payload. When a
//! signing secret is configured the raw body is signed with HMAC-SHA256 and
//! the hex digest sent in `X-Careloop-Signature`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use url::Url;

use super::transport::{NotificationPayload, NotificationTransport};
use crate::config::TransportSettings;
use crate::error::{ConfigError, DeliveryError};
use crate::member::NotificationChannel;

pub const SIGNATURE_HEADER: &str = "X-Careloop-Signature";

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this only fails on a broken build of `hmac`.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Serialize)]
struct Envelope<'a> {
    channel: NotificationChannel,
    to: &'a str,
    payload: &'a NotificationPayload,
}

pub struct WebhookTransport {
    client: reqwest::Client,
    email_url: Option<Url>,
    sms_url: Option<Url>,
    signing_secret: Option<String>,
}

impl WebhookTransport {
    /// Build from `[transport]` settings. Blank URLs leave the channel unconfigured.
    ///
    /// # Errors
    /// Returns an error if a URL does not parse or the HTTP client cannot be built.
    pub fn from_settings(settings: &TransportSettings) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "transport.timeout_secs".into(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            email_url: parse_url("transport.email_webhook_url", &settings.email_webhook_url)?,
            sms_url: parse_url("transport.sms_webhook_url", &settings.sms_webhook_url)?,
            signing_secret: settings
                .signing_secret
                .clone()
                .filter(|s| !s.is_empty()),
        })
    }

    fn url_for(&self, channel: NotificationChannel) -> Option<&Url> {
        match channel {
            NotificationChannel::Email => self.email_url.as_ref(),
            NotificationChannel::Sms => self.sms_url.as_ref(),
        }
    }
}

fn parse_url(key: &str, raw: &Option<String>) -> Result<Option<Url>, ConfigError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Url::parse(s)
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}

fn classify(err: reqwest::Error) -> DeliveryError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        DeliveryError::Transient(err.to_string())
    } else {
        DeliveryError::Rejected(err.to_string())
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    fn supports(&self, channel: NotificationChannel) -> bool {
        self.url_for(channel).is_some()
    }

    async fn send(
        &self,
        channel: NotificationChannel,
        contact: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        let url = self
            .url_for(channel)
            .ok_or_else(|| DeliveryError::Rejected(format!("no webhook configured for {channel}")))?;

        let body = serde_json::to_vec(&Envelope {
            channel,
            to: contact,
            payload,
        })
        .map_err(|e| DeliveryError::Rejected(e.to_string()))?;

        let mut request = self
            .client
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.signing_secret {
            request = request.header(SIGNATURE_HEADER, sign(secret, &body));
        }

        let resp = request.body(body).send().await.map_err(classify)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = format!("{channel} webhook returned HTTP {status}");
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(DeliveryError::Transient(detail))
        } else {
            Err(DeliveryError::Rejected(detail))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_matches_rfc4231_vector() {
        assert_eq!(
            sign("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn blank_urls_leave_channels_unconfigured() {
        let settings = TransportSettings {
            email_webhook_url: Some("  ".into()),
            sms_webhook_url: Some("http://localhost:8080/sms".into()),
            ..TransportSettings::default()
        };
        let t = WebhookTransport::from_settings(&settings).unwrap();
        assert!(!t.supports(NotificationChannel::Email));
        assert!(t.supports(NotificationChannel::Sms));
    }

    #[test]
    fn malformed_url_is_a_config_error() {
        let settings = TransportSettings {
            email_webhook_url: Some("not a url".into()),
            ..TransportSettings::default()
        };
        assert!(matches!(
            WebhookTransport::from_settings(&settings),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
