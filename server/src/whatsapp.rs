//! # WhatsApp
//!
//! Thin client for the WhatsApp HTTP gateway. Every message kind is a POST of
//! a small JSON body to `{server}/{key}/message/{kind}`.
//!
//! Notifications from the gate flow are fire-and-forget: a failed send is
//! logged and never changes the outcome of the request that triggered it.

use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Whatsapp {
    client: Client,
    server: String,
    key: String,
}

impl Whatsapp {
    pub fn new(server: &str, key: &str) -> Self {
        Self {
            client: Client::new(),
            server: server.trim_end_matches('/').to_string(),
            key: key.to_string(),
        }
    }

    /// False when the gateway address or key is not configured.
    pub fn enabled(&self) -> bool {
        !self.server.is_empty() && !self.key.is_empty()
    }

    fn url(&self, kind: &str) -> String {
        format!("{}/{}/message/{kind}", self.server, self.key)
    }

    async fn post(&self, kind: &str, body: Value) -> Result<Value, reqwest::Error> {
        self.client
            .post(self.url(kind))
            .json(&body)
            .send()
            .await?
            .json()
            .await
    }

    pub async fn send_message(&self, to: &str, text: &str) -> Result<Value, reqwest::Error> {
        self.post("text", json!({"to": to, "text": text})).await
    }

    pub async fn send_survey(
        &self,
        to: &str,
        name: &str,
        options: &[&str],
    ) -> Result<Value, reqwest::Error> {
        self.post("survey", json!({"to": to, "name": name, "options": options}))
            .await
    }

    /// Fire-and-forget text message. Failures are logged, never surfaced.
    pub fn notify(&self, to: &str, text: String) {
        if !self.enabled() || to.is_empty() {
            debug!("whatsapp not configured, skipping notification: {text}");
            return;
        }

        let whatsapp = self.clone();
        let to = to.to_string();

        tokio::spawn(async move {
            if let Err(e) = whatsapp.send_message(&to, &text).await {
                warn!("whatsapp notification failed: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::Whatsapp;

    #[test]
    fn builds_gateway_urls() {
        let whatsapp = Whatsapp::new("https://wa.example.com/", "abc123");

        assert_eq!(whatsapp.url("text"), "https://wa.example.com/abc123/message/text");
        assert_eq!(whatsapp.url("survey"), "https://wa.example.com/abc123/message/survey");
    }

    #[test]
    fn disabled_without_credentials() {
        assert!(!Whatsapp::new("", "").enabled());
        assert!(!Whatsapp::new("https://wa.example.com", "").enabled());
        assert!(Whatsapp::new("https://wa.example.com", "abc123").enabled());
    }
}
