//! Telegram Bot API sink

use async_trait::async_trait;
use reqwest::Client;
use sniper_types::{EventKind, LifecycleEvent};

use crate::{EventSink, NotifyError};

pub const TELEGRAM_API: &str = "https://api.telegram.org";

/// Posts events as plain-text messages to one chat
pub struct TelegramSink {
    client: Client,
    api_url: String,
    token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            client: Client::new(),
            api_url: TELEGRAM_API.to_string(),
            token,
            chat_id,
        }
    }

    /// Point at a different Bot API host
    pub fn with_api_url(mut self, url: String) -> Self {
        self.api_url = url;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.token)
    }
}

/// Render an event as a chat message
pub fn format_message(event: &LifecycleEvent) -> String {
    let icon = match event.kind {
        EventKind::WatchStarted => "🔍",
        EventKind::TriggerHit => "🎯",
        EventKind::SwapSubmitted => "📤",
        EventKind::AttemptFailed => "⚠️",
        EventKind::SwapConfirmed => "✅",
        EventKind::SwapFailed => "❌",
    };
    format!(
        "{} {:?} ({})\npair: {:?}\n{}\n{}",
        icon,
        event.kind,
        event.target,
        event.pair,
        event.details,
        event.timestamp.to_rfc3339()
    )
}

#[async_trait]
impl EventSink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn deliver(&self, event: &LifecycleEvent) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": format_message(event),
        });

        let response = self.client.post(self.endpoint()).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(NotifyError::DeliveryFailed(format!(
                "Telegram responded {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::Address;

    #[test]
    fn test_endpoint() {
        let sink = TelegramSink::new("123:abc".to_string(), "42".to_string());
        assert_eq!(sink.endpoint(), "https://api.telegram.org/bot123:abc/sendMessage");

        let local = sink.with_api_url("http://localhost:8081".to_string());
        assert_eq!(local.endpoint(), "http://localhost:8081/bot123:abc/sendMessage");
    }

    #[test]
    fn test_format_message() {
        let event = LifecycleEvent::new(
            EventKind::SwapConfirmed,
            Address::repeat_byte(0x11),
            "WBNB/USDT",
            "tx 0xabc",
        );
        let text = format_message(&event);
        assert!(text.starts_with("✅ SwapConfirmed (WBNB/USDT)"));
        assert!(text.contains("tx 0xabc"));
    }
}
