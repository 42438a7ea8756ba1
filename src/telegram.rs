//! Telegram client using teloxide.

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::{debug, info, warn};

use crate::config::LocationConfig;
use crate::orchestrator::Messenger;

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Download a photo, returning its bytes and media type.
    pub async fn download_image(&self, file_id: &str) -> Result<(Vec<u8>, String), String> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        let file_path = &file.path;
        let mut data = Vec::new();
        self.bot
            .download_file(file_path, &mut data)
            .await
            .map_err(|e| format!("Failed to download file: {e}"))?;

        let media_type = if file_path.ends_with(".png") {
            "image/png"
        } else if file_path.ends_with(".webp") {
            "image/webp"
        } else {
            "image/jpeg"
        };

        info!("📥 Downloaded image ({} bytes, {})", data.len(), media_type);
        Ok((data, media_type.to_string()))
    }
}

fn parse_chat_id(chat_id: &str) -> Result<ChatId, String> {
    chat_id
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| format!("Invalid chat id: {chat_id}"))
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<String, String> {
        let chat = parse_chat_id(chat_id)?;
        self.bot
            .send_message(chat, text)
            .await
            .map(|msg| msg.id.0.to_string())
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })
    }

    async fn send_location(&self, chat_id: &str, location: &LocationConfig) -> Result<String, String> {
        let chat = parse_chat_id(chat_id)?;
        let sent = match &location.title {
            Some(title) => {
                let address = location.subtitle.clone().unwrap_or_default();
                self.bot
                    .send_venue(chat, location.latitude, location.longitude, title.clone(), address)
                    .await
            }
            None => {
                self.bot
                    .send_location(chat, location.latitude, location.longitude)
                    .await
            }
        };

        sent.map(|msg| msg.id.0.to_string()).map_err(|e| {
            let msg = format!("Failed to send location: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn mark_unread(&self, chat_id: &str) -> Result<(), String> {
        // Bots have no read state to reset.
        debug!("Leaving {chat_id} for the operator");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_id() {
        assert_eq!(parse_chat_id("-100123").unwrap(), ChatId(-100123));
        assert!(parse_chat_id("abc@c.us").is_err());
    }
}
