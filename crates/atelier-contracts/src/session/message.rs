use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::images::EncodedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Generation metadata attached to assistant messages. `base_image_used` is
/// present only on successful attempts; a failed attempt still records the
/// style and the iteration slot it consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub style_id: String,
    pub iteration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image_used: Option<bool>,
}

/// One entry of the append-only conversation log. Messages are immutable
/// once created; the log is never edited or compacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<EncodedImage>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MessageMeta>,
}

impl ChatMessage {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            text: text.into(),
            image: None,
            created_at: now_utc_iso(),
            meta: None,
        }
    }

    pub fn assistant(
        id: impl Into<String>,
        text: impl Into<String>,
        image: Option<EncodedImage>,
        meta: MessageMeta,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            text: text.into(),
            image,
            created_at: now_utc_iso(),
            meta: Some(meta),
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use serde_json::{json, Value};

    use crate::images::EncodedImage;

    use super::{ChatMessage, MessageMeta, Role};

    #[test]
    fn user_message_carries_no_image_or_meta() -> anyhow::Result<()> {
        let message = ChatMessage::user("m1", "red lighthouse at night");
        assert_eq!(message.role, Role::User);
        assert!(message.image.is_none());
        assert!(message.meta.is_none());
        DateTime::parse_from_rfc3339(&message.created_at)?;
        Ok(())
    }

    #[test]
    fn failed_attempt_meta_omits_base_image_flag() -> anyhow::Result<()> {
        let message = ChatMessage::assistant(
            "m2",
            "apology",
            None,
            MessageMeta {
                style_id: "ember-noir".to_string(),
                iteration: 3,
                base_image_used: None,
            },
        );
        let payload: Value = serde_json::to_value(&message)?;
        assert_eq!(payload["meta"]["iteration"], json!(3));
        assert_eq!(payload["meta"]["style_id"], json!("ember-noir"));
        assert!(payload["meta"].get("base_image_used").is_none());
        assert!(payload.get("image").is_none());
        Ok(())
    }

    #[test]
    fn successful_attempt_meta_records_base_image_flag() -> anyhow::Result<()> {
        let image = EncodedImage::from_bytes(b"png", "image/png");
        let message = ChatMessage::assistant(
            "m4",
            "caption",
            Some(image.clone()),
            MessageMeta {
                style_id: "glasswing".to_string(),
                iteration: 2,
                base_image_used: Some(true),
            },
        );
        let payload: Value = serde_json::to_value(&message)?;
        assert_eq!(payload["role"], json!("assistant"));
        assert_eq!(payload["meta"]["base_image_used"], json!(true));
        assert_eq!(payload["image"], json!(image.as_data_url()));
        Ok(())
    }
}
