//! Message data model carried by the bus.

use std::{collections::BTreeMap, fmt};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Scalar metadata value attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or_else(|_| Self::Text(value.to_string()), Self::Integer)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Kind of conversation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Dm,
    Group,
}

/// A message received by a channel, on its way to the engine.
///
/// Fields are private so a message cannot change once the bus owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    channel: String,
    sender_id: String,
    chat_id: String,
    content: String,
    media: Vec<String>,
    metadata: BTreeMap<String, MetadataValue>,
    received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn builder(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> InboundMessageBuilder {
        InboundMessageBuilder {
            message: Self {
                channel: channel.into(),
                sender_id: sender_id.into(),
                chat_id: chat_id.into(),
                content: String::new(),
                media: Vec::new(),
                metadata: BTreeMap::new(),
                received_at: Utc::now(),
            },
        }
    }

    /// Name of the channel the message arrived on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Conversation to answer into (may differ from the sender for groups).
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Opaque attachment references in arrival order.
    pub fn media(&self) -> &[String] {
        &self.media
    }

    pub fn metadata(&self) -> &BTreeMap<String, MetadataValue> {
        &self.metadata
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Outbound reply addressed to the same channel and conversation.
    pub fn reply(&self, content: impl Into<String>) -> OutboundMessage {
        OutboundMessage::new(&self.channel, &self.chat_id, content)
    }
}

/// Builder for [`InboundMessage`]; the message is frozen by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct InboundMessageBuilder {
    message: InboundMessage,
}

impl InboundMessageBuilder {
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.message.content = content.into();
        self
    }

    #[must_use]
    pub fn media(mut self, media: impl IntoIterator<Item = String>) -> Self {
        self.message.media = media.into_iter().collect();
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.message.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.message.received_at = at;
        self
    }

    pub fn build(self) -> InboundMessage {
        self.message
    }
}

/// A reply travelling from the engine to one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Target channel name; only the channel with this name delivers it.
    pub channel: String,
    pub chat_id: String,
    pub content: String,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_all_fields() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let msg = InboundMessage::builder("signal", "+1", "+1")
            .content("hello")
            .media(vec!["att-1".to_string(), "att-2".to_string()])
            .metadata("timestamp", 1_700_000_000_000_i64)
            .metadata("group", false)
            .received_at(at)
            .build();

        assert_eq!(msg.channel(), "signal");
        assert_eq!(msg.sender_id(), "+1");
        assert_eq!(msg.content(), "hello");
        assert_eq!(msg.media(), ["att-1", "att-2"]);
        assert_eq!(
            msg.metadata().get("timestamp"),
            Some(&MetadataValue::Integer(1_700_000_000_000))
        );
        assert_eq!(msg.received_at(), at);
    }

    #[test]
    fn reply_targets_origin_conversation() {
        let msg = InboundMessage::builder("signal", "+1", "group.abc")
            .content("ping")
            .build();
        let reply = msg.reply("pong");
        assert_eq!(reply, OutboundMessage::new("signal", "group.abc", "pong"));
    }

    #[test]
    fn metadata_serializes_as_plain_scalars() {
        let msg = InboundMessage::builder("signal", "+1", "+1")
            .metadata("account", "+2")
            .metadata("timestamp", 42_u64)
            .build();
        let json = serde_json::to_value(msg.metadata()).unwrap();
        assert_eq!(json, serde_json::json!({"account": "+2", "timestamp": 42}));
    }

    #[test]
    fn huge_unsigned_metadata_falls_back_to_text() {
        assert_eq!(
            MetadataValue::from(u64::MAX),
            MetadataValue::Text(u64::MAX.to_string())
        );
    }
}
