//! signal-cli REST receive frames and their decoding.

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    chatrelay_common::{ChatType, InboundMessage},
    chrono::{DateTime, Utc},
    serde::Deserialize,
};

/// Prefix signal-cli-rest-api expects on group recipients.
pub const GROUP_TARGET_PREFIX: &str = "group.";

// ── signal-cli JSON shapes ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ReceiveFrame {
    #[serde(default)]
    envelope: Option<Envelope>,
    #[serde(default)]
    account: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    source_number: Option<String>,
    #[serde(default)]
    source_uuid: Option<String>,
    #[serde(default)]
    source_name: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    data_message: Option<DataMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataMessage {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    group_info: Option<GroupInfo>,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupInfo {
    #[serde(default)]
    group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attachment {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

// ── Decoded event ───────────────────────────────────────────────────────────

/// One incoming Signal chat message, decoded on the worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEvent {
    /// Bot account the message was delivered to.
    pub account: String,
    pub sender: String,
    /// Account UUID when signal-cli reported one alongside the number.
    pub sender_uuid: Option<String>,
    pub source_name: Option<String>,
    /// Reply target: the sender for direct messages, `group.<id>` for groups.
    pub chat_id: String,
    pub group_id: Option<String>,
    pub text: String,
    pub attachments: Vec<String>,
    /// Sent timestamp in epoch milliseconds; also the message's id for quoting.
    pub timestamp: Option<i64>,
}

impl SignalEvent {
    /// Decode one websocket text frame.
    ///
    /// Returns `Ok(None)` for frames that carry no chat message (receipts,
    /// typing indicators, sync messages) or no usable sender.
    pub fn decode(raw: &str, account: &str) -> serde_json::Result<Option<Self>> {
        let frame: ReceiveFrame = serde_json::from_str(raw)?;
        let Some(envelope) = frame.envelope else {
            return Ok(None);
        };
        let Some(data) = envelope.data_message else {
            return Ok(None);
        };
        let sender_uuid = envelope.source_uuid.filter(|u| !u.is_empty());
        let Some(sender) = [
            envelope.source_number,
            envelope.source,
            sender_uuid.clone(),
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty()) else {
            return Ok(None);
        };

        let group_id = data
            .group_info
            .and_then(|g| g.group_id)
            .filter(|g| !g.is_empty());
        let chat_id = match &group_id {
            Some(id) => group_target(id),
            None => sender.clone(),
        };
        let attachments = data
            .attachments
            .into_iter()
            .filter_map(|a| a.id.or(a.filename))
            .collect();

        Ok(Some(Self {
            account: frame.account.unwrap_or_else(|| account.to_string()),
            sender,
            sender_uuid,
            source_name: envelope.source_name.filter(|n| !n.is_empty()),
            chat_id,
            group_id,
            text: data.message.unwrap_or_default(),
            attachments,
            timestamp: data.timestamp.or(envelope.timestamp),
        }))
    }

    pub fn chat_type(&self) -> ChatType {
        if self.group_id.is_some() {
            ChatType::Group
        } else {
            ChatType::Dm
        }
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.timestamp
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    /// Normalize into the bus data model.
    pub fn to_inbound(&self, channel: &str) -> InboundMessage {
        let chat_type = match self.chat_type() {
            ChatType::Dm => "dm",
            ChatType::Group => "group",
        };
        let mut builder = InboundMessage::builder(channel, &self.sender, &self.chat_id)
            .content(self.text.clone())
            .media(self.attachments.iter().cloned())
            .received_at(self.received_at())
            .metadata("account", self.account.as_str())
            .metadata("recipient", self.account.as_str())
            .metadata("chat_type", chat_type);
        if let Some(ts) = self.timestamp {
            builder = builder.metadata("timestamp", ts);
        }
        if let Some(name) = &self.source_name {
            builder = builder.metadata("source_name", name.as_str());
        }
        if let Some(group) = &self.group_id {
            builder = builder.metadata("group_id", group.as_str());
        }
        builder.build()
    }
}

/// Recipient string for a group, as accepted by `POST /v2/send`.
pub fn group_target(internal_id: &str) -> String {
    format!("{GROUP_TARGET_PREFIX}{}", STANDARD.encode(internal_id))
}
