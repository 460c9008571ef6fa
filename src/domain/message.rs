use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 聊天事件信封 / Chat event envelope
///
/// 所有入站与出站事件共用一个 `{type, data}` 外壳
/// Every inbound and outbound event shares the `{type, data}` shell
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ChatEvent {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn to_text(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// 鉴权请求 / Auth request
#[derive(Serialize, Deserialize, Debug, JsonSchema)]
pub struct AuthData {
    pub uid: String,
    #[serde(default)]
    pub token: String,
}

/// 进入会话 / Join a conversation
#[derive(Serialize, Deserialize, Debug, JsonSchema)]
pub struct JoinChatData {
    pub friend_id: String,
}

/// 发送消息 / Send a message
#[derive(Serialize, Deserialize, Debug, JsonSchema)]
pub struct SendMessageData {
    pub recipient_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

/// 批量已读 / Bulk read-mark
#[derive(Serialize, Deserialize, Debug, JsonSchema)]
pub struct MarkReadData {
    pub message_ids: Vec<String>,
}

/// 删除消息 / Delete a message
#[derive(Serialize, Deserialize, Debug, JsonSchema)]
pub struct DeleteMessageData {
    pub message_id: String,
}

/// 输入状态 / Typing status
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TypingStatus {
    Start,
    Stop,
}

/// 输入指示 / Typing indicator
#[derive(Serialize, Deserialize, Debug, JsonSchema)]
pub struct TypingData {
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub status: TypingStatus,
}

/// 按通知ID批量已读 / Bulk read-mark by notification id
#[derive(Serialize, Deserialize, Debug, JsonSchema)]
pub struct MarkNotificationsReadData {
    #[serde(default)]
    pub notification_ids: Vec<String>,
}

/// 连接欢迎响应 / Connect welcome response
#[derive(Serialize, Deserialize, Debug, JsonSchema)]
pub struct ConnectResponse {
    pub status: String,
    pub message: String,
}
