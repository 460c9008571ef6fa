//! 存储模块 - 持久化数据结构与抽象 / Storage module - persisted records and store abstraction
//!
//! 领域实体的持久化通过 `Store` trait 访问，事务语义由具体后端负责
//! Domain entities are persisted through the `Store` trait; transactional
//! guarantees are the backend's concern

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::Store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息记录 / Message record
///
/// 送达后不可变，仅 `is_read`/`read_at` 可更新，且只有发送者可删除
/// Immutable once delivered except `is_read`/`read_at`; deletable by the sender only
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    /// 频道消息时为Some，私聊为None / Some for channel messages, None for direct
    pub channel_id: Option<String>,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub attachments: Vec<String>,
    pub is_read: bool,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// 通知类型 / Notification kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    FriendRequest,
    FriendAccepted,
}

/// 通知元数据快照 / Notification metadata snapshot
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationMetadata {
    pub sender_id: String,
    pub sender_name: String,
    pub message_preview: String,
    pub created_at: DateTime<Utc>,
}

/// 通知记录 / Notification record
///
/// 不变式：同一(user_id, related_id)至多一条message类型通知
/// Invariant: at most one `message` notification per (user_id, related_id)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub notification_id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub related_id: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<NotificationMetadata>,
}

/// 批量已读结果 / Bulk read-mark outcome
///
/// 携带受影响的记录，省去逐条回查
/// Carries the affected records so callers avoid per-id re-fetches
#[derive(Clone, Debug, Default)]
pub struct ReadOutcome {
    pub matched: usize,
    pub modified: usize,
    pub updated: Vec<MessageRecord>,
}
