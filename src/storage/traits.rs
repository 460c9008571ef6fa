use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MessageRecord, NotificationRecord, ReadOutcome};
use crate::error::StoreError;

/// 存储抽象trait，便于测试替换与后端迁移 / Store abstraction for testability and backend swaps
///
/// 每个方法都是一次挂起点；实现不得假定调用方持有任何锁
/// Every method is a suspension point; implementations must not assume the
/// caller holds any lock
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_message(&self, record: MessageRecord) -> Result<MessageRecord, StoreError>;

    async fn find_message(&self, message_id: &str) -> Result<Option<MessageRecord>, StoreError>;

    async fn delete_message(&self, message_id: &str) -> Result<bool, StoreError>;

    /// 仅更新 recipient_id == reader 且未读的消息 / Updates only unread messages addressed to the reader
    async fn bulk_mark_messages_read(
        &self,
        message_ids: &[String],
        reader_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<ReadOutcome, StoreError>;

    /// 原子的"不存在才插入"；返回(记录, 是否新建)
    /// Atomic insert-if-absent; returns (record, created)
    async fn create_notification_if_absent(
        &self,
        record: NotificationRecord,
    ) -> Result<(NotificationRecord, bool), StoreError>;

    /// 未读通知，按创建时间倒序 / Unread notifications, newest first
    async fn unread_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StoreError>;

    async fn count_unread_notifications(&self, user_id: &str) -> Result<usize, StoreError>;

    /// 按关联消息ID批量已读 / Bulk read-mark by related message id
    async fn bulk_mark_message_notifications_read(
        &self,
        message_ids: &[String],
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// 按通知ID批量已读 / Bulk read-mark by notification id
    async fn bulk_mark_notifications_read(
        &self,
        notification_ids: &[String],
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// 删除某条消息触发的全部通知 / Delete all notifications triggered by a message
    async fn delete_notifications_by_related(&self, related_id: &str)
        -> Result<usize, StoreError>;
}
