use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::domain::message::{ChatEvent, MarkNotificationsReadData, MarkReadData};
use crate::error::ChatError;
use crate::server::CampusIMServer;

/// 已读回执传播 / Read receipt propagation
impl CampusIMServer {
    /// 批量标记已读并逐条通知各发送者 / Bulk read-mark, then tell each sender
    ///
    /// 只命中 recipient_id == 读者 且未读的消息；不属于读者的ID被静默跳过，
    /// 结果以计数而不是异常回报
    /// Only messages addressed to the reader and still unread are touched;
    /// foreign ids are silently skipped and reported as counts, not errors
    pub async fn mark_messages_read(
        &self,
        reader_uid: &str,
        connection_id: &str,
        data: MarkReadData,
    ) -> Result<(), ChatError> {
        let read_at = Utc::now();
        let outcome = self
            .storage
            .bulk_mark_messages_read(&data.message_ids, reader_uid, read_at)
            .await?;

        // 通知侧同步已读，两个持久实体的未读数保持一致
        // Mirror onto notifications so both persisted entities agree on
        // unread counts
        self.storage
            .bulk_mark_message_notifications_read(&data.message_ids, reader_uid, read_at)
            .await?;

        // 发送者可能按消息ID跟踪已读状态，逐条而不是合并成一个批量事件
        // Senders may track read state per message id, so emit one event per
        // message rather than a single bulk event
        let reader_name = self.display_name(reader_uid);
        for message in &outcome.updated {
            if message.sender_id == reader_uid {
                continue;
            }
            self.send_event_to_user(
                &message.sender_id,
                &ChatEvent::new(
                    "read",
                    json!({
                        "message_id": message.message_id,
                        "read_by": reader_uid,
                        "read_by_name": reader_name,
                        "read_at": read_at,
                    }),
                ),
            )
            .await;
        }

        info!(
            "📖 {} marked {}/{} messages read",
            reader_uid,
            outcome.modified,
            data.message_ids.len()
        );

        let _ = self
            .send_event_to_connection(
                connection_id,
                &ChatEvent::new(
                    "read",
                    json!({
                        "message_ids": data.message_ids,
                        "matched": outcome.matched,
                        "modified": outcome.modified,
                        "confirmed": true,
                    }),
                ),
            )
            .await;
        Ok(())
    }

    /// 按通知ID批量已读 / Bulk read-mark by notification id
    pub async fn mark_notifications_read(
        &self,
        uid: &str,
        connection_id: &str,
        data: MarkNotificationsReadData,
    ) -> Result<(), ChatError> {
        let modified = self
            .storage
            .bulk_mark_notifications_read(&data.notification_ids, uid, Utc::now())
            .await?;
        let _ = self
            .send_event_to_connection(
                connection_id,
                &ChatEvent::new(
                    "notifications_marked_read",
                    json!({
                        "notification_ids": data.notification_ids,
                        "modified": modified,
                        "confirmed": true,
                    }),
                ),
            )
            .await;
        Ok(())
    }
}
