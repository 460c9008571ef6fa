use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::message::ChatEvent;
use crate::error::ChatError;
use crate::server::presence::PresenceStatus;
use crate::server::CampusIMServer;
use crate::storage::{MessageRecord, NotificationKind, NotificationMetadata, NotificationRecord};

/// 内容预览上限 / Content preview bound
const MESSAGE_PREVIEW_LIMIT: usize = 100;

/// 通知回退 / Notification fallback
impl CampusIMServer {
    /// 接收方不可即时看到消息时，幂等地落一条通知并推送未读数
    /// When the recipient cannot see the message right now, idempotently
    /// persist a notification and push the unread count
    ///
    /// 仅当状态恰为online（正看着会话）才抑制；active（在线但在别的会话）
    /// 仍然收到通知
    /// Suppressed only when the status is exactly online (looking at a
    /// conversation); active users still get notified
    pub async fn notify_if_unreachable(&self, message: &MessageRecord) -> Result<(), ChatError> {
        if self.presence.status_of(&message.recipient_id) == PresenceStatus::Online {
            debug!(
                "Recipient {} is online, suppressing notification for {}",
                message.recipient_id, message.message_id
            );
            return Ok(());
        }

        let now = Utc::now();
        let record = NotificationRecord {
            notification_id: Uuid::new_v4().to_string(),
            user_id: message.recipient_id.clone(),
            kind: NotificationKind::Message,
            related_id: message.message_id.clone(),
            is_read: false,
            read_at: None,
            created_at: now,
            metadata: Some(NotificationMetadata {
                sender_id: message.sender_id.clone(),
                sender_name: self.display_name(&message.sender_id),
                message_preview: truncate_preview(&message.content),
                created_at: now,
            }),
        };

        // 存储层的唯一约束保证并发send不产生重复 / The store-level uniqueness
        // constraint keeps concurrent sends from duplicating
        let (notification, created) = self.storage.create_notification_if_absent(record).await?;
        if created {
            info!(
                "🔔 Notification {} created for offline recipient {}",
                notification.notification_id, message.recipient_id
            );
        } else {
            debug!(
                "Notification already exists for message {}",
                message.message_id
            );
        }

        // 覆盖多设备：另一台不在会话里的设备收到未读数变化
        // Multi-device: another device away from the conversation sees the
        // unread count change
        let count = self
            .storage
            .count_unread_notifications(&message.recipient_id)
            .await?;
        self.send_event_to_user(
            &message.recipient_id,
            &ChatEvent::new("new_notification", json!({ "count": count })),
        )
        .await;
        Ok(())
    }

    /// 未读通知查询 / Unread notifications query
    pub async fn get_notifications(
        &self,
        uid: &str,
        connection_id: &str,
    ) -> Result<(), ChatError> {
        let notifications = self.storage.unread_notifications(uid, 50).await?;
        let count = notifications.len();
        let _ = self
            .send_event_to_connection(
                connection_id,
                &ChatEvent::new(
                    "notifications",
                    json!({ "notifications": notifications, "count": count }),
                ),
            )
            .await;
        Ok(())
    }
}

/// 截断到固定字符数，保持UTF-8边界 / Truncate to the fixed bound on a char boundary
fn truncate_preview(content: &str) -> String {
    content.chars().take(MESSAGE_PREVIEW_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_short_content() {
        assert_eq!(truncate_preview("hi"), "hi");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long: String = "学".repeat(150);
        let preview = truncate_preview(&long);
        assert_eq!(preview.chars().count(), 100);
        assert!(preview.chars().all(|c| c == '学'));
    }
}
