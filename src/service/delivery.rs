use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::message::{ChatEvent, DeleteMessageData, SendMessageData};
use crate::error::ChatError;
use crate::server::CampusIMServer;
use crate::storage::MessageRecord;

/// 消息路由 / Message routing
impl CampusIMServer {
    /// 发送私聊消息 / Send a direct message
    ///
    /// 校验 -> 落库 -> 向接收方所有在线连接扇出 -> 回声给发送连接 ->
    /// 无论是否送达都交给通知回退路径（覆盖多设备场景）
    /// Validate -> persist -> fan out to the recipient's live connections ->
    /// echo to the originating connection -> always hand off to the
    /// notification fallback (covers the multi-device case)
    pub async fn send_chat_message(
        &self,
        sender_uid: &str,
        connection_id: &str,
        data: SendMessageData,
    ) -> Result<(), ChatError> {
        if data.content.trim().is_empty() && data.attachments.is_empty() {
            return Err(ChatError::Validation(
                "message must carry content or attachments".to_string(),
            ));
        }
        if data.recipient_id.is_empty() {
            return Err(ChatError::Validation("recipient_id is required".to_string()));
        }

        let record = MessageRecord {
            message_id: Uuid::new_v4().to_string(),
            channel_id: None,
            sender_id: sender_uid.to_string(),
            recipient_id: data.recipient_id.clone(),
            content: data.content.clone(),
            attachments: data.attachments.clone(),
            is_read: false,
            sent_at: Utc::now(),
            read_at: None,
        };
        // 落库失败中止整个操作，仅报告给发送方 / Persistence failure aborts
        // the whole operation, reported to the sender only
        let record = self.storage.create_message(record).await?;

        let view = self.message_view(&record);

        // 向接收方扇出；0个连接是正常状态 / Fan out; zero connections is normal
        let mut payload = view.clone();
        payload["is_own_message"] = json!(false);
        let delivered = self
            .send_event_to_user(&record.recipient_id, &ChatEvent::new("message", payload))
            .await;
        info!(
            "💬 Message {} from {} to {} ({} live deliveries)",
            record.message_id, record.sender_id, record.recipient_id, delivered
        );

        // 回声给发送连接，带回temp_id供乐观UI对账；此时连接可能已断，
        // 消息依旧保留，发送方通过历史拉取对账
        // Echo to the originating connection with temp_id for optimistic-UI
        // reconciliation; the connection may already be gone, in which case
        // the message stays and the sender reconciles via a history fetch
        let mut echo = view;
        echo["is_own_message"] = json!(true);
        if let Some(temp_id) = &data.temp_id {
            echo["temp_id"] = json!(temp_id);
        }
        let _ = self
            .send_event_to_connection(connection_id, &ChatEvent::new("message", echo))
            .await;

        // 在线送达不豁免其他设备的通知 / Live delivery does not exempt the
        // recipient's other devices from a notification
        if let Err(e) = self.notify_if_unreachable(&record).await {
            tracing::error!(
                "Notification fallback failed for message {}: {}",
                record.message_id,
                e
            );
        }
        Ok(())
    }

    /// 删除消息，仅发送者可操作 / Delete a message, sender only
    pub async fn delete_chat_message(
        &self,
        requester_uid: &str,
        connection_id: &str,
        data: DeleteMessageData,
    ) -> Result<(), ChatError> {
        let message = self
            .storage
            .find_message(&data.message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("message".to_string()))?;

        if message.sender_id != requester_uid {
            return Err(ChatError::Validation(
                "cannot delete this message".to_string(),
            ));
        }

        self.storage.delete_message(&data.message_id).await?;
        // 级联清理其触发的通知 / Cascade away the notifications it triggered
        let removed = self
            .storage
            .delete_notifications_by_related(&data.message_id)
            .await?;
        debug!(
            "🧹 Deleted message {} and {} related notifications",
            data.message_id, removed
        );

        let delete_data = json!({
            "message_id": data.message_id,
            "deleted_by": requester_uid,
            "deleted_at": Utc::now(),
        });
        self.send_event_to_user(
            &message.recipient_id,
            &ChatEvent::new("delete", delete_data.clone()),
        )
        .await;

        let mut confirm = delete_data;
        confirm["confirmed"] = json!(true);
        let _ = self
            .send_event_to_connection(connection_id, &ChatEvent::new("delete", confirm))
            .await;
        Ok(())
    }

    /// 消息出站视图 / Outbound message view
    fn message_view(&self, record: &MessageRecord) -> serde_json::Value {
        json!({
            "message_id": record.message_id,
            "sender_id": record.sender_id,
            "sender_name": self.display_name(&record.sender_id),
            "recipient_id": record.recipient_id,
            "content": record.content,
            "attachments": record.attachments,
            "is_read": record.is_read,
            "sent_at": record.sent_at,
        })
    }
}
