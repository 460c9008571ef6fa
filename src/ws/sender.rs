use anyhow::Result;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::domain::message::ChatEvent;
use crate::server::CampusIMServer;

/// 定向投递与广播 / Addressed delivery and broadcast
impl CampusIMServer {
    /// 向指定连接发送消息 / Send a message to a specific connection
    pub async fn send_to_connection(&self, connection_id: &str, message: Message) -> Result<()> {
        if let Some(connection) = self.registry.get(connection_id) {
            connection
                .sender
                .send(message)
                .map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;
            debug!("📤 Sent message to connection {}", connection_id);
            Ok(())
        } else {
            warn!("⚠️  Connection {} not found for delivery", connection_id);
            Err(anyhow::anyhow!("Connection {} not found", connection_id))
        }
    }

    pub async fn send_event_to_connection(
        &self,
        connection_id: &str,
        event: &ChatEvent,
    ) -> Result<()> {
        self.send_to_connection(connection_id, Message::Text(event.to_text()?))
            .await
    }

    /// 向用户的全部在线连接投递；返回送达数，0不是错误
    /// Deliver to every live connection of a user; returns the delivered
    /// count, where 0 is a normal outcome
    pub async fn send_event_to_user(&self, uid: &str, event: &ChatEvent) -> usize {
        let text = match event.to_text() {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.event, e);
                return 0;
            }
        };
        let mut delivered = 0usize;
        for connection_id in self.registry.connections_for(uid) {
            if self
                .send_to_connection(&connection_id, Message::Text(text.clone()))
                .await
                .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// 广播给所有连接 / Broadcast to every connection
    pub async fn broadcast_event(&self, event: &ChatEvent) {
        let text = match event.to_text() {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.event, e);
                return;
            }
        };
        let mut dead = Vec::new();
        for entry in self.registry.connections.iter() {
            if entry.value().sender.send(Message::Text(text.clone())).is_err() {
                dead.push(entry.key().clone());
            }
        }
        // 清理已死连接；其读循环退出时会完成广播收尾
        // Sweep dead connections; their read-loop teardown completes the
        // broadcast side
        for connection_id in dead {
            if let Some(removed) = self.registry.unregister(&connection_id) {
                if let Some(uid) = removed.last_for_user {
                    self.presence.mark_disconnected(&uid);
                }
            }
        }
    }

    /// 广播给除某用户外的所有连接 / Broadcast to every connection except one user's
    pub async fn broadcast_event_except(&self, uid: &str, event: &ChatEvent) {
        let text = match event.to_text() {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.event, e);
                return;
            }
        };
        for entry in self.registry.connections.iter() {
            if entry.value().uid.as_deref() == Some(uid) {
                continue;
            }
            let _ = entry.value().sender.send(Message::Text(text.clone()));
        }
    }

    /// 发送关闭帧 / Send a close frame
    pub async fn send_close(&self, connection_id: &str) -> Result<()> {
        if let Some(connection) = self.registry.get(connection_id) {
            connection
                .sender
                .send(Message::Close(Some(
                    tokio_tungstenite::tungstenite::protocol::CloseFrame {
                        code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                        reason: std::borrow::Cow::Borrowed("Connection closed by server"),
                    },
                )))
                .map_err(|e| anyhow::anyhow!("Failed to send close message: {}", e))?;
            debug!("🔒 Sent close frame to connection {}", connection_id);
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "Connection {} not found for close",
                connection_id
            ))
        }
    }
}
