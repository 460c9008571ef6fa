use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::domain::message::{
    AuthData, ChatEvent, DeleteMessageData, JoinChatData, MarkNotificationsReadData, MarkReadData,
    SendMessageData, TypingData,
};
use crate::error::ChatError;
use crate::server::CampusIMServer;

/// 入站事件分发 / Inbound event dispatch
///
/// 边界规则：任何事件处理错误降级为 `error` 事件，绝不终止连接处理进程
/// Boundary rule: every handling error degrades to an `error` event and
/// never brings the connection-handling process down
impl CampusIMServer {
    pub async fn handle_incoming_event(
        &self,
        message: Message,
        connection_id: &str,
    ) -> Result<()> {
        // 任何入站流量都算一次心跳 / Any inbound traffic counts as a heartbeat
        self.update_heartbeat(connection_id);

        match message {
            Message::Text(text) => {
                debug!("📨 Received text from {}: {}", connection_id, text);
                self.dispatch_text(&text, connection_id).await;
            }
            Message::Binary(data) => {
                debug!(
                    "📦 Ignoring binary frame from {} ({} bytes)",
                    connection_id,
                    data.len()
                );
            }
            Message::Ping(_) => {
                debug!("🏓 Received ping from {}", connection_id);
            }
            Message::Pong(_) => {
                debug!("🏸 Received pong from {}", connection_id);
            }
            Message::Close(frame) => {
                info!("🔒 Connection {} requested close: {:?}", connection_id, frame);
            }
            _ => {
                debug!("❓ Received other message type from {}", connection_id);
            }
        }
        Ok(())
    }

    async fn dispatch_text(&self, text: &str, connection_id: &str) {
        let event = match serde_json::from_str::<ChatEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("⚠️  Invalid JSON from {}: {}", connection_id, e);
                self.emit_error(connection_id, "unknown", "invalid json", None)
                    .await;
                return;
            }
        };

        match event.event.as_str() {
            "ping" => {
                let pong = ChatEvent::new(
                    "pong",
                    json!({
                        "timestamp": Utc::now().timestamp_millis(),
                        "connection_id": connection_id,
                    }),
                );
                let _ = self.send_event_to_connection(connection_id, &pong).await;
            }
            "auth" => {
                let Some(data) = self.parse::<AuthData>(&event, connection_id).await else {
                    return;
                };
                info!("🔐 Auth request from {}", connection_id);
                match self.auth.authenticate(&data.uid, &data.token).await {
                    Ok(user) => {
                        let response = ChatEvent::new(
                            "auth_response",
                            json!({"status": "success", "message": "Authentication successful"}),
                        );
                        let _ = self.send_event_to_connection(connection_id, &response).await;
                        self.apply_auth(connection_id, &user).await;
                    }
                    Err(e) => {
                        warn!("Auth failed for {}: {}", connection_id, e);
                        let response = ChatEvent::new(
                            "auth_response",
                            json!({"status": "failed", "message": e.client_message()}),
                        );
                        let _ = self.send_event_to_connection(connection_id, &response).await;
                    }
                }
            }
            "join_chat" => {
                let Some(uid) = self.require_uid(connection_id, &event.event).await else {
                    return;
                };
                let Some(data) = self.parse::<JoinChatData>(&event, connection_id).await else {
                    return;
                };
                self.handle_join_chat(&uid, &data.friend_id).await;
            }
            "leave_chat" => {
                let Some(uid) = self.require_uid(connection_id, &event.event).await else {
                    return;
                };
                self.handle_leave_chat(&uid).await;
            }
            "message" => {
                let Some(uid) = self.require_uid(connection_id, &event.event).await else {
                    return;
                };
                let Some(data) = self.parse::<SendMessageData>(&event, connection_id).await else {
                    return;
                };
                let temp_id = data.temp_id.clone();
                if let Err(e) = self.send_chat_message(&uid, connection_id, data).await {
                    self.emit_error(
                        connection_id,
                        "message",
                        &e.client_message(),
                        temp_id.as_deref(),
                    )
                    .await;
                }
            }
            "mark_read" => {
                let Some(uid) = self.require_uid(connection_id, &event.event).await else {
                    return;
                };
                let Some(data) = self.parse::<MarkReadData>(&event, connection_id).await else {
                    return;
                };
                if let Err(e) = self.mark_messages_read(&uid, connection_id, data).await {
                    self.emit_error(connection_id, "read", &e.client_message(), None)
                        .await;
                }
            }
            "delete_message" => {
                let Some(uid) = self.require_uid(connection_id, &event.event).await else {
                    return;
                };
                let Some(data) = self.parse::<DeleteMessageData>(&event, connection_id).await
                else {
                    return;
                };
                if let Err(e) = self.delete_chat_message(&uid, connection_id, data).await {
                    self.emit_error(connection_id, "delete", &e.client_message(), None)
                        .await;
                }
            }
            "typing" => {
                let Some(uid) = self.require_uid(connection_id, &event.event).await else {
                    return;
                };
                let Some(data) = self.parse::<TypingData>(&event, connection_id).await else {
                    return;
                };
                self.notify_typing(&uid, data).await;
            }
            "get_notifications" => {
                let Some(uid) = self.require_uid(connection_id, &event.event).await else {
                    return;
                };
                if let Err(e) = self.get_notifications(&uid, connection_id).await {
                    self.emit_error(connection_id, "get_notifications", &e.client_message(), None)
                        .await;
                }
            }
            "mark_notifications_read" => {
                let Some(uid) = self.require_uid(connection_id, &event.event).await else {
                    return;
                };
                let Some(data) = self
                    .parse::<MarkNotificationsReadData>(&event, connection_id)
                    .await
                else {
                    return;
                };
                if let Err(e) = self.mark_notifications_read(&uid, connection_id, data).await {
                    self.emit_error(
                        connection_id,
                        "mark_notifications_read",
                        &e.client_message(),
                        None,
                    )
                    .await;
                }
            }
            other => {
                warn!("⚠️  Unknown event type from {}: {}", connection_id, other);
                self.emit_error(
                    connection_id,
                    other,
                    &format!("Unknown event type: {}", other),
                    None,
                )
                .await;
            }
        }
    }

    /// 进入会话：-> online 并向其他用户广播 / Join a conversation
    pub async fn handle_join_chat(&self, uid: &str, friend_id: &str) {
        let status = self.presence.join_conversation(uid, friend_id);
        info!(
            "💬 [JOIN CHAT] {} viewing {} -> {}",
            uid,
            friend_id,
            status.as_str()
        );
        self.broadcast_presence_map().await;
        self.broadcast_event_except(
            uid,
            &ChatEvent::new(
                "online_user",
                json!({
                    "user_id": uid,
                    "user_name": self.display_name(uid),
                    "status": status,
                    "timestamp": Utc::now(),
                }),
            ),
        )
        .await;
    }

    /// 离开会话但保持连接：-> active / Leave a conversation while connected
    pub async fn handle_leave_chat(&self, uid: &str) {
        let status = self.presence.leave_conversation(uid);
        info!("💬 [LEAVE CHAT] {} -> {}", uid, status.as_str());
        self.broadcast_presence_map().await;
        self.broadcast_event_except(
            uid,
            &ChatEvent::new(
                "online_user",
                json!({
                    "user_id": uid,
                    "status": status,
                    "timestamp": Utc::now(),
                }),
            ),
        )
        .await;
    }

    /// 发送error事件，带原事件名与可选temp_id / Emit an error event tagged with
    /// the originating event name and the optional temp id
    pub async fn emit_error(
        &self,
        connection_id: &str,
        event_name: &str,
        message: &str,
        temp_id: Option<&str>,
    ) {
        let mut data = json!({ "event": event_name, "message": message });
        if let Some(temp_id) = temp_id {
            data["temp_id"] = json!(temp_id);
        }
        let _ = self
            .send_event_to_connection(connection_id, &ChatEvent::new("error", data))
            .await;
    }

    async fn require_uid(&self, connection_id: &str, event_name: &str) -> Option<String> {
        match self.authed_uid(connection_id) {
            Some(uid) => Some(uid),
            None => {
                let err = ChatError::Auth("requires authentication".to_string());
                self.emit_error(connection_id, event_name, &err.client_message(), None)
                    .await;
                None
            }
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        &self,
        event: &ChatEvent,
        connection_id: &str,
    ) -> Option<T> {
        match serde_json::from_value::<T>(event.data.clone()) {
            Ok(data) => Some(data),
            Err(e) => {
                self.emit_error(
                    connection_id,
                    &event.event,
                    &format!("malformed {} payload: {}", event.event, e),
                    None,
                )
                .await;
                None
            }
        }
    }
}
