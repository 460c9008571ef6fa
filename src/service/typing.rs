use chrono::Utc;
use serde_json::json;

use crate::domain::message::{ChatEvent, TypingData};
use crate::server::CampusIMServer;

/// 输入指示转发 / Typing indicator relay
impl CampusIMServer {
    /// 尽力而为的单向转发：无持久化、无确认，接收方缺失为no-op
    /// Best-effort one-way relay: no persistence, no acknowledgement, a
    /// missing recipient is a no-op
    pub async fn notify_typing(&self, sender_uid: &str, data: TypingData) {
        let Some(recipient_id) = data.recipient_id else {
            return;
        };
        let payload = json!({
            "user_id": sender_uid,
            "user_name": self.display_name(sender_uid),
            "status": data.status,
            "timestamp": Utc::now(),
        });
        self.send_event_to_user(&recipient_id, &ChatEvent::new("typing", payload))
            .await;
    }
}
