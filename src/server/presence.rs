use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// 在线状态 / Presence status
///
/// `online`：已连接且正聚焦在某个会话；`active`：已连接但不在会话中；
/// `offline`：没有任何连接。
/// `online`: connected and focused on a conversation; `active`: connected
/// but away from any conversation; `offline`: no connections at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Active,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Active => "active",
            PresenceStatus::Offline => "offline",
        }
    }
}

/// 单用户在线记录 / Per-user presence record
#[derive(Clone, Debug, Serialize)]
pub struct PresenceRecord {
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
    /// 正在查看与哪位好友的会话 / Which peer's conversation is being viewed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewing: Option<String>,
}

/// 在线状态跟踪器 / Presence tracker
///
/// 不落库：重启后所有用户回到offline，重连时自愈
/// Never persisted: a restart resets everyone to offline and reconnects
/// self-heal the map
pub struct PresenceTracker {
    records: DashMap<String, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// 首个连接注册：offline -> online / First connection registered
    pub fn mark_connected(&self, uid: &str) -> PresenceStatus {
        self.set(uid, PresenceStatus::Online, None)
    }

    /// 进入会话：-> online，并记录对端 / Join a conversation
    pub fn join_conversation(&self, uid: &str, friend_id: &str) -> PresenceStatus {
        self.set(uid, PresenceStatus::Online, Some(friend_id.to_string()))
    }

    /// 离开会话但保持连接：-> active / Leave a conversation while connected
    pub fn leave_conversation(&self, uid: &str) -> PresenceStatus {
        self.set(uid, PresenceStatus::Active, None)
    }

    /// 最后一个连接关闭：-> offline / Last connection closed
    pub fn mark_disconnected(&self, uid: &str) -> PresenceStatus {
        self.set(uid, PresenceStatus::Offline, None)
    }

    /// 通知路径查询的权威状态 / Authoritative status consulted by the notification path
    pub fn status_of(&self, uid: &str) -> PresenceStatus {
        self.records
            .get(uid)
            .map(|r| r.status)
            .unwrap_or(PresenceStatus::Offline)
    }

    pub fn record_of(&self, uid: &str) -> Option<PresenceRecord> {
        self.records.get(uid).map(|r| r.clone())
    }

    /// 全量状态快照，供 get_online_users 广播 / Full snapshot for get_online_users
    pub fn snapshot(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for entry in self.records.iter() {
            map.insert(
                entry.key().clone(),
                serde_json::to_value(entry.value()).unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(map)
    }

    fn set(&self, uid: &str, status: PresenceStatus, viewing: Option<String>) -> PresenceStatus {
        self.records.insert(
            uid.to_string(),
            PresenceRecord {
                status,
                last_seen: Utc::now(),
                viewing,
            },
        );
        status
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_is_offline() {
        let tracker = PresenceTracker::new();
        assert_eq!(tracker.status_of("u1"), PresenceStatus::Offline);
    }

    #[test]
    fn transition_table() {
        let tracker = PresenceTracker::new();

        // offline -> online 首连 / first connection
        tracker.mark_connected("u1");
        assert_eq!(tracker.status_of("u1"), PresenceStatus::Online);

        // online -> active 离开会话 / leave conversation
        tracker.leave_conversation("u1");
        assert_eq!(tracker.status_of("u1"), PresenceStatus::Active);
        assert!(tracker.record_of("u1").unwrap().viewing.is_none());

        // active -> online 进入会话，记录对端 / join, peer recorded
        tracker.join_conversation("u1", "u2");
        assert_eq!(tracker.status_of("u1"), PresenceStatus::Online);
        assert_eq!(
            tracker.record_of("u1").unwrap().viewing.as_deref(),
            Some("u2")
        );

        // -> offline 最后连接关闭 / last connection closed
        tracker.mark_disconnected("u1");
        assert_eq!(tracker.status_of("u1"), PresenceStatus::Offline);
    }

    #[test]
    fn snapshot_serializes_status_strings() {
        let tracker = PresenceTracker::new();
        tracker.mark_connected("u1");
        let snap = tracker.snapshot();
        assert_eq!(snap["u1"]["status"], "online");
        assert!(snap["u1"]["last_seen"].is_string());
    }
}
