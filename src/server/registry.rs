use dashmap::{DashMap, DashSet};

use super::Connection;

/// 注销结果 / Unregistration outcome
pub struct Unregistered {
    pub connection: Connection,
    /// 该用户最后一个连接断开时为Some(uid) / Some(uid) when the user's last connection closed
    pub last_for_user: Option<String>,
}

/// 连接注册表 / Connection registry
///
/// 用户身份与其当前打开的连接集合的双向映射，支持多设备并发在线。
/// 条目缺失是正常状态而不是错误。
/// Bidirectional mapping between a user identity and its set of open
/// connections, supporting concurrent multi-device sessions. Absence of an
/// entry is a normal state, not an error.
pub struct ConnectionRegistry {
    /// connection_id -> 连接 / connection_id -> connection
    pub connections: DashMap<String, Connection>,
    /// user_id -> 连接ID集合 / user_id -> connection ids
    pub user_index: DashMap<String, DashSet<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
        }
    }

    /// 握手成功前先登记匿名连接 / Track an anonymous connection before auth completes
    pub fn insert(&self, connection: Connection) {
        self.connections
            .insert(connection.connection_id.clone(), connection);
    }

    /// 将连接绑定到用户；返回是否该用户的首个连接
    /// Bind a connection to a user; returns whether it is the user's first
    pub fn bind_user(&self, connection_id: &str, uid: &str) -> bool {
        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.uid = Some(uid.to_string());
        }
        let set = self.user_index.entry(uid.to_string()).or_default();
        let first = set.is_empty();
        set.insert(connection_id.to_string());
        first
    }

    /// 注销一个连接 / Unregister exactly one connection
    pub fn unregister(&self, connection_id: &str) -> Option<Unregistered> {
        let (_, connection) = self.connections.remove(connection_id)?;
        let mut last_for_user = None;
        if let Some(uid) = &connection.uid {
            let mut gone = false;
            if let Some(set) = self.user_index.get_mut(uid) {
                set.remove(connection_id);
                gone = set.is_empty();
            }
            if gone {
                self.user_index.remove(uid);
                last_for_user = Some(uid.clone());
            }
        }
        Some(Unregistered {
            connection,
            last_for_user,
        })
    }

    /// 用户的全部在线连接 / All live connection ids for a user
    pub fn connections_for(&self, uid: &str) -> Vec<String> {
        self.user_index
            .get(uid)
            .map(|set| set.iter().map(|id| id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn get(
        &self,
        connection_id: &str,
    ) -> Option<dashmap::mapref::one::Ref<'_, String, Connection>> {
        self.connections.get(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn connection(id: &str) -> Connection {
        let (tx, _rx) = mpsc::unbounded_channel::<Message>();
        Connection {
            connection_id: id.to_string(),
            uid: None,
            addr: "127.0.0.1:0".parse().unwrap(),
            sender: tx,
            last_heartbeat: Arc::new(parking_lot::Mutex::new(Instant::now())),
        }
    }

    #[test]
    fn bind_reports_first_connection_only() {
        let registry = ConnectionRegistry::new();
        registry.insert(connection("c1"));
        registry.insert(connection("c2"));

        assert!(registry.bind_user("c1", "u1"));
        assert!(!registry.bind_user("c2", "u1"));
        assert_eq!(registry.connections_for("u1").len(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister_reports_last_connection_only() {
        let registry = ConnectionRegistry::new();
        registry.insert(connection("c1"));
        registry.insert(connection("c2"));
        registry.bind_user("c1", "u1");
        registry.bind_user("c2", "u1");

        let first = registry.unregister("c1").unwrap();
        assert!(first.last_for_user.is_none());

        let second = registry.unregister("c2").unwrap();
        assert_eq!(second.last_for_user.as_deref(), Some("u1"));
        assert!(registry.connections_for("u1").is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_unknown_connection_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.unregister("missing").is_none());
    }
}
