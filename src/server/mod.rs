pub mod presence;
pub mod registry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::config::AuthConfig;
use crate::domain::message::ChatEvent;
use crate::service::auth::{AuthProvider, LocalAuthProvider};
use crate::storage::{MemoryStore, Store};
use self::presence::PresenceTracker;
use self::registry::ConnectionRegistry;

/// 客户端连接信息 / Client connection information
#[derive(Clone)]
pub struct Connection {
    pub connection_id: String,                  // 连接唯一ID / Connection unique ID
    pub uid: Option<String>,                    // 鉴权后的用户ID / User ID after auth
    pub addr: SocketAddr,                       // 客户端地址 / Client address
    pub sender: mpsc::UnboundedSender<Message>, // 消息发送器 / Message sender
    pub last_heartbeat: Arc<Mutex<Instant>>,    // 最后心跳时间 / Last heartbeat time
}

/// 服务端全局状态 / Server global state
///
/// 注册表与在线状态是仅有的进程内共享状态，启动时构建并注入各组件
/// The registry and presence map are the only in-process shared state,
/// constructed at startup and injected into every component
pub struct CampusIMServer {
    pub registry: Arc<ConnectionRegistry>,         // 连接注册表 / Connection registry
    pub presence: Arc<PresenceTracker>,            // 在线状态 / Presence tracker
    pub storage: Arc<dyn Store>,                   // 存储 / Store
    pub auth: Arc<dyn AuthProvider>,               // 身份提供方 / Identity provider
    pub user_names: Arc<DashMap<String, String>>,  // 用户显示名目录 / Display-name directory
    pub auth_config: Option<AuthConfig>,           // 鉴权配置 / Auth configuration
}

impl CampusIMServer {
    /// 构建默认服务器实例 / Build default server instance
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            presence: Arc::new(PresenceTracker::new()),
            storage: Arc::new(MemoryStore::new()),
            auth: Arc::new(LocalAuthProvider),
            user_names: Arc::new(DashMap::new()),
            auth_config: None,
        }
    }

    /// 配置存储后端 / Configure store backend
    pub fn with_storage(mut self, storage: Arc<dyn Store>) -> Self {
        self.storage = storage;
        self
    }

    /// 配置身份提供方 / Configure identity provider
    pub fn with_auth_provider(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = auth;
        self
    }

    /// 配置鉴权 / Configure auth
    pub fn with_auth_config(mut self, config: AuthConfig) -> Self {
        self.auth_config = Some(config);
        self
    }

    /// 显示名，未知用户回退到ID / Display name, falling back to the id
    pub fn display_name(&self, uid: &str) -> String {
        self.user_names
            .get(uid)
            .map(|n| n.clone())
            .unwrap_or_else(|| uid.to_string())
    }

    /// 鉴权后的连接所属用户 / Authenticated owner of a connection
    pub fn authed_uid(&self, connection_id: &str) -> Option<String> {
        self.registry.get(connection_id).and_then(|c| c.uid.clone())
    }

    /// 全量在线状态广播 / Broadcast the full presence map
    pub async fn broadcast_presence_map(&self) {
        let event = ChatEvent::new("get_online_users", self.presence.snapshot());
        self.broadcast_event(&event).await;
    }

    /// 更新连接心跳 / Update connection heartbeat
    pub fn update_heartbeat(&self, connection_id: &str) {
        if let Some(connection) = self.registry.get(connection_id) {
            *connection.last_heartbeat.lock() = Instant::now();
        }
    }

    /// 统一断连收尾：注销连接，最后一个连接离线并广播
    /// Unified disconnect teardown: unregister, go offline on last connection
    /// and broadcast
    pub async fn finalize_disconnect(&self, connection_id: &str) {
        if let Some(removed) = self.registry.unregister(connection_id) {
            tracing::debug!(
                "Connection {} from {} unregistered",
                connection_id,
                removed.connection.addr
            );
            if let Some(uid) = removed.last_for_user {
                self.presence.mark_disconnected(&uid);
                self.broadcast_presence_map().await;
            }
        }
    }
}

impl Default for CampusIMServer {
    fn default() -> Self {
        Self::new()
    }
}

/// 便捷克隆 / Convenience clone
impl Clone for CampusIMServer {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            presence: self.presence.clone(),
            storage: self.storage.clone(),
            auth: self.auth.clone(),
            user_names: self.user_names.clone(),
            auth_config: self.auth_config.clone(),
        }
    }
}
