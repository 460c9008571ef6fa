use async_trait::async_trait;
use std::time::Duration;

use crate::error::ChatError;
use crate::server::CampusIMServer;

/// 鉴权通过的用户 / Authenticated user
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: String,
    pub display_name: Option<String>,
}

/// 身份提供方接口 / Identity provider interface
///
/// 把一次连接握手解析为用户身份；失败仅对该连接致命
/// Resolves a connection handshake to a user identity; failure is fatal to
/// that connection attempt only
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, uid: &str, token: &str) -> Result<AuthedUser, ChatError>;
}

/// 本地放行实现，开发与测试用 / Permissive local implementation for dev and tests
pub struct LocalAuthProvider;

#[async_trait]
impl AuthProvider for LocalAuthProvider {
    async fn authenticate(&self, uid: &str, _token: &str) -> Result<AuthedUser, ChatError> {
        if uid.is_empty() {
            return Err(ChatError::Auth("user id is required".to_string()));
        }
        Ok(AuthedUser {
            user_id: uid.to_string(),
            display_name: None,
        })
    }
}

/// 远端身份中心实现 / Remote identity-center implementation
pub struct RemoteAuthProvider {
    center_url: String,
    timeout_ms: u64,
}

impl RemoteAuthProvider {
    pub fn new(center_url: String, timeout_ms: u64) -> Self {
        Self {
            center_url,
            timeout_ms,
        }
    }
}

#[async_trait]
impl AuthProvider for RemoteAuthProvider {
    async fn authenticate(&self, uid: &str, token: &str) -> Result<AuthedUser, ChatError> {
        if uid.is_empty() {
            return Err(ChatError::Auth("user id is required".to_string()));
        }
        if token.is_empty() {
            return Err(ChatError::Auth("token is required".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.timeout_ms))
            .build()
            .map_err(|e| ChatError::Auth(e.to_string()))?;
        let resp = client
            .get(format!("{}/v1/sso/auth", self.center_url))
            .query(&[("token", token), ("uid", uid)])
            .send()
            .await
            .map_err(|e| ChatError::Auth(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ChatError::Auth(format!(
                "identity center rejected token ({})",
                resp.status()
            )));
        }
        // 身份中心可选返回显示名 / The center may optionally return a display name
        let display_name = resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("name").and_then(|n| n.as_str()).map(String::from));
        Ok(AuthedUser {
            user_id: uid.to_string(),
            display_name,
        })
    }
}

impl CampusIMServer {
    /// 应用鉴权结果并建立用户映射 / Apply auth result and build the user mapping
    ///
    /// 首个连接触发 offline -> online；之后每个设备登记都重新广播全量状态
    /// The first connection drives offline -> online; every device login
    /// rebroadcasts the full presence map
    pub async fn apply_auth(&self, connection_id: &str, user: &AuthedUser) {
        if let Some(name) = &user.display_name {
            self.user_names.insert(user.user_id.clone(), name.clone());
        }
        let first = self.registry.bind_user(connection_id, &user.user_id);
        if first {
            self.presence.mark_connected(&user.user_id);
        }
        self.broadcast_presence_map().await;
        tracing::info!(
            "🔐 Authenticated {} on connection {} (first={})",
            user.user_id,
            connection_id,
            first
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_provider_requires_uid() {
        let provider = LocalAuthProvider;
        assert!(provider.authenticate("", "t").await.is_err());
        let user = provider.authenticate("u1", "").await.unwrap();
        assert_eq!(user.user_id, "u1");
        assert!(user.display_name.is_none());
    }

    #[tokio::test]
    async fn remote_provider_rejects_empty_token() {
        let provider = RemoteAuthProvider::new("http://127.0.0.1:1".to_string(), 50);
        let err = provider.authenticate("u1", "").await.unwrap_err();
        assert!(matches!(err, ChatError::Auth(_)));
    }
}
