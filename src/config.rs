use anyhow::Result;
use serde::Deserialize;

/// 服务配置 / Server configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub ws_port: u16,
    pub heartbeat_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ws_port: 5300,
            heartbeat_timeout_ms: 30_000,
        }
    }
}

/// 鉴权配置 / Auth configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub center_url: String,
    pub timeout_ms: u64,
    /// 握手必须在此时限内完成 / The handshake must complete within this window
    pub deadline_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            center_url: "http://127.0.0.1:8090".to_string(),
            timeout_ms: 1000,
            deadline_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
}

/// 加载配置文件并应用环境变量覆盖 / Load the config file with env overrides
pub fn load(path: &str) -> Result<AppConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix("CAMPUS_CONNECT").separator("__"))
        .build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load("config/definitely-not-here").unwrap();
        assert_eq!(cfg.server.ws_port, 5300);
        assert!(!cfg.auth.enabled);
        assert_eq!(cfg.auth.deadline_ms, 1000);
    }
}
