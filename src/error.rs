use thiserror::Error;

/// 存储层错误 / Storage layer error
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// 核心错误分类 / Core error taxonomy
///
/// 任何处理器都不允许因这些错误而崩溃，统一在边界降级为 `error` 事件
/// No handler may crash on these; every boundary degrades to an `error` event
#[derive(Debug, Error)]
pub enum ChatError {
    /// 鉴权失败，仅对该次连接致命 / Auth failure, fatal to this connection attempt only
    #[error("authentication failed: {0}")]
    Auth(String),

    /// 入参不合法，回报给发起连接 / Malformed input, reported to the originating connection
    #[error("{0}")]
    Validation(String),

    /// 操作对象不存在 / Target entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// 存储不可用 / Store unavailable
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl ChatError {
    /// 对端可见的错误文案 / Client-visible error text
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Auth(_) => "authentication failed".to_string(),
            ChatError::Validation(msg) => msg.clone(),
            ChatError::NotFound(what) => format!("{} not found", what),
            ChatError::Persistence(_) => "temporary storage failure".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_do_not_leak_internals() {
        let err = ChatError::Persistence(StoreError::Unavailable("pool exhausted".to_string()));
        assert_eq!(err.client_message(), "temporary storage failure");

        let err = ChatError::Auth("token expired at upstream".to_string());
        assert_eq!(err.client_message(), "authentication failed");

        let err = ChatError::NotFound("message".to_string());
        assert_eq!(err.client_message(), "message not found");
    }
}
