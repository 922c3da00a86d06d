//! 同步错误类型

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// 同步过程中的错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 根目录或根文件夹无法解析，或配置无效
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 本地文件读写失败
    #[error("本地 IO 错误 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 远程存储调用失败
    #[error("远程调用失败 ({operation}): {message}")]
    RemoteApi {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    /// 两个条目竞争同一个相对路径
    #[error("路径冲突 {path}: {detail}")]
    Ambiguity { path: String, detail: String },
}

impl SyncError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn remote(operation: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        SyncError::RemoteApi {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub fn ambiguity(path: impl ToString, detail: impl Into<String>) -> Self {
        SyncError::Ambiguity {
            path: path.to_string(),
            detail: detail.into(),
        }
    }

    /// 基础设施错误（网络、限流、服务端 5xx）可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RemoteApi { status: None, .. } => true,
            SyncError::RemoteApi {
                status: Some(code), ..
            } => *code == 429 || (500..600).contains(code),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::RemoteApi {
            operation: e
                .url()
                .map(|u| u.path().to_string())
                .unwrap_or_else(|| "http".to_string()),
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::remote("list", None, "connection reset").is_retryable());
        assert!(SyncError::remote("list", Some(429), "rate limited").is_retryable());
        assert!(SyncError::remote("list", Some(503), "unavailable").is_retryable());
        assert!(!SyncError::remote("list", Some(404), "not found").is_retryable());
        assert!(!SyncError::Configuration("x".into()).is_retryable());
        assert!(!SyncError::ambiguity("DnD/Maps", "duplicate").is_retryable());
    }
}
