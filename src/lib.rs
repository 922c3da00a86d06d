use std::path::PathBuf;

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use core::{SyncConfig, SyncDirection, SyncEngine, SyncPlan, SyncReport};
pub use error::{Result, SyncError};

/// 配置目录名
pub const APP_DIR_NAME: &str = "drivesync";

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".drivesync"))
}
