//! 应用配置模块

use crate::core::scanner::{default_exclude_patterns, ScanConfig};
use crate::core::{CompareConfig, SyncConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 配置文件名
pub const CONFIG_FILE: &str = "config.json";
/// 默认令牌文件名
pub const TOKEN_FILE: &str = "token.json";

/// 读取整个配置文件，不存在或无法解析时返回空对象
fn read_config_value(config_file: &Path) -> serde_json::Value {
    fs::read_to_string(config_file)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .filter(|value| value.is_object())
        .unwrap_or_else(|| serde_json::json!({}))
}

/// 读取一个配置节，缺失或格式错误时使用默认值
pub fn load_section<T: DeserializeOwned + Default>(config_file: &Path, key: &str) -> T {
    read_config_value(config_file)
        .get(key)
        .and_then(|section| serde_json::from_value::<T>(section.clone()).ok())
        .unwrap_or_default()
}

/// 写入一个配置节，保留文件中的其它内容
pub fn save_section<T: Serialize>(config_file: &Path, key: &str, section: &T) -> io::Result<()> {
    if let Some(parent) = config_file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut config = read_config_value(config_file);
    config[key] = serde_json::to_value(section).map_err(io::Error::other)?;

    let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
    fs::write(config_file, content)
}

/// 同步配置（config.json 中的 sync 节）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 本地同步根目录
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    /// 远程根文件夹名称，默认与本地目录同名
    #[serde(default)]
    pub remote_folder: Option<String>,
    /// 授权令牌文件，默认在配置目录下
    #[serde(default)]
    pub token_path: Option<PathBuf>,
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 修改时间容差（秒）
    #[serde(default)]
    pub time_tolerance_seconds: i64,
    #[serde(default)]
    pub ignore_mtime: bool,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

fn default_max_concurrent_transfers() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            local_path: None,
            remote_folder: None,
            token_path: None,
            max_concurrent_transfers: default_max_concurrent_transfers(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            time_tolerance_seconds: 0,
            ignore_mtime: false,
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl SyncSettings {
    /// 从配置文件加载同步配置
    pub fn load(config_file: &Path) -> Self {
        load_section(config_file, "sync")
    }

    /// 保存同步配置
    pub fn save(&self, config_file: &Path) -> io::Result<()> {
        save_section(config_file, "sync", self)
    }

    /// 令牌文件路径
    pub fn token_path(&self, config_dir: &Path) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| config_dir.join(TOKEN_FILE))
    }

    /// 远程根文件夹名称，未配置时使用本地目录名
    pub fn effective_remote_folder(&self, local_path: &Path) -> Option<String> {
        self.remote_folder.clone().or_else(|| {
            local_path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
        })
    }

    /// 转换为引擎配置
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_concurrent_transfers: self.max_concurrent_transfers.max(1),
            max_retries: self.max_retries,
            retry_base_delay_ms: self.retry_base_delay_ms,
            scan_config: ScanConfig {
                exclude_patterns: self.exclude_patterns.clone(),
                max_concurrent: self.max_concurrent_transfers.max(1),
            },
            compare_config: CompareConfig {
                time_tolerance_seconds: self.time_tolerance_seconds.max(0),
                ignore_mtime: self.ignore_mtime,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = SyncSettings::load(&tmp.path().join(CONFIG_FILE));
        assert_eq!(settings.max_concurrent_transfers, 4);
        assert_eq!(settings.max_retries, 3);
        assert!(settings.exclude_patterns.contains(&"*.tmp".to_string()));
        assert_eq!(
            settings.token_path(tmp.path()),
            tmp.path().join(TOKEN_FILE)
        );
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join(CONFIG_FILE);
        fs::write(
            &file,
            r#"{"sync": {"localPath": "/data/DnD", "maxConcurrentTransfers": 8, "ignoreMtime": true}}"#,
        )
        .unwrap();

        let settings = SyncSettings::load(&file);
        assert_eq!(settings.local_path, Some(PathBuf::from("/data/DnD")));
        assert_eq!(settings.max_concurrent_transfers, 8);
        assert_eq!(settings.retry_base_delay_ms, 500);
        assert_eq!(
            settings.effective_remote_folder(Path::new("/data/DnD")).as_deref(),
            Some("DnD")
        );

        let config = settings.sync_config();
        assert!(config.compare_config.ignore_mtime);
        assert_eq!(config.scan_config.max_concurrent, 8);
    }

    #[test]
    fn test_save_keeps_other_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join(CONFIG_FILE);
        fs::write(&file, r#"{"log": {"level": "debug"}}"#).unwrap();

        let settings = SyncSettings {
            remote_folder: Some("Campaigns".to_string()),
            ..Default::default()
        };
        settings.save(&file).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(value["log"]["level"], "debug");
        assert_eq!(value["sync"]["remoteFolder"], "Campaigns");
        assert_eq!(SyncSettings::load(&file).remote_folder.as_deref(), Some("Campaigns"));
    }

    #[test]
    fn test_invalid_json_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join(CONFIG_FILE);
        fs::write(&file, "not json").unwrap();
        assert_eq!(SyncSettings::load(&file).max_retries, 3);
    }
}
