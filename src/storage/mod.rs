pub mod drive;
pub mod local;
#[cfg(test)]
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use drive::DriveStorage;
pub use local::{LocalFile, LocalStorage};

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- list, delete, rename 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 上传、下载
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程文件夹
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
}

/// 远程文件（不含文件夹）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: DateTime<Utc>,
    /// 原生文档没有 checksum
    pub checksum: Option<String>,
    pub size: u64,
}

/// 远程存储接口
///
/// 所有列表操作都不返回回收站中的条目。
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 顶层文件夹的父 id
    fn root_id(&self) -> &str;

    /// 列出直接子文件夹
    async fn list_child_folders(&self, folder_id: &str) -> Result<Vec<RemoteFolder>>;

    /// 列出直接子文件（不含文件夹）
    async fn list_files(&self, folder_id: &str) -> Result<Vec<RemoteFile>>;

    /// 创建文件夹，返回新 id
    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String>;

    /// 删除文件或文件夹
    async fn delete_entry(&self, id: &str) -> Result<()>;

    /// 上传新文件，返回新 id
    async fn upload_file(
        &self,
        local_path: &Path,
        name: &str,
        parent_id: &str,
        mime_type: &str,
    ) -> Result<String>;

    /// 覆盖已有文件的内容
    async fn update_file_content(&self, id: &str, local_path: &Path, mime_type: &str) -> Result<()>;

    /// 修改显示名称
    async fn rename_file(&self, id: &str, new_name: &str) -> Result<()>;

    /// 导出原生文档并保存到本地
    async fn export_and_download(&self, id: &str, export_mime: &str, dest: &Path) -> Result<()>;

    /// 下载普通文件
    async fn download_file(&self, id: &str, dest: &Path) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建远程存储实例
pub async fn create_storage(
    settings: &crate::config::SyncSettings,
    config_dir: &Path,
) -> anyhow::Result<Arc<dyn RemoteStore>> {
    let token_path = settings.token_path(config_dir);
    tracing::info!("初始化云盘存储, 令牌文件: {:?}", token_path);
    let storage = DriveStorage::from_token_file(&token_path).await?;
    Ok(Arc::new(storage) as Arc<dyn RemoteStore>)
}
