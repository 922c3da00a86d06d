use crate::core::native;
use crate::core::path::RelPath;
use crate::error::{Result, SyncError};
use crate::storage::{LocalFile, RemoteFile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 同步方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// 本地 -> 远程
    Push,
    /// 远程 -> 本地
    Pull,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::Push => write!(f, "push"),
            SyncDirection::Pull => write!(f, "pull"),
        }
    }
}

/// 文件记录（本地或远程）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub name: String,
    pub modified_time: DateTime<Utc>,
    /// 小写十六进制 MD5，原生文档和未计算的本地文件没有
    pub checksum: Option<String>,
    pub mime_type: String,
    pub remote_id: Option<String>,
    pub size: u64,
    /// 所在文件夹
    pub folder: RelPath,
}

impl FileRecord {
    pub fn from_remote(folder: &RelPath, file: RemoteFile) -> Self {
        Self {
            name: file.name,
            modified_time: file.modified_time,
            checksum: file.checksum.map(|c| c.to_ascii_lowercase()),
            mime_type: file.mime_type,
            remote_id: Some(file.id),
            size: file.size,
            folder: folder.clone(),
        }
    }

    pub fn from_local(folder: &RelPath, file: LocalFile) -> Self {
        let mime_type = mime_guess::from_path(&file.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            name: file.name,
            modified_time: file.modified,
            checksum: None,
            mime_type,
            remote_id: None,
            size: file.size,
            folder: folder.clone(),
        }
    }

    pub fn is_native(&self) -> bool {
        native::is_native(&self.mime_type)
    }

    /// 在本地对应的文件名
    pub fn local_name(&self) -> String {
        native::local_name(&self.name, &self.mime_type)
    }
}

/// 文件比较结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRelation {
    /// 文件相同
    Equal,
    /// 本地文件更新
    LocalNewer,
    /// 远程文件更新
    RemoteNewer,
    /// 内容不同（checksum 不一致或缺失）
    Different,
}

/// 比较配置
#[derive(Debug, Clone, Default)]
pub struct CompareConfig {
    /// 时间容差（秒）
    pub time_tolerance_seconds: i64,
    /// 是否忽略文件时间（checksum 相同即认为相同）
    pub ignore_mtime: bool,
}

/// 上传：新文件或覆盖已有远程文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub local: FileRecord,
    /// 有值时覆盖该远程文件的内容
    pub existing_id: Option<String>,
}

/// 下载：新文件或替换本地旧副本
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    pub remote: FileRecord,
    pub local_name: String,
    pub replace_existing: bool,
    /// 原生文档下载后远程显示名称改为本地名称
    pub rename_remote_to: Option<String>,
}

/// 单个文件夹的文件动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSyncPlan {
    pub folder: RelPath,
    pub to_upload: Vec<Upload>,
    pub to_download: Vec<Download>,
    pub to_delete_local: Vec<FileRecord>,
    pub to_delete_remote: Vec<FileRecord>,
}

impl FileSyncPlan {
    pub fn new(folder: RelPath) -> Self {
        Self {
            folder,
            to_upload: Vec::new(),
            to_download: Vec::new(),
            to_delete_local: Vec::new(),
            to_delete_remote: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.action_count() == 0
    }

    pub fn action_count(&self) -> usize {
        self.to_upload.len()
            + self.to_download.len()
            + self.to_delete_local.len()
            + self.to_delete_remote.len()
    }
}

/// 文件比较器
pub struct FileComparator {
    config: CompareConfig,
}

impl FileComparator {
    pub fn new(config: CompareConfig) -> Self {
        Self { config }
    }

    /// 比较同名的本地文件和远程文件
    pub fn compare_files(&self, local: &FileRecord, remote: &FileRecord) -> FileRelation {
        // 原生文档没有 checksum，只比较时间
        if remote.is_native() {
            return self.compare_times(local, remote);
        }

        match (&local.checksum, &remote.checksum) {
            (Some(l), Some(r)) if l == r => {
                if self.config.ignore_mtime {
                    FileRelation::Equal
                } else {
                    self.compare_times(local, remote)
                }
            }
            (Some(_), Some(_)) => {
                tracing::debug!("文件内容不同: {}/{}", local.folder, local.name);
                FileRelation::Different
            }
            _ => {
                tracing::debug!("缺少 checksum, 视为不同: {}/{}", local.folder, local.name);
                FileRelation::Different
            }
        }
    }

    fn compare_times(&self, local: &FileRecord, remote: &FileRecord) -> FileRelation {
        if self.config.ignore_mtime {
            return FileRelation::Equal;
        }

        // 统一到秒，本地文件系统精度更高
        let diff = local.modified_time.timestamp() - remote.modified_time.timestamp();
        if diff.abs() <= self.config.time_tolerance_seconds {
            return FileRelation::Equal;
        }

        tracing::debug!(
            "文件时间不同: {}/{} (local={}, remote={}, diff={}s)",
            local.folder,
            local.name,
            local.modified_time,
            remote.modified_time,
            diff
        );

        if diff > 0 {
            FileRelation::LocalNewer
        } else {
            FileRelation::RemoteNewer
        }
    }

    /// 两边都存在、需要本地 checksum 才能比较的文件名
    pub fn checksum_candidates(local: &[FileRecord], remote: &[FileRecord]) -> Vec<String> {
        let remote_names: std::collections::HashSet<String> = remote
            .iter()
            .filter(|r| !r.is_native())
            .map(|r| r.local_name())
            .collect();
        local
            .iter()
            .filter(|l| remote_names.contains(&l.name))
            .map(|l| l.name.clone())
            .collect()
    }

    /// 计算一个文件夹内的文件动作
    pub fn reconcile_folder(
        &self,
        folder: &RelPath,
        local: &[FileRecord],
        remote: &[FileRecord],
        direction: SyncDirection,
    ) -> Result<FileSyncPlan> {
        let local_by_name = index_by_name(folder, local, |f| f.name.clone())?;
        let remote_by_name = index_by_name(folder, remote, FileRecord::local_name)?;

        let mut plan = FileSyncPlan::new(folder.clone());

        for (name, local_file) in &local_by_name {
            match (remote_by_name.get(name), direction) {
                (Some(remote_file), SyncDirection::Push) => {
                    let relation = self.compare_files(local_file, remote_file);
                    if matches!(relation, FileRelation::LocalNewer | FileRelation::Different) {
                        plan.to_upload.push(Upload {
                            local: (*local_file).clone(),
                            existing_id: remote_file.remote_id.clone(),
                        });
                    }
                }
                (Some(remote_file), SyncDirection::Pull) => {
                    let relation = self.compare_files(local_file, remote_file);
                    if matches!(relation, FileRelation::RemoteNewer | FileRelation::Different) {
                        plan.to_download.push(download_for(remote_file, name, true));
                    }
                }
                (None, SyncDirection::Push) => plan.to_upload.push(Upload {
                    local: (*local_file).clone(),
                    existing_id: None,
                }),
                (None, SyncDirection::Pull) => plan.to_delete_local.push((*local_file).clone()),
            }
        }

        for (name, remote_file) in &remote_by_name {
            if local_by_name.contains_key(name) {
                continue;
            }
            match direction {
                SyncDirection::Push => plan.to_delete_remote.push((*remote_file).clone()),
                SyncDirection::Pull => plan.to_download.push(download_for(remote_file, name, false)),
            }
        }

        Ok(plan)
    }

    /// 统计文件动作
    pub fn summarize<'a, I>(plans: I) -> ActionSummary
    where
        I: IntoIterator<Item = &'a FileSyncPlan>,
    {
        let mut summary = ActionSummary::default();

        for plan in plans {
            for upload in &plan.to_upload {
                summary.upload_count += 1;
                summary.upload_bytes += upload.local.size;
            }
            for download in &plan.to_download {
                summary.download_count += 1;
                summary.download_bytes += download.remote.size;
            }
            summary.delete_local_count += plan.to_delete_local.len();
            summary.delete_remote_count += plan.to_delete_remote.len();
        }

        summary
    }
}

impl Default for FileComparator {
    fn default() -> Self {
        Self::new(CompareConfig::default())
    }
}

fn download_for(remote: &FileRecord, local_name: &str, replace_existing: bool) -> Download {
    let rename_remote_to = if remote.is_native() && remote.name != local_name {
        Some(local_name.to_string())
    } else {
        None
    };
    Download {
        remote: remote.clone(),
        local_name: local_name.to_string(),
        replace_existing,
        rename_remote_to,
    }
}

fn index_by_name<'a, F>(
    folder: &RelPath,
    files: &'a [FileRecord],
    key: F,
) -> Result<BTreeMap<String, &'a FileRecord>>
where
    F: Fn(&FileRecord) -> String,
{
    let mut index = BTreeMap::new();
    for file in files {
        let name = key(file);
        if let Some(existing) = index.insert(name.clone(), file) {
            return Err(SyncError::ambiguity(
                format!("{}/{}", folder, name),
                format!(
                    "同一文件夹下有多个文件对应同一名称 ({:?} 与 {:?})",
                    existing.remote_id, file.remote_id
                ),
            ));
        }
    }
    Ok(index)
}

/// 动作统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSummary {
    pub upload_count: usize,
    pub upload_bytes: u64,
    pub download_count: usize,
    pub download_bytes: u64,
    pub delete_local_count: usize,
    pub delete_remote_count: usize,
}

impl ActionSummary {
    pub fn total_files(&self) -> usize {
        self.upload_count + self.download_count + self.delete_local_count + self.delete_remote_count
    }

    pub fn total_transfer_bytes(&self) -> u64 {
        self.upload_bytes + self.download_bytes
    }
}
