use crate::core::comparator::{
    ActionSummary, CompareConfig, Download, FileComparator, FileRecord, FileSyncPlan, SyncDirection,
    Upload,
};
use crate::core::native;
use crate::core::path::RelPath;
use crate::core::retry::RetryPolicy;
use crate::core::scanner::{LocalTreeScanner, RemoteTreeScanner, ScanConfig};
use crate::core::tree::{diff_trees, order_for_creation, order_for_removal, TreeSnapshot};
use crate::error::{Result, SyncError};
use crate::storage::{LocalStorage, RemoteStore};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, info, warn};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 最大并发传输数
    pub max_concurrent_transfers: usize,
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    pub retry_base_delay_ms: u64,
    /// 扫描配置
    pub scan_config: ScanConfig,
    /// 比较配置
    pub compare_config: CompareConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 4,
            max_retries: 3,
            retry_base_delay_ms: 500,
            scan_config: ScanConfig::default(),
            compare_config: CompareConfig::default(),
        }
    }
}

/// 同步阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    ResolveRoot,
    BuildRemoteTree,
    BuildLocalTree,
    DiffTrees,
    CreateFolders,
    ReconcileFiles,
    RemoveFolders,
    Done,
}

/// 同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Completed,
    Failed,
}

/// 同步进度
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub direction: SyncDirection,
    pub phase: SyncPhase,
    pub message: String,
    pub current_file: String,
    pub files_total: u32,
    pub files_completed: u32,
    pub files_failed: u32,
    pub bytes_transferred: u64,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub direction: SyncDirection,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SyncStatus,
    pub folders_created: u32,
    pub folders_removed: u32,
    pub files_uploaded: u32,
    pub files_downloaded: u32,
    pub files_deleted: u32,
    pub files_failed: u32,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn new(direction: SyncDirection, start_time: DateTime<Utc>) -> Self {
        Self {
            direction,
            start_time,
            end_time: start_time,
            status: SyncStatus::Completed,
            folders_created: 0,
            folders_removed: 0,
            files_uploaded: 0,
            files_downloaded: 0,
            files_deleted: 0,
            files_failed: 0,
            bytes_transferred: 0,
            duration_ms: 0,
            errors: Vec::new(),
        }
    }

    pub fn has_failures(&self) -> bool {
        self.files_failed > 0
    }

    /// 合并引导上传之后的第二轮报告
    fn merge(&mut self, other: SyncReport) {
        self.direction = other.direction;
        self.end_time = other.end_time;
        self.folders_created += other.folders_created;
        self.folders_removed += other.folders_removed;
        self.files_uploaded += other.files_uploaded;
        self.files_downloaded += other.files_downloaded;
        self.files_deleted += other.files_deleted;
        self.files_failed += other.files_failed;
        self.bytes_transferred += other.bytes_transferred;
        self.errors.extend(other.errors);
        self.finish();
    }

    fn finish(&mut self) {
        self.status = if self.files_failed > 0 {
            SyncStatus::Failed
        } else {
            SyncStatus::Completed
        };
        self.duration_ms = (self.end_time - self.start_time).num_milliseconds().max(0) as u64;
    }
}

/// 同步计划（只读阶段的结果，执行前不会改变）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPlan {
    pub direction: SyncDirection,
    pub root: RelPath,
    /// 父文件夹在前
    pub folders_to_create: Vec<RelPath>,
    /// 子文件夹在前
    pub folders_to_remove: Vec<RelPath>,
    pub folders_in_common: BTreeSet<RelPath>,
    pub file_plans: BTreeMap<RelPath, FileSyncPlan>,
    /// 计划时已知的远程文件夹 id
    pub folder_ids: HashMap<RelPath, String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.folders_to_create.is_empty()
            && self.folders_to_remove.is_empty()
            && self.file_plans.values().all(FileSyncPlan::is_empty)
    }

    pub fn summary(&self) -> ActionSummary {
        FileComparator::summarize(self.file_plans.values())
    }
}

/// 单个文件动作
enum FileAction {
    Upload {
        upload: Upload,
        parent_id: String,
        source: PathBuf,
    },
    Download {
        download: Download,
        dest: PathBuf,
    },
    DeleteRemote {
        file: FileRecord,
    },
    DeleteLocal {
        file: FileRecord,
        path: PathBuf,
    },
}

impl FileAction {
    fn label(&self) -> String {
        match self {
            FileAction::Upload { upload, .. } => {
                format!("上传 {}/{}", upload.local.folder, upload.local.name)
            }
            FileAction::Download { download, .. } => {
                format!("下载 {}/{}", download.remote.folder, download.local_name)
            }
            FileAction::DeleteRemote { file } => format!("删除远程 {}/{}", file.folder, file.name),
            FileAction::DeleteLocal { file, .. } => format!("删除本地 {}/{}", file.folder, file.name),
        }
    }
}

/// 传输统计
#[derive(Debug, Default)]
struct TransferStats {
    uploaded: AtomicU64,
    downloaded: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
    bytes_transferred: AtomicU64,
}

impl TransferStats {
    fn finished(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
            + self.downloaded.load(Ordering::Relaxed)
            + self.deleted.load(Ordering::Relaxed)
    }
}

/// 同步引擎
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    local: Arc<LocalStorage>,
    /// 远程根文件夹名称
    remote_folder: String,
    config: SyncConfig,
    comparator: FileComparator,
    progress_tx: Option<mpsc::Sender<SyncProgress>>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: LocalStorage,
        remote_folder: impl Into<String>,
        config: SyncConfig,
    ) -> Self {
        Self {
            remote,
            local: Arc::new(local),
            remote_folder: remote_folder.into(),
            comparator: FileComparator::new(config.compare_config.clone()),
            config,
            progress_tx: None,
        }
    }

    /// 设置进度通道
    pub fn with_progress(mut self, tx: mpsc::Sender<SyncProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.max_retries, self.config.retry_base_delay_ms)
    }

    /// 完整同步：计划并执行
    ///
    /// 远程根文件夹不存在时先做一次完整上传，拉取方向随后再重新计划。
    pub async fn run_sync(&self, direction: SyncDirection) -> Result<SyncReport> {
        info!(
            "开始同步: {} <-> {} ({})",
            self.local.name(),
            self.remote_folder,
            direction
        );

        let plan = self.plan(direction).await?;
        let mut report = self.execute(&plan).await?;

        if plan.direction != direction {
            info!("远程根文件夹已创建，继续 {} 同步", direction);
            let follow_up = self.plan(direction).await?;
            let second = self.execute(&follow_up).await?;
            report.merge(second);
        }

        info!(
            "同步完成: 上传 {}, 下载 {}, 删除 {}, 失败 {}",
            report.files_uploaded, report.files_downloaded, report.files_deleted, report.files_failed
        );
        Ok(report)
    }

    /// 计算同步计划，不修改任何一侧
    pub async fn plan(&self, direction: SyncDirection) -> Result<SyncPlan> {
        self.send_phase(direction, SyncPhase::ResolveRoot, "正在查找远程根文件夹")
            .await;
        let root_id = self.resolve_root().await?;

        let direction = match (&root_id, direction) {
            (None, SyncDirection::Pull) => {
                warn!(
                    "远程根文件夹 {} 不存在，先从本地完整上传",
                    self.remote_folder
                );
                SyncDirection::Push
            }
            _ => direction,
        };

        let root = self.local.root().clone();

        self.send_phase(direction, SyncPhase::BuildRemoteTree, "正在扫描远程文件夹")
            .await;
        let remote_tree = match &root_id {
            Some(id) => {
                Some(self.remote_scanner().scan(self.remote.as_ref(), id, &root).await?)
            }
            None => None,
        };

        self.send_phase(direction, SyncPhase::BuildLocalTree, "正在扫描本地文件夹")
            .await;
        let local_tree = LocalTreeScanner::new(&self.config.scan_config)
            .scan(&self.local)
            .await?;

        self.send_phase(direction, SyncPhase::DiffTrees, "正在比较文件夹").await;
        let remote_paths = remote_tree
            .as_ref()
            .map(TreeSnapshot::paths)
            .unwrap_or_default();
        let diff = diff_trees(&remote_paths, &local_tree.paths());
        let (to_create, to_remove) = match direction {
            SyncDirection::Push => (&diff.only_local, &diff.only_remote),
            SyncDirection::Pull => (&diff.only_remote, &diff.only_local),
        };
        let folders_to_create = order_for_creation(to_create);
        let folders_to_remove = order_for_removal(to_remove);
        let folder_ids = remote_tree
            .as_ref()
            .map(TreeSnapshot::remote_ids)
            .unwrap_or_default();

        info!(
            "文件夹差异: 新建 {}, 删除 {}, 共同 {}",
            folders_to_create.len(),
            folders_to_remove.len(),
            diff.common.len()
        );

        self.send_phase(direction, SyncPhase::ReconcileFiles, "正在比较文件")
            .await;
        let folders: Vec<&RelPath> = folders_to_create.iter().chain(diff.common.iter()).collect();
        let file_plans: Vec<FileSyncPlan> = stream::iter(folders)
            .map(|folder| {
                self.plan_folder(folder, direction, folder_ids.get(folder), &local_tree)
            })
            .buffered(self.config.max_concurrent_transfers.max(1))
            .try_collect()
            .await?;

        let plan = SyncPlan {
            direction,
            root,
            folders_to_create,
            folders_to_remove,
            folders_in_common: diff.common,
            file_plans: file_plans
                .into_iter()
                .map(|p| (p.folder.clone(), p))
                .collect(),
            folder_ids,
        };

        let summary = plan.summary();
        info!(
            "同步计划: 上传 {}, 下载 {}, 删除远程 {}, 删除本地 {}",
            summary.upload_count,
            summary.download_count,
            summary.delete_remote_count,
            summary.delete_local_count
        );
        Ok(plan)
    }

    /// 计算一个文件夹的文件动作，只对两边同名的本地文件计算 checksum
    async fn plan_folder(
        &self,
        folder: &RelPath,
        direction: SyncDirection,
        remote_id: Option<&String>,
        local_tree: &TreeSnapshot,
    ) -> Result<FileSyncPlan> {
        let remote_files = match remote_id {
            Some(id) => {
                self.remote_scanner()
                    .list_files(self.remote.as_ref(), id, folder)
                    .await?
            }
            None => Vec::new(),
        };

        let mut local_files = if local_tree.contains(folder) {
            LocalTreeScanner::new(&self.config.scan_config)
                .list_files(&self.local, folder)
                .await?
        } else {
            Vec::new()
        };

        let candidates = FileComparator::checksum_candidates(&local_files, &remote_files);
        let dir = self.local.resolve(folder);
        for file in local_files.iter_mut() {
            if candidates.contains(&file.name) {
                file.checksum = Some(self.local.checksum(&dir.join(&file.name)).await?);
            }
        }

        let plan = self
            .comparator
            .reconcile_folder(folder, &local_files, &remote_files, direction)?;
        if !plan.is_empty() {
            debug!("{}: {} 个文件动作", folder, plan.action_count());
        }
        Ok(plan)
    }

    /// 执行同步计划
    pub async fn execute(&self, plan: &SyncPlan) -> Result<SyncReport> {
        let direction = plan.direction;
        let mut report = SyncReport::new(direction, Utc::now());
        let retry = self.retry_policy();
        let mut folder_ids = plan.folder_ids.clone();

        // 文件夹先于其中的文件创建
        self.send_phase(direction, SyncPhase::CreateFolders, "正在创建文件夹")
            .await;
        for path in &plan.folders_to_create {
            match direction {
                SyncDirection::Push => {
                    let parent_id = match path.parent() {
                        None => self.remote.root_id().to_string(),
                        Some(parent) => folder_ids.get(&parent).cloned().ok_or_else(|| {
                            SyncError::Configuration(format!("父文件夹 {} 没有远程 id", parent))
                        })?,
                    };
                    let name = if path.is_root() {
                        self.remote_folder.as_str()
                    } else {
                        path.name()
                    };
                    let id = retry
                        .run(&format!("创建远程文件夹 {}", path), || {
                            self.remote.create_folder(name, &parent_id)
                        })
                        .await?;
                    debug!("创建远程文件夹: {} ({})", path, id);
                    folder_ids.insert(path.clone(), id);
                }
                SyncDirection::Pull => {
                    self.local.create_dir(path).await?;
                    debug!("创建本地文件夹: {}", path);
                }
            }
            report.folders_created += 1;
        }

        self.send_phase(direction, SyncPhase::ReconcileFiles, "正在同步文件")
            .await;
        let actions = self.collect_actions(plan, &folder_ids)?;
        let stats = self.execute_actions_parallel(direction, actions, &mut report).await;
        report.files_uploaded = stats.uploaded.load(Ordering::Relaxed) as u32;
        report.files_downloaded = stats.downloaded.load(Ordering::Relaxed) as u32;
        report.files_deleted = stats.deleted.load(Ordering::Relaxed) as u32;
        report.files_failed = stats.failed.load(Ordering::Relaxed) as u32;
        report.bytes_transferred = stats.bytes_transferred.load(Ordering::Relaxed);

        // 所有文件动作结束后再删除文件夹，子文件夹在前
        self.send_phase(direction, SyncPhase::RemoveFolders, "正在删除文件夹")
            .await;
        for path in &plan.folders_to_remove {
            match direction {
                SyncDirection::Push => {
                    let id = folder_ids.get(path).ok_or_else(|| {
                        SyncError::Configuration(format!("文件夹 {} 没有远程 id", path))
                    })?;
                    retry
                        .run(&format!("删除远程文件夹 {}", path), || {
                            self.remote.delete_entry(id)
                        })
                        .await?;
                    debug!("删除远程文件夹: {}", path);
                }
                SyncDirection::Pull => {
                    self.local.remove_tree(path).await?;
                    debug!("删除本地文件夹: {}", path);
                }
            }
            report.folders_removed += 1;
        }

        report.end_time = Utc::now();
        report.finish();
        self.send_phase(direction, SyncPhase::Done, "同步完成").await;
        Ok(report)
    }

    /// 把文件计划展开为可执行的动作
    fn collect_actions(
        &self,
        plan: &SyncPlan,
        folder_ids: &HashMap<RelPath, String>,
    ) -> Result<Vec<FileAction>> {
        let mut actions = Vec::new();

        for (folder, file_plan) in &plan.file_plans {
            let dir = self.local.resolve(folder);

            if !file_plan.to_upload.is_empty() {
                let parent_id = folder_ids.get(folder).ok_or_else(|| {
                    SyncError::Configuration(format!("文件夹 {} 没有远程 id", folder))
                })?;
                for upload in &file_plan.to_upload {
                    actions.push(FileAction::Upload {
                        source: dir.join(&upload.local.name),
                        upload: upload.clone(),
                        parent_id: parent_id.clone(),
                    });
                }
            }
            for download in &file_plan.to_download {
                actions.push(FileAction::Download {
                    dest: dir.join(&download.local_name),
                    download: download.clone(),
                });
            }
            for file in &file_plan.to_delete_remote {
                actions.push(FileAction::DeleteRemote { file: file.clone() });
            }
            for file in &file_plan.to_delete_local {
                actions.push(FileAction::DeleteLocal {
                    path: dir.join(&file.name),
                    file: file.clone(),
                });
            }
        }

        Ok(actions)
    }

    /// 并行执行文件动作，单个文件失败只记录不中断
    async fn execute_actions_parallel(
        &self,
        direction: SyncDirection,
        actions: Vec<FileAction>,
        report: &mut SyncReport,
    ) -> Arc<TransferStats> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let stats = Arc::new(TransferStats::default());
        let errors = Arc::new(RwLock::new(Vec::<String>::new()));
        let files_total = actions.len() as u32;

        let mut handles = Vec::new();
        for action in actions {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let remote = self.remote.clone();
            let local = self.local.clone();
            let stats = stats.clone();
            let errors = errors.clone();
            let progress_tx = self.progress_tx.clone();
            let retry = self.retry_policy();

            let handle = tokio::spawn(async move {
                let label = action.label();
                let result = retry
                    .run(&label, || Self::execute_action(&action, remote.as_ref(), &local))
                    .await;

                match result {
                    Ok(bytes) => {
                        let counter = match action {
                            FileAction::Upload { .. } => &stats.uploaded,
                            FileAction::Download { .. } => &stats.downloaded,
                            FileAction::DeleteRemote { .. } | FileAction::DeleteLocal { .. } => {
                                &stats.deleted
                            }
                        };
                        counter.fetch_add(1, Ordering::Relaxed);
                        stats.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
                        debug!("完成: {}", label);
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("文件动作失败: {}: {}", label, e);
                        errors.write().await.push(format!("{}: {}", label, e));
                    }
                }

                if let Some(tx) = progress_tx {
                    let _ = tx
                        .send(SyncProgress {
                            direction,
                            phase: SyncPhase::ReconcileFiles,
                            message: format!(
                                "同步中 {}/{}",
                                stats.finished() + stats.failed.load(Ordering::Relaxed),
                                files_total
                            ),
                            current_file: label,
                            files_total,
                            files_completed: stats.finished() as u32,
                            files_failed: stats.failed.load(Ordering::Relaxed) as u32,
                            bytes_transferred: stats.bytes_transferred.load(Ordering::Relaxed),
                        })
                        .await;
                }

                drop(permit);
            });

            handles.push(handle);
        }

        // 等待所有任务完成
        for handle in handles {
            if let Err(e) = handle.await {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                errors.write().await.push(format!("文件任务异常退出: {}", e));
            }
        }

        report.errors.extend(errors.read().await.iter().cloned());
        stats
    }

    /// 执行单个文件动作，返回传输字节数
    async fn execute_action(
        action: &FileAction,
        remote: &dyn RemoteStore,
        local: &LocalStorage,
    ) -> Result<u64> {
        match action {
            FileAction::Upload {
                upload,
                parent_id,
                source,
            } => {
                let file = &upload.local;
                match &upload.existing_id {
                    Some(id) => {
                        remote
                            .update_file_content(id, source, &file.mime_type)
                            .await?
                    }
                    None => {
                        remote
                            .upload_file(source, &file.name, parent_id, &file.mime_type)
                            .await?;
                    }
                }
                Ok(file.size)
            }
            FileAction::Download { download, dest } => {
                let file = &download.remote;
                let id = remote_id(file)?;
                // 旧文件在新内容完整落盘后才被替换
                let partial = LocalStorage::partial_path(dest);
                let fetched = match native::export_format(&file.mime_type) {
                    Some(format) => remote.export_and_download(id, format.export_mime, &partial).await,
                    None => remote.download_file(id, &partial).await,
                };
                if let Err(e) = fetched {
                    let _ = local.remove_file(&partial).await;
                    return Err(e);
                }
                local.commit_partial(&partial, dest).await?;
                if let Some(new_name) = &download.rename_remote_to {
                    remote.rename_file(id, new_name).await?;
                }
                Ok(file.size)
            }
            FileAction::DeleteRemote { file } => {
                remote.delete_entry(remote_id(file)?).await?;
                Ok(0)
            }
            FileAction::DeleteLocal { path, .. } => {
                local.remove_file(path).await?;
                Ok(0)
            }
        }
    }

    /// 在远程顶层查找根文件夹
    async fn resolve_root(&self) -> Result<Option<String>> {
        let root_id = self.remote.root_id();
        let mut matches: Vec<String> = self
            .retry_policy()
            .run("列出远程顶层文件夹", || self.remote.list_child_folders(root_id))
            .await?
            .into_iter()
            .filter(|f| f.name == self.remote_folder)
            .map(|f| f.id)
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            n => Err(SyncError::ambiguity(
                &self.remote_folder,
                format!("远程顶层有 {} 个同名文件夹", n),
            )),
        }
    }

    fn remote_scanner(&self) -> RemoteTreeScanner {
        let config = ScanConfig {
            max_concurrent: self.config.max_concurrent_transfers,
            ..self.config.scan_config.clone()
        };
        RemoteTreeScanner::new(&config).with_retry(self.retry_policy())
    }

    /// 发送阶段进度
    async fn send_phase(&self, direction: SyncDirection, phase: SyncPhase, message: &str) {
        info!("[{:?}] {}", phase, message);
        if let Some(tx) = &self.progress_tx {
            let _ = tx
                .send(SyncProgress {
                    direction,
                    phase,
                    message: message.to_string(),
                    current_file: String::new(),
                    files_total: 0,
                    files_completed: 0,
                    files_failed: 0,
                    bytes_transferred: 0,
                })
                .await;
        }
    }
}

fn remote_id(file: &FileRecord) -> Result<&str> {
    file.remote_id.as_deref().ok_or_else(|| {
        SyncError::Configuration(format!("远程文件 {}/{} 没有 id", file.folder, file.name))
    })
}
