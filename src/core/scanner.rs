use crate::core::comparator::FileRecord;
use crate::core::native;
use crate::core::path::RelPath;
use crate::core::retry::RetryPolicy;
use crate::core::tree::TreeSnapshot;
use crate::error::Result;
use crate::storage::{LocalStorage, RemoteStore};
use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{debug, info, warn};

/// 扫描配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 排除规则（支持 * 和 ? 通配符，按名称匹配，忽略大小写）
    pub exclude_patterns: Vec<String>,
    /// 同时列出的远程文件夹数
    pub max_concurrent: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: default_exclude_patterns(),
            max_concurrent: 4,
        }
    }
}

/// 默认排除规则
pub fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".DS_Store".to_string(),
        "Thumbs.db".to_string(),
        "desktop.ini".to_string(),
        "*.tmp".to_string(),
        "*.temp".to_string(),
        "~*".to_string(),
    ]
}

/// 编译后的排除规则
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    patterns: Vec<Regex>,
}

impl ExcludeMatcher {
    pub fn new(config: &ScanConfig) -> Self {
        let patterns = config
            .exclude_patterns
            .iter()
            .filter_map(|pattern| {
                let escaped = regex::escape(pattern)
                    .replace("\\*", ".*")
                    .replace("\\?", ".");
                match Regex::new(&format!("(?i)^{}$", escaped)) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("忽略无效的排除规则 {:?}: {}", pattern, e);
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    /// 名称是否应该被排除
    pub fn is_excluded(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }
}

/// 远程文件夹树扫描器
pub struct RemoteTreeScanner {
    matcher: ExcludeMatcher,
    max_concurrent: usize,
    retry: RetryPolicy,
}

impl RemoteTreeScanner {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            matcher: ExcludeMatcher::new(config),
            max_concurrent: config.max_concurrent.max(1),
            retry: RetryPolicy::none(),
        }
    }

    /// 列出操作遇到基础设施错误时按策略重试
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 逐层遍历远程文件夹，返回完整的树快照
    pub async fn scan(
        &self,
        store: &dyn RemoteStore,
        root_id: &str,
        root: &RelPath,
    ) -> Result<TreeSnapshot> {
        info!("开始扫描远程文件夹树: {} ({})", root, store.name());

        let mut snapshot = TreeSnapshot::new(root.clone(), Some(root_id.to_string()));
        let mut level = vec![(root.clone(), root_id.to_string())];

        while !level.is_empty() {
            // 同一层的文件夹互不依赖，可以并发列出
            let listings: Vec<_> = stream::iter(level.iter())
                .map(|(path, id)| async move {
                    self.retry
                        .run(&format!("列出远程文件夹 {}", path), || store.list_child_folders(id))
                        .await
                        .map(|children| (path, children))
                })
                .buffered(self.max_concurrent)
                .collect()
                .await;

            let mut next_level = Vec::new();
            for listing in listings {
                let (parent, children) = listing?;
                for child in children {
                    if self.matcher.is_excluded(&child.name) {
                        debug!("排除远程文件夹: {}/{}", parent, child.name);
                        continue;
                    }
                    let Ok(path) = parent.join(&child.name) else {
                        warn!("跳过无法表示为路径的远程文件夹: {:?} ({})", child.name, child.id);
                        continue;
                    };
                    snapshot.insert(path.clone(), Some(child.id.clone()))?;
                    next_level.push((path, child.id));
                }
            }
            level = next_level;
        }

        info!("远程扫描完成: {} 个文件夹", snapshot.len());
        Ok(snapshot)
    }

    /// 列出远程文件夹中的文件
    ///
    /// 没有导出格式的原生类型无法传输，不参与比较。本地名称不是合法路径段的
    /// 文件（空名、`.`、`..`、含 `/`）同样跳过。
    pub async fn list_files(
        &self,
        store: &dyn RemoteStore,
        folder_id: &str,
        folder: &RelPath,
    ) -> Result<Vec<FileRecord>> {
        let files = self
            .retry
            .run(&format!("列出远程文件 {}", folder), || store.list_files(folder_id))
            .await?;
        let mut records = Vec::with_capacity(files.len());

        for file in files {
            if native::is_native(&file.mime_type) && native::export_format(&file.mime_type).is_none() {
                debug!("跳过无法导出的远程文件: {}/{} ({})", folder, file.name, file.mime_type);
                continue;
            }
            let local_name = native::local_name(&file.name, &file.mime_type);
            // 本地名称会直接拼进本地路径
            if folder.join(&local_name).is_err() {
                warn!("跳过无法表示为路径的远程文件: {:?} ({})", file.name, file.id);
                continue;
            }
            if self.matcher.is_excluded(&file.name) || self.matcher.is_excluded(&local_name) {
                debug!("排除远程文件: {}/{}", folder, file.name);
                continue;
            }
            records.push(FileRecord::from_remote(folder, file));
        }

        Ok(records)
    }
}

/// 本地文件夹树扫描器
pub struct LocalTreeScanner {
    matcher: ExcludeMatcher,
}

impl LocalTreeScanner {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            matcher: ExcludeMatcher::new(config),
        }
    }

    /// 扫描本地目录树
    pub async fn scan(&self, local: &LocalStorage) -> Result<TreeSnapshot> {
        info!("开始扫描本地目录树: {}", local.name());

        let mut snapshot = TreeSnapshot::new(local.root().clone(), None);
        for dir in local.list_directories(&self.matcher).await? {
            snapshot.insert(dir, None)?;
        }

        info!("本地扫描完成: {} 个文件夹", snapshot.len());
        Ok(snapshot)
    }

    /// 列出本地目录中的文件（未计算 checksum）
    pub async fn list_files(&self, local: &LocalStorage, folder: &RelPath) -> Result<Vec<FileRecord>> {
        let files = local.list_files(folder).await?;
        Ok(files
            .into_iter()
            .filter(|f| {
                let excluded = self.matcher.is_excluded(&f.name);
                if excluded {
                    debug!("排除本地文件: {}/{}", folder, f.name);
                }
                !excluded
            })
            .map(|f| FileRecord::from_local(folder, f))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::storage::memory::MemoryStore;

    #[test]
    fn test_exclude_patterns() {
        let matcher = ExcludeMatcher::new(&ScanConfig::default());
        assert!(matcher.is_excluded(".DS_Store"));
        assert!(matcher.is_excluded("thumbs.db"));
        assert!(matcher.is_excluded("draft.TMP"));
        assert!(matcher.is_excluded("~$notes.docx"));
        assert!(!matcher.is_excluded("map1.png"));
        assert!(!matcher.is_excluded("tmp"));
    }

    #[tokio::test]
    async fn test_remote_scan_builds_full_paths() {
        let store = MemoryStore::new();
        let root_id = store.add_folder("DnD", store.root_id());
        let maps = store.add_folder("Maps", &root_id);
        let notes = store.add_folder("Notes", &root_id);
        let nested = store.add_folder("Notes", &maps);
        store.add_folder(".DS_Store", &root_id);

        let scanner = RemoteTreeScanner::new(&ScanConfig::default());
        let root = RelPath::root("DnD").unwrap();
        let snapshot = scanner.scan(&store, &root_id, &root).await.unwrap();

        let ids = snapshot.remote_ids();
        assert_eq!(snapshot.len(), 4);
        assert_eq!(ids[&RelPath::parse("DnD/Maps").unwrap()], maps);
        assert_eq!(ids[&RelPath::parse("DnD/Notes").unwrap()], notes);
        assert_eq!(ids[&RelPath::parse("DnD/Maps/Notes").unwrap()], nested);
    }

    #[tokio::test]
    async fn test_remote_duplicate_siblings_are_ambiguous() {
        let store = MemoryStore::new();
        let root_id = store.add_folder("DnD", store.root_id());
        store.add_folder("Maps", &root_id);
        store.add_folder("Maps", &root_id);

        let scanner = RemoteTreeScanner::new(&ScanConfig::default());
        let root = RelPath::root("DnD").unwrap();
        let err = scanner.scan(&store, &root_id, &root).await.unwrap_err();
        assert!(matches!(err, SyncError::Ambiguity { .. }));
    }

    #[tokio::test]
    async fn test_remote_list_files_skips_unexportable_native() {
        let store = MemoryStore::new();
        let root_id = store.add_folder("DnD", store.root_id());
        store.add_file("map1.png", &root_id, "image/png", b"png");
        store.add_native("Survey", &root_id, "application/vnd.google-apps.form", b"");
        store.add_native("Budget", &root_id, "application/vnd.google-apps.spreadsheet", b"xlsx");

        let scanner = RemoteTreeScanner::new(&ScanConfig::default());
        let root = RelPath::root("DnD").unwrap();
        let mut names: Vec<String> = scanner
            .list_files(&store, &root_id, &root)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();

        assert_eq!(names, vec!["Budget", "map1.png"]);
    }

    #[tokio::test]
    async fn test_remote_list_files_skips_names_that_are_not_segments() {
        let store = MemoryStore::new();
        let root_id = store.add_folder("DnD", store.root_id());
        store.add_file("../escape.txt", &root_id, "text/plain", b"x");
        store.add_file("Maps/map1.png", &root_id, "image/png", b"png");
        store.add_file("..", &root_id, "text/plain", b"x");
        store.add_file("notes.txt", &root_id, "text/plain", b"notes");

        let scanner = RemoteTreeScanner::new(&ScanConfig::default());
        let root = RelPath::root("DnD").unwrap();
        let files = scanner.list_files(&store, &root_id, &root).await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "notes.txt");
    }

    #[tokio::test]
    async fn test_remote_listing_retries_unavailable_store() {
        let store = MemoryStore::new();
        let root_id = store.add_folder("DnD", store.root_id());
        let maps = store.add_folder("Maps", &root_id);
        store.add_file("map1.png", &maps, "image/png", b"png");
        store.fail_listings("DnD", 503, 1);
        store.fail_listings("Maps", 429, 2);

        let root = RelPath::root("DnD").unwrap();
        let maps_path = RelPath::parse("DnD/Maps").unwrap();

        let plain = RemoteTreeScanner::new(&ScanConfig::default());
        assert!(plain.scan(&store, &root_id, &root).await.unwrap_err().is_retryable());

        let scanner = plain.with_retry(RetryPolicy::new(3, 1));
        let snapshot = scanner.scan(&store, &root_id, &root).await.unwrap();
        assert!(snapshot.contains(&maps_path));
        let files = scanner.list_files(&store, &maps, &maps_path).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_local_scan_matches_directory_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("DnD");
        std::fs::create_dir_all(root.join("Maps/City")).unwrap();
        std::fs::write(root.join("Maps/map1.png"), b"png").unwrap();
        std::fs::write(root.join("Maps/.DS_Store"), b"x").unwrap();

        let local = LocalStorage::new(&root).unwrap();
        let scanner = LocalTreeScanner::new(&ScanConfig::default());
        let snapshot = scanner.scan(&local).await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.contains(&RelPath::parse("DnD/Maps/City").unwrap()));

        let maps = RelPath::parse("DnD/Maps").unwrap();
        let files = scanner.list_files(&local, &maps).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "map1.png");
        assert!(files[0].checksum.is_none());
    }
}
