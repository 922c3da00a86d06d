use crate::core::path::RelPath;
use crate::core::scanner::ExcludeMatcher;
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::warn;
use walkdir::WalkDir;

/// checksum 读取缓冲区大小
const HASH_BUFFER_SIZE: usize = 64 * 1024;
/// 下载中的临时文件后缀（默认排除规则 `*.tmp` 会跳过它）
const PARTIAL_SUFFIX: &str = ".drivesync.tmp";

/// 本地文件
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

/// 本地同步根目录
pub struct LocalStorage {
    /// 同步根目录本身
    root_path: PathBuf,
    /// 根目录的父目录，相对路径从这里开始
    base_path: PathBuf,
    root: RelPath,
    name: String,
}

impl LocalStorage {
    pub fn new(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(SyncError::Configuration(format!(
                "本地目录不存在或不是文件夹: {:?}",
                path
            )));
        }

        let root_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SyncError::Configuration(format!("无法确定本地目录名称: {:?}", path)))?;
        let root = RelPath::root(root_name)?;

        let base_path = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Ok(Self {
            root_path: path.to_path_buf(),
            base_path,
            root,
            name: format!("local:{}", path.display()),
        })
    }

    pub fn root(&self) -> &RelPath {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 相对路径对应的本地路径
    pub fn resolve(&self, path: &RelPath) -> PathBuf {
        path.segments()
            .iter()
            .fold(self.base_path.clone(), |acc, segment| acc.join(segment))
    }

    /// 自上而下列出根目录下的所有子目录（不含根目录本身）
    pub async fn list_directories(&self, matcher: &ExcludeMatcher) -> Result<Vec<RelPath>> {
        let root_path = self.root_path.clone();
        let root = self.root.clone();
        let matcher = matcher.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || {
            let walker = WalkDir::new(&root_path)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    !(e.file_type().is_dir()
                        && e.file_name().to_str().is_some_and(|n| matcher.is_excluded(n)))
                });

            let mut dirs = Vec::new();
            for entry in walker {
                let entry = entry.map_err(|e| {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    SyncError::io(path, e.into())
                })?;

                if !entry.file_type().is_dir() {
                    continue;
                }

                let Ok(relative) = entry.path().strip_prefix(&root_path) else {
                    continue;
                };

                match to_rel_path(&root, relative) {
                    Some(path) => dirs.push(path),
                    None => warn!("跳过非 UTF-8 目录名: {:?}", entry.path()),
                }
            }

            Ok(dirs)
        })
        .await
        .map_err(|e| SyncError::io(&self.root_path, std::io::Error::other(e)))?
    }

    /// 列出目录中的文件（不含子目录）
    pub async fn list_files(&self, dir: &RelPath) -> Result<Vec<LocalFile>> {
        let dir_path = self.resolve(dir);
        let mut entries = fs::read_dir(&dir_path)
            .await
            .map_err(|e| SyncError::io(&dir_path, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SyncError::io(&dir_path, e))?
        {
            let path = entry.path();
            // 跟随符号链接；链接目标不存在时跳过
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("跳过无法访问的条目（悬空链接或已被删除）: {:?}", path);
                    continue;
                }
                Err(e) => return Err(SyncError::io(&path, e)),
            };
            if !metadata.is_file() {
                continue;
            }

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("跳过非 UTF-8 文件名: {:?}", path);
                continue;
            };

            let modified = metadata.modified().map_err(|e| SyncError::io(&path, e))?;
            files.push(LocalFile {
                name,
                modified: DateTime::<Utc>::from(modified),
                size: metadata.len(),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// 计算文件内容的 MD5（与远程 md5Checksum 一致，小写十六进制）
    pub async fn checksum(&self, path: &Path) -> Result<String> {
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| SyncError::io(path, e))?;

        let mut context = md5::Context::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let n = file
                .read(&mut buffer)
                .await
                .map_err(|e| SyncError::io(path, e))?;
            if n == 0 {
                break;
            }
            context.consume(&buffer[..n]);
        }

        Ok(format!("{:x}", context.compute()))
    }

    pub async fn create_dir(&self, path: &RelPath) -> Result<()> {
        let full_path = self.resolve(path);
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| SyncError::io(&full_path, e))
    }

    /// 递归删除目录，不存在时忽略
    pub async fn remove_tree(&self, path: &RelPath) -> Result<()> {
        let full_path = self.resolve(path);
        match fs::remove_dir_all(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(&full_path, e)),
        }
    }

    /// 下载时先写入的临时文件，与目标在同一目录
    pub fn partial_path(dest: &Path) -> PathBuf {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        dest.with_file_name(format!(".{}{}", name, PARTIAL_SUFFIX))
    }

    /// 用下载完成的临时文件替换目标文件
    pub async fn commit_partial(&self, partial: &Path, dest: &Path) -> Result<()> {
        fs::rename(partial, dest)
            .await
            .map_err(|e| SyncError::io(dest, e))
    }

    /// 删除文件，不存在时忽略
    pub async fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(path, e)),
        }
    }
}

fn to_rel_path(root: &RelPath, relative: &Path) -> Option<RelPath> {
    let mut path = root.clone();
    for component in relative.components() {
        let segment = component.as_os_str().to_str()?;
        path = path.join(segment).ok()?;
    }
    Some(path)
}
