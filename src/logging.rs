//! 日志模块 - 提供文件日志和大小管理功能

use crate::config::{load_section, save_section};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

/// 日志文件名
pub const LOG_FILE: &str = "drivesync.log";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 保留的历史日志个数
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_max_backups() -> u32 {
    3
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            max_backups: default_max_backups(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 从配置文件加载日志配置
    pub fn load(config_file: &Path) -> Self {
        load_section(config_file, "log")
    }

    /// 保存日志配置
    pub fn save(&self, config_file: &Path) -> io::Result<()> {
        save_section(config_file, "log", self)
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        parse_level(&self.level).unwrap_or(tracing::Level::INFO)
    }
}

/// 解析日志级别名称
pub fn parse_level(level: &str) -> Option<tracing::Level> {
    match level.to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

type SharedWriter = Arc<Mutex<Option<BufWriter<File>>>>;

/// 带大小限制的日志写入器，超过大小后轮转为 drivesync.log.1 ... .N
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    max_backups: u32,
    writer: SharedWriter,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32, max_backups: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE);
        let max_size = (max_size_mb as u64) * 1024 * 1024;
        let writer = Self::open_file(&file_path, max_size, max_backups)?;

        Ok(Self {
            file_path,
            max_size,
            max_backups,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    fn open_file(file_path: &Path, max_size: u64, max_backups: u32) -> io::Result<BufWriter<File>> {
        // 检查现有文件大小，如果超过限制则轮转
        if fs::metadata(file_path).is_ok_and(|m| m.len() > max_size) {
            rotate_log(file_path, max_backups)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(BufWriter::new(file))
    }
}

/// 历史日志路径：drivesync.log.N
fn backup_path(file_path: &Path, index: u32) -> PathBuf {
    let mut name = file_path.as_os_str().to_owned();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// 轮转日志文件，最旧的历史日志被删除
fn rotate_log(file_path: &Path, max_backups: u32) -> io::Result<()> {
    if max_backups == 0 {
        return fs::remove_file(file_path);
    }

    let oldest = backup_path(file_path, max_backups);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for index in (1..max_backups).rev() {
        let from = backup_path(file_path, index);
        if from.exists() {
            fs::rename(&from, backup_path(file_path, index + 1))?;
        }
    }
    fs::rename(file_path, backup_path(file_path, 1))
}

fn lock(writer: &SharedWriter) -> MutexGuard<'_, Option<BufWriter<File>>> {
    // 写日志的线程 panic 后继续使用同一个文件
    writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 日志写入器包装
pub struct LogWriter {
    inner: SharedWriter,
    file_path: PathBuf,
    max_size: u64,
    max_backups: u32,
}

impl LogWriter {
    fn rotate_if_needed(&self, guard: &mut MutexGuard<'_, Option<BufWriter<File>>>) {
        if !fs::metadata(&self.file_path).is_ok_and(|m| m.len() > self.max_size) {
            return;
        }
        if let Some(mut w) = guard.take() {
            let _ = w.flush();
        }
        let _ = rotate_log(&self.file_path, self.max_backups);
        if let Ok(new_writer) =
            SizeRotatingWriter::open_file(&self.file_path, self.max_size, self.max_backups)
        {
            **guard = Some(new_writer);
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = lock(&self.inner);
        let written = match guard.as_mut() {
            Some(writer) => {
                let n = writer.write(buf)?;
                writer.flush()?;
                n
            }
            None => return Err(io::Error::other("Writer not available")),
        };

        self.rotate_if_needed(&mut guard);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match lock(&self.inner).as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.writer.clone(),
            file_path: self.file_path.clone(),
            max_size: self.max_size,
            max_backups: self.max_backups,
        }
    }
}

/// 日志目录（配置目录下的 logs）
pub fn get_log_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("logs")
}
