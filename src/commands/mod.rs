//! 命令行参数与命令分发

pub mod log;
pub mod sync;

use crate::config::CONFIG_FILE;
use crate::core::SyncDirection;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

/// 在本地目录与云盘文件夹之间做一次性同步
#[derive(Parser, Debug)]
#[command(name = "drivesync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// 配置文件路径（默认在用户配置目录下）
    #[arg(long, global = true, env = "DRIVESYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// 覆盖配置中的日志级别
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn config_file(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| crate::default_config_dir().join(CONFIG_FILE))
    }
}

/// 配置文件所在目录，令牌和日志默认放在这里
pub fn config_dir_of(config_file: &Path) -> PathBuf {
    match config_file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// 把本地目录同步到云盘（本地为准）
    Push(SyncArgs),

    /// 把云盘文件夹同步到本地（云盘为准）
    Pull(SyncArgs),

    /// 查看或修改日志配置
    LogConfig(LogConfigArgs),
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncArgs {
    /// 本地同步根目录
    #[arg(long)]
    pub local: Option<PathBuf>,

    /// 云盘上的根文件夹名称
    #[arg(long)]
    pub remote_folder: Option<String>,

    /// 最大并发传输数
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// 只显示同步计划，不做任何修改
    #[arg(long)]
    pub dry_run: bool,

    /// 以 JSON 输出计划或报告
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConfigArgs {
    /// 是否写日志文件
    #[arg(long)]
    pub enabled: Option<bool>,

    /// 日志级别: error, warn, info, debug, trace
    #[arg(long)]
    pub level: Option<String>,

    /// 单个日志文件的最大大小（MB）
    #[arg(long)]
    pub max_size_mb: Option<u32>,

    /// 保留的历史日志个数
    #[arg(long)]
    pub max_backups: Option<u32>,
}

/// 执行命令，返回是否全部成功
pub async fn execute(cli: &Cli) -> anyhow::Result<bool> {
    let config_file = cli.config_file();
    match &cli.command {
        Commands::Push(args) => sync::run(SyncDirection::Push, args, &config_file).await,
        Commands::Pull(args) => sync::run(SyncDirection::Pull, args, &config_file).await,
        Commands::LogConfig(args) => {
            let config = log::run(args, &config_file)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(true)
        }
    }
}
