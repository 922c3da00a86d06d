use clap::Parser;
use drivesync_lib::commands::{self, config_dir_of, Cli};
use drivesync_lib::logging::{get_log_dir, parse_level, LogConfig, SizeRotatingWriter};
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 初始化日志系统
fn init_logging(config_file: &Path, level_override: Option<&str>) {
    let config = LogConfig::load(config_file);

    // 命令行指定的级别优先
    let level = level_override
        .and_then(parse_level)
        .unwrap_or_else(|| config.tracing_level());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,reqwest=warn",
            level.as_str().to_lowercase()
        ))
    });

    // 控制台只输出到 stderr，stdout 留给计划和报告
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    // 文件日志层
    let file_layer = if config.enabled {
        let log_dir = get_log_dir(&config_dir_of(config_file));
        match SizeRotatingWriter::new(&log_dir, config.max_size_mb, config.max_backups) {
            Ok(file_writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            ),
            Err(e) => {
                eprintln!("无法创建日志文件 {:?}: {}", log_dir, e);
                None
            }
        }
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    if let Some(level) = level_override.filter(|l| parse_level(l).is_none()) {
        tracing::warn!("无效的日志级别: {}，使用配置中的级别", level);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.config_file(), cli.log_level.as_deref());

    match commands::execute(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
