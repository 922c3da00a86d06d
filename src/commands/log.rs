//! 日志配置命令

use super::LogConfigArgs;
use crate::logging::{parse_level, LogConfig};
use anyhow::{bail, Context, Result};
use std::path::Path;

/// 更新日志配置（没有参数时只读取）
pub fn run(args: &LogConfigArgs, config_file: &Path) -> Result<LogConfig> {
    let mut config = LogConfig::load(config_file);
    let mut changed = false;

    if let Some(e) = args.enabled {
        config.enabled = e;
        changed = true;
    }
    if let Some(size) = args.max_size_mb {
        // 限制范围 1-100 MB
        config.max_size_mb = size.clamp(1, 100);
        changed = true;
    }
    if let Some(backups) = args.max_backups {
        config.max_backups = backups.min(20);
        changed = true;
    }
    if let Some(l) = &args.level {
        if parse_level(l).is_none() {
            bail!("无效的日志级别: {}", l);
        }
        config.level = l.to_lowercase();
        changed = true;
    }

    if changed {
        config
            .save(config_file)
            .with_context(|| format!("保存日志配置失败: {:?}", config_file))?;
    }

    Ok(config)
}
