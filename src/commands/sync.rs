//! push / pull 命令

use super::{config_dir_of, SyncArgs};
use crate::config::SyncSettings;
use crate::core::{SyncDirection, SyncEngine, SyncPlan, SyncProgress, SyncReport};
use crate::storage::{create_storage, LocalStorage};
use anyhow::{Context, Result};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::info;

/// 命令行参数覆盖配置文件
fn apply_overrides(settings: &mut SyncSettings, args: &SyncArgs) {
    if let Some(local) = &args.local {
        settings.local_path = Some(local.clone());
    }
    if let Some(folder) = &args.remote_folder {
        settings.remote_folder = Some(folder.clone());
    }
    if let Some(n) = args.concurrency {
        settings.max_concurrent_transfers = n.max(1);
    }
}

/// 执行一次同步（或只生成计划），返回是否没有文件失败
pub async fn run(direction: SyncDirection, args: &SyncArgs, config_file: &Path) -> Result<bool> {
    let config_dir = config_dir_of(config_file);
    let mut settings = SyncSettings::load(config_file);
    apply_overrides(&mut settings, args);

    let local_path = settings
        .local_path
        .clone()
        .context("未配置本地目录，请使用 --local 或在配置文件中设置 sync.localPath")?;
    let remote_folder = settings
        .effective_remote_folder(&local_path)
        .context("无法确定云盘根文件夹名称，请使用 --remote-folder")?;

    let local = LocalStorage::new(&local_path)?;
    let remote = create_storage(&settings, &config_dir)
        .await
        .context("创建云盘连接失败")?;

    let (tx, rx) = mpsc::channel(256);
    let engine = SyncEngine::new(remote, local, remote_folder, settings.sync_config())
        .with_progress(tx);
    let printer = tokio::spawn(print_progress(rx, args.json));

    if args.dry_run {
        let plan = engine.plan(direction).await?;
        drop(engine);
        let _ = printer.await;
        print_plan(&plan, args.json)?;
        return Ok(true);
    }

    let report = engine.run_sync(direction).await?;
    drop(engine);
    let _ = printer.await;
    print_report(&report, args.json)?;

    if report.has_failures() {
        info!("{} 个文件同步失败", report.files_failed);
    }
    Ok(!report.has_failures())
}

/// 进度输出到 stderr，JSON 模式下不输出
async fn print_progress(mut rx: mpsc::Receiver<SyncProgress>, quiet: bool) {
    while let Some(progress) = rx.recv().await {
        if quiet {
            continue;
        }
        if progress.current_file.is_empty() {
            eprintln!("[{:?}] {}", progress.phase, progress.message);
        } else {
            eprintln!(
                "  {} ({}/{}, 失败 {})",
                progress.current_file,
                progress.files_completed + progress.files_failed,
                progress.files_total,
                progress.files_failed
            );
        }
    }
}

fn print_plan(plan: &SyncPlan, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }

    println!("同步计划 ({}): {}", plan.direction, plan.root);
    if plan.is_empty() {
        println!("两边已经一致，无需同步");
        return Ok(());
    }

    for folder in &plan.folders_to_create {
        println!("  + 文件夹 {}", folder);
    }
    for file_plan in plan.file_plans.values() {
        for upload in &file_plan.to_upload {
            let verb = if upload.existing_id.is_some() { "更新" } else { "上传" };
            println!("  {} {}/{}", verb, file_plan.folder, upload.local.name);
        }
        for download in &file_plan.to_download {
            let verb = if download.replace_existing { "替换" } else { "下载" };
            println!("  {} {}/{}", verb, file_plan.folder, download.local_name);
        }
        for file in &file_plan.to_delete_remote {
            println!("  - 远程 {}/{}", file_plan.folder, file.name);
        }
        for file in &file_plan.to_delete_local {
            println!("  - 本地 {}/{}", file_plan.folder, file.name);
        }
    }
    for folder in &plan.folders_to_remove {
        println!("  - 文件夹 {}", folder);
    }

    let summary = plan.summary();
    println!(
        "共 {} 个文件动作，传输 {} 字节",
        summary.total_files(),
        summary.total_transfer_bytes()
    );
    Ok(())
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "同步{} ({}): 新建文件夹 {}, 删除文件夹 {}, 上传 {}, 下载 {}, 删除文件 {}, 失败 {}, {} 字节, 用时 {}ms",
        if report.has_failures() { "部分失败" } else { "完成" },
        report.direction,
        report.folders_created,
        report.folders_removed,
        report.files_uploaded,
        report.files_downloaded,
        report.files_deleted,
        report.files_failed,
        report.bytes_transferred,
        report.duration_ms
    );
    for error in &report.errors {
        println!("  失败: {}", error);
    }
    Ok(())
}
