//! 内存中的远程存储，用于测试
//!
//! 记录每一次写操作，测试可以据此检查操作顺序。

use super::{RemoteFile, RemoteFolder, RemoteStore};
use crate::core::native::{self, FOLDER_MIME};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

const ROOT_ID: &str = "root";

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    parent: String,
    mime_type: String,
    content: Vec<u8>,
    modified_time: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    entries: BTreeMap<String, Entry>,
    ops: Vec<String>,
    /// 文件名 -> (HTTP 状态码, 剩余失败次数)
    failures: HashMap<String, (u16, usize)>,
}

pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn insert(&self, name: &str, parent: &str, mime_type: &str, content: &[u8]) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("m{:05}", state.next_id);
        state.entries.insert(
            id.clone(),
            Entry {
                name: name.to_string(),
                parent: parent.to_string(),
                mime_type: mime_type.to_string(),
                content: content.to_vec(),
                modified_time: Utc::now(),
            },
        );
        id
    }

    pub fn add_folder(&self, name: &str, parent: &str) -> String {
        self.insert(name, parent, FOLDER_MIME, b"")
    }

    pub fn add_file(&self, name: &str, parent: &str, mime_type: &str, content: &[u8]) -> String {
        self.insert(name, parent, mime_type, content)
    }

    /// 原生文档：content 是导出后的内容
    pub fn add_native(&self, name: &str, parent: &str, mime_type: &str, content: &[u8]) -> String {
        self.insert(name, parent, mime_type, content)
    }

    /// 把条目的修改时间往回拨
    pub fn age(&self, id: &str, seconds: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(id) {
            entry.modified_time -= Duration::seconds(seconds);
        }
    }

    /// 对名为 name 的文件的传输失败 times 次
    pub fn fail_transfers(&self, name: &str, status: u16, times: usize) {
        let mut state = self.state.lock().unwrap();
        state.failures.insert(name.to_string(), (status, times));
    }

    /// 列出名为 folder 的文件夹时失败 times 次（顶层用 "root"）
    pub fn fail_listings(&self, folder: &str, status: u16, times: usize) {
        let mut state = self.state.lock().unwrap();
        state
            .failures
            .insert(format!("list:{}", folder), (status, times));
    }

    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    /// 在 parent 下按名称查找
    pub fn find(&self, parent: &str, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .iter()
            .find(|(_, e)| e.parent == parent && e.name == name)
            .map(|(id, _)| id.clone())
    }

    /// 按路径查找，例如 `DnD/Maps/map1.png`
    pub fn find_path(&self, path: &str) -> Option<String> {
        let mut current = ROOT_ID.to_string();
        for segment in path.split('/') {
            current = self.find(&current, segment)?;
        }
        Some(current)
    }

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.entries.get(id).map(|e| e.content.clone())
    }

    pub fn name_of(&self, id: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.entries.get(id).map(|e| e.name.clone())
    }

    fn record(&self, op: String) {
        self.state.lock().unwrap().ops.push(op);
    }

    fn check_failure(&self, operation: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some((status, remaining)) = state.failures.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                let status = *status;
                state.ops.push(format!("fail:{}", name));
                return Err(SyncError::remote(operation, Some(status), "injected failure"));
            }
        }
        Ok(())
    }

    fn entry(&self, id: &str, operation: &str) -> Result<Entry> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::remote(operation, Some(404), format!("File not found: {}", id)))
    }

    fn require_folder(&self, id: &str, operation: &str) -> Result<()> {
        if id == ROOT_ID {
            return Ok(());
        }
        let entry = self.entry(id, operation)?;
        if entry.mime_type != FOLDER_MIME {
            return Err(SyncError::remote(operation, Some(400), "parent is not a folder"));
        }
        Ok(())
    }

    fn check_listing(&self, folder_id: &str, operation: &str) -> Result<()> {
        self.require_folder(folder_id, operation)?;
        let name = match folder_id {
            ROOT_ID => ROOT_ID.to_string(),
            id => self.entry(id, operation)?.name,
        };
        self.check_failure(operation, &format!("list:{}", name))
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn root_id(&self) -> &str {
        ROOT_ID
    }

    async fn list_child_folders(&self, folder_id: &str) -> Result<Vec<RemoteFolder>> {
        self.check_listing(folder_id, "list_child_folders")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|(_, e)| e.parent == folder_id && e.mime_type == FOLDER_MIME)
            .map(|(id, e)| RemoteFolder {
                id: id.clone(),
                name: e.name.clone(),
            })
            .collect())
    }

    async fn list_files(&self, folder_id: &str) -> Result<Vec<RemoteFile>> {
        self.check_listing(folder_id, "list_files")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|(_, e)| e.parent == folder_id && e.mime_type != FOLDER_MIME)
            .map(|(id, e)| RemoteFile {
                id: id.clone(),
                name: e.name.clone(),
                mime_type: e.mime_type.clone(),
                modified_time: e.modified_time,
                checksum: if native::is_native(&e.mime_type) {
                    None
                } else {
                    Some(format!("{:x}", md5::compute(&e.content)))
                },
                size: e.content.len() as u64,
            })
            .collect())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        self.require_folder(parent_id, "create_folder")?;
        let id = self.add_folder(name, parent_id);
        self.record(format!("create_folder:{}", name));
        Ok(id)
    }

    async fn delete_entry(&self, id: &str) -> Result<()> {
        let entry = self.entry(id, "delete")?;
        let mut state = self.state.lock().unwrap();

        // 删除文件夹时连同所有后代一起删除
        let mut doomed = vec![id.to_string()];
        let mut i = 0;
        while i < doomed.len() {
            let parent = doomed[i].clone();
            doomed.extend(
                state
                    .entries
                    .iter()
                    .filter(|(_, e)| e.parent == parent)
                    .map(|(child, _)| child.clone()),
            );
            i += 1;
        }
        for doomed_id in &doomed {
            state.entries.remove(doomed_id);
        }
        state.ops.push(format!("delete:{}", entry.name));
        Ok(())
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        name: &str,
        parent_id: &str,
        mime_type: &str,
    ) -> Result<String> {
        self.require_folder(parent_id, "upload")?;
        self.check_failure("upload", name)?;
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| SyncError::io(local_path, e))?;
        let id = self.insert(name, parent_id, mime_type, &content);
        self.record(format!("upload:{}", name));
        Ok(id)
    }

    async fn update_file_content(&self, id: &str, local_path: &Path, _mime_type: &str) -> Result<()> {
        let entry = self.entry(id, "update")?;
        self.check_failure("update", &entry.name)?;
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| SyncError::io(local_path, e))?;
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.entries.get_mut(id) {
            e.content = content;
            e.modified_time = Utc::now();
        }
        state.ops.push(format!("update:{}", entry.name));
        Ok(())
    }

    async fn rename_file(&self, id: &str, new_name: &str) -> Result<()> {
        let entry = self.entry(id, "rename")?;
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.entries.get_mut(id) {
            e.name = new_name.to_string();
        }
        state.ops.push(format!("rename:{}->{}", entry.name, new_name));
        Ok(())
    }

    async fn export_and_download(&self, id: &str, export_mime: &str, dest: &Path) -> Result<()> {
        let entry = self.entry(id, "export")?;
        if native::export_format(&entry.mime_type).map(|f| f.export_mime) != Some(export_mime) {
            return Err(SyncError::remote("export", Some(400), "unsupported export"));
        }
        self.check_failure("export", &entry.name)?;
        tokio::fs::write(dest, &entry.content)
            .await
            .map_err(|e| SyncError::io(dest, e))?;
        self.record(format!("export:{}", entry.name));
        Ok(())
    }

    async fn download_file(&self, id: &str, dest: &Path) -> Result<()> {
        let entry = self.entry(id, "download")?;
        if native::is_native(&entry.mime_type) {
            return Err(SyncError::remote("download", Some(403), "native documents must be exported"));
        }
        self.check_failure("download", &entry.name)?;
        tokio::fs::write(dest, &entry.content)
            .await
            .map_err(|e| SyncError::io(dest, e))?;
        self.record(format!("download:{}", entry.name));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
