//! 文件夹树快照、树差异与按深度排序

use crate::core::path::RelPath;
use crate::error::{Result, SyncError};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// 文件夹节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderNode {
    pub path: RelPath,
    /// 远程 id，本地节点和尚未创建的文件夹没有
    pub remote_id: Option<String>,
}

/// 一侧的文件夹树，按相对路径索引，总是包含根节点
#[derive(Debug, Clone, Serialize)]
pub struct TreeSnapshot {
    root: RelPath,
    nodes: BTreeMap<RelPath, FolderNode>,
}

impl TreeSnapshot {
    pub fn new(root: RelPath, root_id: Option<String>) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root.clone(),
            FolderNode {
                path: root.clone(),
                remote_id: root_id,
            },
        );
        Self { root, nodes }
    }

    /// 插入节点，父节点必须已存在，路径不能重复
    pub fn insert(&mut self, path: RelPath, remote_id: Option<String>) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| SyncError::ambiguity(&path, "根节点已存在"))?;
        if !self.nodes.contains_key(&parent) {
            return Err(SyncError::Configuration(format!(
                "文件夹 {} 的父文件夹 {} 不在快照中",
                path, parent
            )));
        }
        if let Some(existing) = self.nodes.get(&path) {
            return Err(SyncError::ambiguity(
                &path,
                format!(
                    "同一父文件夹下有重名文件夹 (id {:?} 与 {:?})",
                    existing.remote_id, remote_id
                ),
            ));
        }
        self.nodes.insert(path.clone(), FolderNode { path, remote_id });
        Ok(())
    }

    pub fn contains(&self, path: &RelPath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn paths(&self) -> BTreeSet<RelPath> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 完整相对路径 -> 远程 id
    pub fn remote_ids(&self) -> HashMap<RelPath, String> {
        self.nodes
            .values()
            .filter_map(|n| n.remote_id.clone().map(|id| (n.path.clone(), id)))
            .collect()
    }
}

/// 两棵树的差异，三个集合互不相交
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub only_remote: BTreeSet<RelPath>,
    pub only_local: BTreeSet<RelPath>,
    pub common: BTreeSet<RelPath>,
}

/// 计算远程与本地文件夹集合的差异
pub fn diff_trees(remote: &BTreeSet<RelPath>, local: &BTreeSet<RelPath>) -> TreeDiff {
    TreeDiff {
        only_remote: remote.difference(local).cloned().collect(),
        only_local: local.difference(remote).cloned().collect(),
        common: remote.intersection(local).cloned().collect(),
    }
}

/// 按分隔符个数排序，深度相同时按路径排序（仅为了结果稳定）
pub fn depth_order(a: &RelPath, b: &RelPath) -> Ordering {
    a.depth().cmp(&b.depth()).then_with(|| a.cmp(b))
}

/// 创建顺序：父文件夹在前
pub fn order_for_creation<'a, I>(paths: I) -> Vec<RelPath>
where
    I: IntoIterator<Item = &'a RelPath>,
{
    let mut ordered: Vec<RelPath> = paths.into_iter().cloned().collect();
    ordered.sort_by(depth_order);
    ordered
}

/// 删除顺序：子文件夹在前
pub fn order_for_removal<'a, I>(paths: I) -> Vec<RelPath>
where
    I: IntoIterator<Item = &'a RelPath>,
{
    let mut ordered: Vec<RelPath> = paths.into_iter().cloned().collect();
    ordered.sort_by(|a, b| depth_order(b, a));
    ordered
}
