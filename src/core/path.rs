//! 相对路径：从同步根目录的父目录开始的路径段序列

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 路径分隔符（本地与远程统一使用 /）
pub const SEPARATOR: char = '/';

/// 相对路径，第一段是同步根目录的名称
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath {
    segments: Vec<String>,
}

impl RelPath {
    /// 根路径（只有一段）
    pub fn root(name: &str) -> Result<Self> {
        validate_segment(name)?;
        Ok(Self {
            segments: vec![name.to_string()],
        })
    }

    /// 解析 `a/b/c` 形式的路径
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<String> = path.split(SEPARATOR).map(str::to_string).collect();
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self { segments })
    }

    /// 追加一段
    pub fn join(&self, segment: &str) -> Result<Self> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// 父路径，根路径没有父路径
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// 分隔符个数
    pub fn depth(&self) -> usize {
        self.segments.len() - 1
    }

    pub fn is_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// 最后一段
    pub fn name(&self) -> &str {
        // segments 至少有一段
        &self.segments[self.segments.len() - 1]
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// 是否是 other 的祖先（不含自身）
    pub fn is_ancestor_of(&self, other: &RelPath) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains(SEPARATOR) {
        return Err(SyncError::Configuration(format!(
            "无效的路径段: {:?}",
            segment
        )));
    }
    Ok(())
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl TryFrom<String> for RelPath {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        RelPath::parse(&value)
    }
}

impl From<RelPath> for String {
    fn from(value: RelPath) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_depth_join() {
        let root = RelPath::root("DnD").unwrap();
        assert_eq!(root.depth(), 0);
        assert!(root.parent().is_none());

        let maps = root.join("Maps").unwrap();
        let city = maps.join("City").unwrap();
        assert_eq!(city.to_string(), "DnD/Maps/City");
        assert_eq!(city.depth(), 2);
        assert_eq!(city.name(), "City");
        assert_eq!(city.parent().unwrap(), maps);
        assert_eq!(maps.parent().unwrap(), root);
    }

    #[test]
    fn test_parse_roundtrip_and_ancestry() {
        let p = RelPath::parse("DnD/Maps/City").unwrap();
        assert_eq!(p.segments().len(), 3);
        assert!(RelPath::parse("DnD").unwrap().is_ancestor_of(&p));
        assert!(!p.is_ancestor_of(&p));
        assert!(!RelPath::parse("DnD/Map").unwrap().is_ancestor_of(&p));
    }

    #[test]
    fn test_invalid_segments_rejected() {
        assert!(RelPath::parse("DnD//Maps").is_err());
        assert!(RelPath::parse("DnD/../etc").is_err());
        assert!(RelPath::root("").is_err());
        assert!(RelPath::root("DnD").unwrap().join("a/b").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let p = RelPath::parse("DnD/Maps").unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"DnD/Maps\"");
        let back: RelPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
