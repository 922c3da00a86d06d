pub mod comparator;
pub mod engine;
pub mod native;
pub mod path;
pub mod retry;
pub mod scanner;
pub mod tree;

pub use comparator::{
    ActionSummary, CompareConfig, Download, FileComparator, FileRecord, FileRelation, FileSyncPlan,
    SyncDirection, Upload,
};
pub use engine::{SyncConfig, SyncEngine, SyncPhase, SyncPlan, SyncProgress, SyncReport, SyncStatus};
pub use path::RelPath;
pub use retry::RetryPolicy;
pub use scanner::{ExcludeMatcher, LocalTreeScanner, RemoteTreeScanner, ScanConfig};
pub use tree::{diff_trees, order_for_creation, order_for_removal, FolderNode, TreeDiff, TreeSnapshot};
