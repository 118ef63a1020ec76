//! The Index: a per-user SQLite database co-located with the git worktree,
//! mirroring the Markdown files so reads never need to walk the tree or
//! parse a file. The worktree remains the source of truth; the
//! Index is a disposable, rebuildable cache over it.

pub mod queries;
pub mod schema;
pub mod system;

pub use queries::{Index, ListOptions, MemoryUpdate};
pub use system::SystemStore;
