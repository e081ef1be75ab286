//! A per-agent virtual filesystem: a POSIX-like inode filesystem backed by
//! an embedded SQL database, wrapped in an access-control layer, with a
//! git-working-tree-aware overlay importer and diff engine on top.
//!
//! See `SPEC_FULL.md` at the repository root for the full component
//! breakdown; the module layout here mirrors it 1:1.

pub mod error;
pub mod guards;
pub mod inode_fs;
pub mod kv;
pub mod logging;
pub mod overlay;
pub mod path;
pub mod policy;
pub mod protected_fs;
pub mod resolver;
pub mod store;
pub mod tools;

pub use error::{Error, FsError, PolicyError, Result};
pub use inode_fs::{InodeFs, Stat, StatFs};
pub use kv::KvStore;
pub use policy::{AccessPolicy, Operation, PolicyMetadata};
pub use protected_fs::ProtectedFs;
pub use store::Store;
pub use tools::{ToolCall, ToolCallLog, ToolCallStatus};
