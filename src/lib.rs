//! The node page subsystem of an append-only, copy-on-write B-tree: the
//! in-memory/on-disk internal page (`btree::node_page::NodePage`), its
//! split/copy-on-write structural primitives, the serialization format,
//! and the storage/chunk collaborators it is built against.
//!
//! ```
//! use cowtree::btree::key_type::I64KeyType;
//! use cowtree::btree::node_page::NodePage;
//! use cowtree::btree::page_reference::{ChildKind, PageReference};
//! use cowtree::btree::page_pos::PagePos;
//! use cowtree::config::PageConfig;
//!
//! let children = (0..4)
//!     .map(|i| PageReference::evicted(PagePos(i + 1), ChildKind::Leaf))
//!     .collect();
//! let node = NodePage::with_computed_memory(vec![10i64, 20, 30], children, &I64KeyType, &PageConfig::default());
//! assert_eq!(node.key_count(), 3);
//! ```

pub mod btree;
pub mod config;
pub mod error;
pub mod log;
pub mod utils;

