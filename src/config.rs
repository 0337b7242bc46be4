/// Tunables for the node page subsystem.
///
/// The distilled spec carries these as bare constants (`PAGE_SIZE`,
/// `PAGE_MEMORY_CHILD`); grouping them here lets tests exercise small pages
/// and aggressive splitting without touching the rest of the crate, the way
/// the teacher crate threads its own `PAGE_SIZE` through `BufferPool`.
#[derive(Debug, Clone, Copy)]
pub struct PageConfig {
    /// Byte count above which `NodePage::split` is triggered by the caller.
    pub page_size: usize,

    /// Per-child memory-accounting constant added to `NodePage::memory` for
    /// every entry in `children`, regardless of key size.
    pub page_memory_child: u64,
}

/// Matches the teacher's `pub static PAGE_SIZE: usize = 4096`
/// (`src/database.rs`).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Matches H2-style MVStore child overhead: a handful of words per pointer
/// slot, estimating `pos` + cached flags without needing an exact sizeof.
pub const DEFAULT_PAGE_MEMORY_CHILD: u64 = 16;

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_memory_child: DEFAULT_PAGE_MEMORY_CHILD,
        }
    }
}

impl PageConfig {
    pub fn new(page_size: usize, page_memory_child: u64) -> Self {
        Self { page_size, page_memory_child }
    }
}
