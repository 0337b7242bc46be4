use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// One page's entry in a chunk's offset/length table (spec §2: "tracks
/// per-page offsets and lengths").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPageEntry {
    pub offset: u64,
    pub length: u32,
    pub kind: super::page_reference::ChildKind,
}

/// Append-only region of the page store that a single checkpoint writes
/// into (spec §4.7/§9 Design Notes: the source's chunk concept, carried
/// over as the unit `write_unsaved_recursive` assigns positions within).
///
/// A `Chunk` does not own the bytes themselves — the storage collaborator
/// does — it only tracks bookkeeping for the pages written into it during
/// the checkpoint that owns it. Garbage accounting for compaction is the
/// storage collaborator's job (`InMemoryStorage::mark_removable`/
/// `chunk_garbage_ratio`), since a page superseded while writing chunk N
/// may live in any previously committed chunk, not just this one.
#[derive(Debug)]
pub struct Chunk {
    id: u32,
    node_pages: AtomicU64,
    leaf_pages: AtomicU64,
    bytes_written: AtomicU64,
    pages: Mutex<Vec<ChunkPageEntry>>,
}

impl Chunk {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            node_pages: AtomicU64::new(0),
            leaf_pages: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            pages: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Records that a page of `page_length` bytes was just written at
    /// `start_offset` within this chunk (spec §4.7 step 5: "Inform the
    /// chunk of the page's final length and offset"), appending to the
    /// per-page `(offset, length, kind)` table `InMemoryStorage` consults to
    /// locate previously written pages (spec §2, SPEC_FULL.md §4.9).
    pub fn update_chunk_and_page(&self, start_offset: u64, page_length: u32, kind: super::page_reference::ChildKind) {
        match kind {
            super::page_reference::ChildKind::Node => self.node_pages.fetch_add(1, Ordering::Relaxed),
            super::page_reference::ChildKind::Leaf => self.leaf_pages.fetch_add(1, Ordering::Relaxed),
        };
        self.bytes_written.fetch_add(page_length as u64, Ordering::Relaxed);
        self.pages.lock().unwrap().push(ChunkPageEntry { offset: start_offset, length: page_length, kind });
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn page_count(&self) -> u64 {
        self.node_pages.load(Ordering::Relaxed) + self.leaf_pages.load(Ordering::Relaxed)
    }

    /// The per-page offset/length table recorded so far, in write order.
    pub fn pages(&self) -> Vec<ChunkPageEntry> {
        self.pages.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::page_reference::ChildKind;

    #[test]
    fn tracks_bytes_and_pages_per_kind() {
        let chunk = Chunk::new(1);
        chunk.update_chunk_and_page(0, 100, ChildKind::Node);
        chunk.update_chunk_and_page(100, 40, ChildKind::Leaf);
        assert_eq!(chunk.bytes_written(), 140);
        assert_eq!(chunk.page_count(), 2);
    }

    #[test]
    fn records_per_page_offset_length_table() {
        let chunk = Chunk::new(7);
        chunk.update_chunk_and_page(0, 100, ChildKind::Node);
        chunk.update_chunk_and_page(100, 40, ChildKind::Leaf);

        let pages = chunk.pages();
        assert_eq!(
            pages,
            vec![
                ChunkPageEntry { offset: 0, length: 100, kind: ChildKind::Node },
                ChunkPageEntry { offset: 100, length: 40, kind: ChildKind::Leaf },
            ]
        );
    }
}
