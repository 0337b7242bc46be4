use std::sync::atomic::{AtomicU64, Ordering};

use crate::btree::page_pos::PagePos;

/// Logical clock driving the "access-time stamp" mentioned in spec §3;
/// a monotonically increasing counter rather than a wall-clock timestamp,
/// since all the eviction heuristic needs is a total order over touches.
static ACCESS_CLOCK: AtomicU64 = AtomicU64::new(1);

/// Fields shared by every page variant (spec §9 Design Notes: the source's
/// `abstract LocalPage` with `NodePage`/`LeafPage` subclasses maps to a
/// tagged variant with an embedded header rather than inheritance).
#[derive(Debug)]
pub struct PageHeader {
    pos: AtomicU64,
    /// Byte-count estimate; immutable once a page is constructed — edits
    /// build a new page rather than mutating this one in place.
    memory: u64,
    last_access: AtomicU64,
}

impl PageHeader {
    pub fn new(memory: u64) -> Self {
        Self {
            pos: AtomicU64::new(PagePos::UNPERSISTED.as_u64()),
            memory,
            last_access: AtomicU64::new(ACCESS_CLOCK.fetch_add(1, Ordering::Relaxed)),
        }
    }

    pub fn with_pos(memory: u64, pos: PagePos) -> Self {
        let header = Self::new(memory);
        header.pos.store(pos.as_u64(), Ordering::Release);
        header
    }
}

/// Behavior shared by every page variant: memory accounting, the on-disk
/// position, and the access-time stamp used to bias eviction toward
/// least-recently-touched pages.
pub trait LocalPage {
    fn header(&self) -> &PageHeader;

    fn pos(&self) -> PagePos {
        PagePos(self.header().pos.load(Ordering::Acquire))
    }

    fn set_pos(&self, pos: PagePos) {
        self.header().pos.store(pos.as_u64(), Ordering::Release);
    }

    fn memory(&self) -> u64 {
        self.header().memory
    }

    /// Record that this page was just observed resident, biasing the GC
    /// heuristic to evict the least-recently-touched page first.
    fn touch(&self) {
        self.header()
            .last_access
            .store(ACCESS_CLOCK.fetch_add(1, Ordering::Relaxed), Ordering::Release);
    }

    fn last_access(&self) -> u64 {
        self.header().last_access.load(Ordering::Acquire)
    }
}

/// Corruption check derived from `(chunk id, start offset, page length)`
/// (spec §4.6/glossary "Check value"). Not cryptographic — only needs to
/// catch torn writes and stray bit flips, the way the spec's "flip one
/// byte" testable property expects.
pub fn compute_check_value(chunk_id: u32, start_offset: u64, page_length: u32) -> i16 {
    let mut h = chunk_id as u64;
    h = h.wrapping_mul(0x9E37_79B1_85EB_CA87).wrapping_add(start_offset);
    h = h.wrapping_mul(0xC2B2_AE3D_27D4_EB4F).wrapping_add(page_length as u64);
    (h >> 48) as i16
}

/// Minimal stand-in for the leaf page subsystem, which spec §1 names as an
/// external collaborator out of this core's scope. It carries only what
/// `PageReference`/`NodePage` need to generically hold either child kind: a
/// shared header and an opaque body. A real deployment swaps this for the
/// full leaf-page implementation; nothing in this crate interprets `body`.
#[derive(Debug)]
pub struct LeafPage {
    header: PageHeader,
    body: Vec<u8>,
}

impl LeafPage {
    pub fn new(body: Vec<u8>, memory: u64) -> Self {
        Self { header: PageHeader::new(memory), body }
    }

    pub fn with_pos(body: Vec<u8>, memory: u64, pos: PagePos) -> Self {
        Self { header: PageHeader::with_pos(memory, pos), body }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl LocalPage for LeafPage {
    fn header(&self) -> &PageHeader {
        &self.header
    }
}

/// Tagged variant standing in for the source's `NodePage`/`LeafPage`
/// subclasses of an abstract `LocalPage` (spec §9 Design Notes).
#[derive(Debug)]
pub enum Page {
    Node(super::node_page::NodePage),
    Leaf(LeafPage),
}

impl LocalPage for Page {
    fn header(&self) -> &PageHeader {
        match self {
            Page::Node(n) => n.header(),
            Page::Leaf(l) => l.header(),
        }
    }
}

impl Page {
    pub fn as_node(&self) -> Option<&super::node_page::NodePage> {
        match self {
            Page::Node(n) => Some(n),
            Page::Leaf(_) => None,
        }
    }

    pub fn kind(&self) -> super::page_reference::ChildKind {
        match self {
            Page::Node(_) => super::page_reference::ChildKind::Node,
            Page::Leaf(_) => super::page_reference::ChildKind::Leaf,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_advances_access_time() {
        let header = PageHeader::new(0);
        struct Dummy(PageHeader);
        impl LocalPage for Dummy {
            fn header(&self) -> &PageHeader {
                &self.0
            }
        }
        let page = Dummy(header);
        let t0 = page.last_access();
        page.touch();
        assert!(page.last_access() > t0);
    }

    #[test]
    fn check_value_is_sensitive_to_every_input() {
        let base = compute_check_value(1, 100, 200);
        assert_ne!(base, compute_check_value(2, 100, 200));
        assert_ne!(base, compute_check_value(1, 101, 200));
        assert_ne!(base, compute_check_value(1, 100, 201));
    }
}
