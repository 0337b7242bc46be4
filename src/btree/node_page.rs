use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use log::debug;

use crate::btree::chunk::Chunk;
use crate::btree::data_buffer::DataBuffer;
use crate::btree::key_type::{Key, KeyType};
use crate::btree::local_page::{compute_check_value, LocalPage, Page, PageHeader};
use crate::btree::page_pos::PagePos;
use crate::btree::page_reference::{ChildKind, PageReference};
use crate::btree::storage::BTreeStorage;
use crate::config::PageConfig;
use crate::error::{PageError, PageResult};
use crate::utils::HandyRwLock;

/// Whether a node page's body is stored verbatim or run through a
/// compression algorithm. The compression codec itself is an external
/// collaborator (spec §1 Out of scope); this core only needs to recognize
/// "no compression" and reject anything else rather than invent a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    None,
}

impl CompressionKind {
    fn to_byte(self) -> u8 {
        match self {
            CompressionKind::None => 0,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(CompressionKind::None),
            _ => None,
        }
    }
}

fn encode_type_byte(kind: ChildKind, compression: CompressionKind) -> u8 {
    kind.to_byte() | (compression.to_byte() << 1)
}

fn decode_type_byte(b: u8) -> PageResult<(ChildKind, CompressionKind)> {
    let kind = ChildKind::from_byte(b & 0x1)
        .ok_or_else(|| PageError::unsupported(format!("unknown page kind bits in type byte {:#x}", b)))?;
    let compression = CompressionKind::from_byte((b >> 1) & 0x7f)
        .ok_or_else(|| PageError::unsupported(format!("unrecognized compression in type byte {:#x}", b)))?;
    Ok((kind, compression))
}

/// Byte offsets produced by `NodePage::write`, handed back to
/// `write_unsaved_recursive` so it can patch child positions later without
/// re-deriving them (spec §4.7 step 2: "record the patch position").
#[derive(Debug, Clone, Copy)]
pub struct WriteLayout {
    pub start_offset: usize,
    pub child_pos_patch_offset: usize,
    pub page_length: u32,
}

/// Inner B-tree node: sorted separator keys and `keys.len() + 1` child
/// references (spec §3/§4).
#[derive(Debug)]
pub struct NodePage {
    header: PageHeader,
    keys: Vec<Key>,
    children: Vec<Arc<PageReference>>,
    /// The `PageReference` slot (in this node's parent) that points at this
    /// node — weak, since the strong side of that relationship is the
    /// parent's `children` entry, which itself holds `Arc<Page>` containing
    /// this very `NodePage` (spec §9 Design Notes: no reference cycle may
    /// block eviction).
    own_ref: RwLock<Weak<PageReference>>,
    /// Accelerates monotonic access patterns (spec §3 `cachedCompare`).
    cached_compare: AtomicUsize,
    /// The on-disk position this node supersedes, if any — set when a
    /// copy-on-write edit replaces a previously persisted page, so
    /// `write_unsaved_recursive` knows what to report as removable.
    replaced_pos: AtomicU64,
}

impl NodePage {
    pub fn new(keys: Vec<Key>, children: Vec<Arc<PageReference>>, memory: u64) -> Self {
        Self {
            header: PageHeader::new(memory),
            keys,
            children,
            own_ref: RwLock::new(Weak::new()),
            cached_compare: AtomicUsize::new(0),
            replaced_pos: AtomicU64::new(PagePos::UNPERSISTED.as_u64()),
        }
    }

    fn with_pos(keys: Vec<Key>, children: Vec<Arc<PageReference>>, memory: u64, pos: PagePos) -> Self {
        Self {
            header: PageHeader::with_pos(memory, pos),
            keys,
            children,
            own_ref: RwLock::new(Weak::new()),
            cached_compare: AtomicUsize::new(0),
            replaced_pos: AtomicU64::new(PagePos::UNPERSISTED.as_u64()),
        }
    }

    /// `Σ keyType.memory(keys[i]) + (K+1)·PAGE_MEMORY_CHILD` (spec §3).
    pub fn compute_memory(keys: &[Key], child_count: usize, codec: &dyn KeyType<Key>, cfg: &PageConfig) -> u64 {
        let keys_memory: u64 = keys.iter().map(|k| codec.memory(k)).sum();
        keys_memory + (child_count as u64) * cfg.page_memory_child
    }

    pub fn with_computed_memory(
        keys: Vec<Key>,
        children: Vec<Arc<PageReference>>,
        codec: &dyn KeyType<Key>,
        cfg: &PageConfig,
    ) -> Self {
        let memory = Self::compute_memory(&keys, children.len(), codec, cfg);
        Self::new(keys, children, memory)
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn children(&self) -> &[Arc<PageReference>] {
        &self.children
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn check_invariants(&self) -> PageResult<()> {
        if self.children.len() != self.keys.len() + 1 {
            return Err(PageError::invariant(format!(
                "len(children)={} != len(keys)+1={}",
                self.children.len(),
                self.keys.len() + 1
            )));
        }
        if !self.keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(PageError::invariant("keys are not strictly ascending"));
        }
        Ok(())
    }

    fn recompute_memory(&mut self, new_memory: u64) {
        let pos = self.header.pos();
        self.header = PageHeader::with_pos(new_memory, pos);
    }

    /// Marks `pos` as the on-disk image this (copy-on-write) node
    /// supersedes, so `write_unsaved_recursive` can report it removable
    /// once this node itself is persisted.
    fn mark_replaces(&self, pos: PagePos) {
        self.replaced_pos.store(pos.as_u64(), Ordering::Release);
    }

    fn replaced_pos(&self) -> PagePos {
        PagePos(self.replaced_pos.load(Ordering::Acquire))
    }

    pub fn own_ref(&self) -> Option<Arc<PageReference>> {
        self.own_ref.rl().upgrade()
    }

    /// Records the `PageReference` that points at this node and rewires
    /// every direct child's `parent_ref` to it. Called whenever a node is
    /// published — on first construction, after a split, after a
    /// copy-on-write rebuild, and after deserialization — covering both
    /// "parent back-pointers on the new children are set to this node's
    /// own reference" (spec §4.6 read) and "rewires the parent
    /// back-pointers of left and right" (spec §4.4 copyAndInsertChild),
    /// generalized to every child since copy-on-write always supersedes
    /// the old parent's identity entirely, not just the split pair.
    pub fn set_own_ref(&self, reference: &Arc<PageReference>) {
        *self.own_ref.wl() = Arc::downgrade(reference);
        for child in &self.children {
            child.set_parent_ref(reference);
        }
    }

    /// Finds the child index a descent for `key` should follow, honoring
    /// the invariant `subtree(children[i]) < keys[i] <= subtree(children[i+1])`.
    /// Consults `cached_compare` first to accelerate monotonic access
    /// patterns (spec §3).
    pub fn find_child_index(&self, key: &Key) -> usize {
        let hint = self.cached_compare.load(Ordering::Relaxed);
        if hint < self.keys.len() && self.keys[hint] <= *key && (hint + 1 == self.keys.len() || *key < self.keys[hint + 1]) {
            self.cached_compare.store(hint + 1, Ordering::Relaxed);
            return hint + 1;
        }

        let idx = match self.keys.binary_search(key) {
            Ok(j) => j + 1,
            Err(i) => i,
        };
        self.cached_compare.store(idx, Ordering::Relaxed);
        idx
    }

    /// Resolves child `i`, materializing it from the cached buffer or disk
    /// if it has been evicted (spec §4.2 `getChildPage`).
    pub fn get_child_page(&self, i: usize, storage: &dyn BTreeStorage) -> PageResult<Arc<Page>> {
        self.children[i].get_page(storage)
    }

    /// Splits this unpublished working copy at `at`: the key at `at`
    /// becomes the separator and moves to the parent; `self` keeps
    /// `keys[0..at]`/`children[0..=at]`, and the returned sibling gets
    /// `keys[at+1..]`/`children[at+1..]` (spec §4.3).
    pub fn split(&mut self, at: usize, codec: &dyn KeyType<Key>, cfg: &PageConfig) -> PageResult<(Key, NodePage)> {
        let k = self.keys.len();
        if at >= k {
            return Err(PageError::invariant(format!("split index {} out of range for {} keys", at, k)));
        }

        let separator = self.keys[at];
        let right_keys = self.keys.split_off(at + 1);
        // `self.keys` is now `keys[0..=at]`; drop the separator itself.
        let popped = self.keys.pop();
        debug_assert_eq!(popped, Some(separator));
        let right_children = self.children.split_off(at + 1);

        let left_memory = Self::compute_memory(&self.keys, self.children.len(), codec, cfg);
        self.recompute_memory(left_memory);

        let right = NodePage::with_computed_memory(right_keys, right_children, codec, cfg);

        debug!("split at {}: left keys={:?}, right keys={:?}", at, self.keys, right.keys);
        Ok((separator, right))
    }

    /// Builds the copy-on-write parent that installs a completed child
    /// split: the separator and the `(left, right)` pair replace the
    /// single reference that used to point at the child which split (spec
    /// §4.4). The old node is left untouched — the caller discards it.
    pub fn copy_and_insert_child(
        &self,
        separator: Key,
        left: Arc<PageReference>,
        right: Arc<PageReference>,
        codec: &dyn KeyType<Key>,
        cfg: &PageConfig,
    ) -> NodePage {
        let idx = self.find_child_index(&separator);

        let mut new_keys = Vec::with_capacity(self.keys.len() + 1);
        new_keys.extend_from_slice(&self.keys[..idx]);
        new_keys.push(separator);
        new_keys.extend_from_slice(&self.keys[idx..]);

        let mut new_children = Vec::with_capacity(self.children.len() + 1);
        new_children.extend(self.children[..idx].iter().cloned());
        new_children.push(left);
        new_children.push(right);
        new_children.extend(self.children[idx + 1..].iter().cloned());

        let new_memory = self.memory() + codec.memory(&separator) + cfg.page_memory_child;
        let new_node = NodePage::new(new_keys, new_children, new_memory);
        if self.pos().is_persisted() {
            new_node.mark_replaces(self.pos());
        }
        new_node
    }

    /// Drops child slot `index` and, if any keys remain, the adjacent
    /// separator — `index == 0` drops `keys[0]`, otherwise `keys[index-1]`
    /// (spec §4.5). Only valid on an unpublished working copy.
    pub fn remove(&mut self, index: usize, codec: &dyn KeyType<Key>, cfg: &PageConfig) -> PageResult<()> {
        if index >= self.children.len() {
            return Err(PageError::invariant(format!("remove index {} out of range for {} children", index, self.children.len())));
        }
        self.children.remove(index);

        let mut removed_key_memory = 0;
        if !self.keys.is_empty() {
            let key_idx = if index == 0 { 0 } else { index - 1 };
            let removed_key = self.keys.remove(key_idx);
            removed_key_memory = codec.memory(&removed_key);
        }

        let new_memory = self
            .memory()
            .saturating_sub(cfg.page_memory_child)
            .saturating_sub(removed_key_memory);
        self.recompute_memory(new_memory);
        Ok(())
    }

    /// Serializes this node's header and body into `buf` (spec §4.6),
    /// writing each child's *current* `pos()` (typically 0 for unpersisted
    /// children) and returning the offsets `write_unsaved_recursive` needs
    /// to patch in the real positions afterward.
    pub fn write(&self, buf: &mut DataBuffer, chunk_id: u32, codec: &dyn KeyType<Key>) -> PageResult<WriteLayout> {
        let start_offset = buf.len();
        buf.put_i32(0); // pageLength placeholder
        buf.put_i16(0); // checkValue placeholder
        buf.put_var_u64(self.keys.len() as u64);
        buf.put_u8(encode_type_byte(ChildKind::Node, CompressionKind::None));

        let child_pos_patch_offset = buf.len();
        for child in &self.children {
            buf.put_u64(child.pos().as_u64());
        }
        for child in &self.children {
            buf.put_u8(child.kind().to_byte());
            if child.kind() == ChildKind::Leaf {
                buf.put_i32(0); // reserved replication slot (spec §9 Open Question)
            }
        }
        codec.write(buf, &self.keys);

        let page_length = (buf.len() - start_offset) as u32;
        buf.patch_i32_at(start_offset, page_length as i32);
        let check = compute_check_value(chunk_id, start_offset as u64, page_length);
        buf.patch_i16_at(start_offset + 4, check);

        Ok(WriteLayout { start_offset, child_pos_patch_offset, page_length })
    }

    /// Deserializes a node page starting at `start_offset` in `buf`,
    /// reversing `write` (spec §4.6). `self_pos` is this page's own
    /// on-disk position, supplied by the caller (the storage collaborator
    /// knows where the bytes came from); children are created evicted.
    ///
    /// `check_offset` is the chunk-relative offset the check value was
    /// originally computed against (spec §4.7/§6), kept separate from
    /// `start_offset` because a buffer sliced down to just this page's own
    /// bytes (`InMemoryStorage::read_page_from_buffer`'s cached-`PageInfo`
    /// path) always has a cursor of 0 even when the page's real offset
    /// within its chunk was nonzero.
    pub fn read(
        buf: &DataBuffer,
        start_offset: usize,
        check_offset: u64,
        self_pos: PagePos,
        chunk_id: u32,
        codec: &dyn KeyType<Key>,
        cfg: &PageConfig,
    ) -> PageResult<NodePage> {
        let page_length = buf.get_i32_at(self_pos, start_offset)? as u32;
        let check = buf.get_i16_at(self_pos, start_offset + 4)?;
        let expected = compute_check_value(chunk_id, check_offset, page_length);
        if check != expected {
            return Err(PageError::corrupt(self_pos, "check value mismatch"));
        }

        let mut cursor = start_offset + 4 + 2;
        let (k, consumed) = buf.get_var_u64_at(self_pos, cursor)?;
        cursor += consumed;
        let k = k as usize;

        let type_byte = buf.get_u8_at(self_pos, cursor)?;
        cursor += 1;
        let (kind, compression) = decode_type_byte(type_byte)?;
        if kind != ChildKind::Node {
            return Err(PageError::unsupported("expected a node page, found a leaf page type byte"));
        }
        if compression != CompressionKind::None {
            return Err(PageError::unsupported("compressed node page bodies are not supported by this core"));
        }

        let mut child_positions = Vec::with_capacity(k + 1);
        for _ in 0..=k {
            child_positions.push(PagePos(buf.get_u64_at(self_pos, cursor)?));
            cursor += 8;
        }

        let mut child_kinds = Vec::with_capacity(k + 1);
        for _ in 0..=k {
            let b = buf.get_u8_at(self_pos, cursor)?;
            cursor += 1;
            let child_kind = ChildKind::from_byte(b)
                .ok_or_else(|| PageError::corrupt(self_pos, format!("unknown child kind byte {:#x}", b)))?;
            if child_kind == ChildKind::Leaf {
                let _reserved = buf.get_i32_at(self_pos, cursor)?;
                cursor += 4;
            }
            child_kinds.push(child_kind);
        }

        let keys = codec.read(buf, self_pos, cursor, k)?;

        let children: Vec<Arc<PageReference>> = child_positions
            .into_iter()
            .zip(child_kinds.into_iter())
            .map(|(pos, kind)| PageReference::evicted(pos, kind))
            .collect();

        let memory = Self::compute_memory(&keys, children.len(), codec, cfg);
        Ok(NodePage::with_pos(keys, children, memory, self_pos))
    }
}

impl LocalPage for NodePage {
    fn header(&self) -> &PageHeader {
        &self.header
    }
}

/// Wraps a freshly built `NodePage` in its governing `PageReference`,
/// wiring `own_ref` and every direct child's `parent_ref` (spec §4.1/§4.4).
pub fn publish(node: NodePage) -> Arc<PageReference> {
    let page = Arc::new(Page::Node(node));
    let reference = PageReference::resident(page.clone());
    if let Page::Node(n) = &*page {
        n.set_own_ref(&reference);
    }
    reference
}

/// Recursively flushes the unsaved subtree rooted at `page_ref` into
/// `chunk`/`buf`, assigning positions bottom-up (spec §4.7). A no-op if
/// `page_ref` is already persisted, which is also what makes a second
/// invocation over the same subtree idempotent.
pub fn write_unsaved_recursive(
    page_ref: &Arc<PageReference>,
    chunk: &Chunk,
    buf: &mut DataBuffer,
    storage: &dyn BTreeStorage,
    codec: &dyn KeyType<Key>,
) -> PageResult<()> {
    if page_ref.pos().is_persisted() {
        return Ok(());
    }

    let page = page_ref
        .peek_page()
        .ok_or_else(|| PageError::invariant("an unpersisted PageReference must keep its page resident"))?;
    let node = match &*page {
        Page::Node(n) => n,
        Page::Leaf(_) => {
            return Err(PageError::invariant("write-back of a bare leaf page is outside this core's scope"));
        }
    };

    let layout = node.write(buf, chunk.id(), codec)?;

    for child in node.children() {
        if let Some(child_page) = child.peek_page() {
            write_unsaved_recursive(child, chunk, buf, storage, codec)?;
            child.set_pos(child_page.pos());
        }
        child.evict();
    }

    let mut patch_offset = layout.child_pos_patch_offset;
    for child in node.children() {
        buf.patch_u64_at(patch_offset, child.pos().as_u64());
        patch_offset += 8;
    }

    let assigned_pos = storage.assign_position(chunk, layout.start_offset as u64, layout.page_length, ChildKind::Node);
    node.set_pos(assigned_pos);
    page_ref.set_pos(assigned_pos);
    chunk.update_chunk_and_page(layout.start_offset as u64, layout.page_length, ChildKind::Node);

    if node.replaced_pos().is_persisted() {
        storage.mark_removable(node.replaced_pos());
    }

    Ok(())
}

/// Recursive diagnostic traversal (spec §4.8): not required for
/// correctness, included because it exercises the read path. `read_evicted`
/// controls whether off-line children are materialized through `storage`
/// or merely reported as evicted.
pub fn pretty_print(
    page_ref: &Arc<PageReference>,
    storage: &dyn BTreeStorage,
    depth: usize,
    read_evicted: bool,
) -> PageResult<()> {
    let indent = "  ".repeat(depth);
    let resolved = match page_ref.peek_page() {
        Some(p) => Some(p),
        None if read_evicted => Some(page_ref.get_page(storage)?),
        None => None,
    };

    match resolved {
        Some(page) => match &*page {
            Page::Node(n) => {
                debug!("{}node pos={} keys={:?}", indent, n.pos(), n.keys());
                for child in n.children() {
                    pretty_print(child, storage, depth + 1, read_evicted)?;
                }
            }
            Page::Leaf(_) => {
                debug!("{}leaf pos={}", indent, page_ref.pos());
            }
        },
        None => {
            debug!("{}<evicted, pos={}>", indent, page_ref.pos());
        }
    }
    Ok(())
}
