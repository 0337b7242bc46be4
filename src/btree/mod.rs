/*
The node page subsystem: the on-disk/in-memory B-tree internal page, its
copy-on-write structural primitives, and the small set of collaborators
(chunk, storage, key codec, data buffer) it is built against.
*/

pub mod chunk;
pub mod data_buffer;
pub mod key_type;
pub mod local_page;
pub mod node_page;
pub mod page_pos;
pub mod page_reference;
pub mod storage;
