//! The executable arena that code blobs live in.

mod code_heap;
mod free_list;
mod segment_map;

pub use self::code_heap::{CodeHeap, HEAP_BLOCK_HEADER_SIZE};
