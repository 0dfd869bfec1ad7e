mod arena;
mod handle;
mod node;
mod tree;

pub(crate) use tree::{RawAvlTree, RawIter};
