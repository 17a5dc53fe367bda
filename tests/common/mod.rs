#![allow(dead_code)]

use std::collections::VecDeque;

use zarrtree::builder::{
    ArrayValue, BuilderTree, Chunk, ChunkIterator, ChunkSourceError, DatasetBuilder, DatasetValue,
    ElementBuffer, GroupBuilder,
};
use zarrtree::dtype::Dtype;

/// Root attributes `{"doc": "top"}`, a subgroup `g1` with `{"n": 3}`, and a
/// 2x2 int32 dataset `g1/d1` holding `[[1, 2], [3, 4]]` in 1x2 chunks.
pub fn sample_tree() -> BuilderTree {
    let mut tree = BuilderTree::new();
    tree.root_group_mut()
        .attributes
        .insert("doc".to_string(), "top".into());

    let mut g1 = GroupBuilder::new("g1");
    g1.attributes.insert("n".to_string(), 3i64.into());
    let g1 = tree.arena.insert_group(g1);
    tree.arena.add_child(tree.root, g1).unwrap();

    let mut d1 = DatasetBuilder::new(
        "d1",
        Dtype::Int32,
        DatasetValue::Array(
            ArrayValue::new(vec![2, 2], ElementBuffer::Int32(vec![1, 2, 3, 4])).unwrap(),
        ),
    );
    d1.io.chunk_shape = Some(vec![1, 2]);
    let d1 = tree.arena.insert_dataset(d1);
    tree.arena.add_child(g1, d1).unwrap();
    tree
}

/// A chunk stream over a pre-built queue of chunks.
pub struct VecStream {
    pub maxshape: Vec<Option<u64>>,
    pub chunks: Vec<u64>,
    pub items: VecDeque<Result<Chunk, ChunkSourceError>>,
    pub parallel: bool,
}

impl VecStream {
    pub fn new(maxshape: Vec<Option<u64>>, chunks: Vec<u64>) -> Self {
        Self {
            maxshape,
            chunks,
            items: VecDeque::new(),
            parallel: false,
        }
    }

    pub fn push(&mut self, indices: Vec<u64>, elements: ElementBuffer) {
        self.items.push_back(Ok(Chunk { indices, elements }));
    }
}

impl ChunkIterator for VecStream {
    fn maxshape(&self) -> Vec<Option<u64>> {
        self.maxshape.clone()
    }

    fn chunk_shape(&self) -> Vec<u64> {
        self.chunks.clone()
    }

    fn parallel_safe(&self) -> bool {
        self.parallel
    }

    fn next_chunk(&mut self) -> Option<Result<Chunk, ChunkSourceError>> {
        self.items.pop_front()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}
