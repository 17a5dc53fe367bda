//! Chunk streams for iterative dataset writes.

use super::ElementBuffer;

/// One chunk produced by a [`ChunkIterator`]: grid indices plus the chunk's
/// elements in C order.
///
/// A full chunk holds exactly `chunk_shape.iter().product()` elements; an
/// edge chunk may hold fewer and is padded with the dataset fill value.
#[derive(Debug)]
pub struct Chunk {
    /// Chunk grid indices (not element offsets).
    pub indices: Vec<u64>,
    /// The chunk elements.
    pub elements: ElementBuffer,
}

/// An error produced by a chunk source.
pub type ChunkSourceError = Box<dyn std::error::Error + Send + Sync>;

/// A producer of dataset chunks with coordinates.
///
/// The engine pre-allocates the dataset from [`maxshape`](Self::maxshape)
/// (unlimited dimensions permitted), then drains the iterator, writing each
/// chunk at the indices it declares. Writing the same coordinates twice is
/// an error.
///
/// An iterator that returns true from [`parallel_safe`](Self::parallel_safe)
/// advertises that its chunks may be encoded and stored by a worker pool;
/// chunks are still *drawn* from the iterator by the owning task only.
pub trait ChunkIterator: Send {
    /// The declared dataset shape; [`None`] marks an unlimited dimension,
    /// which grows to the extent of the chunks actually written.
    fn maxshape(&self) -> Vec<Option<u64>>;

    /// The chunk shape.
    fn chunk_shape(&self) -> Vec<u64>;

    /// Whether chunk writes may be dispatched to a worker pool.
    fn parallel_safe(&self) -> bool {
        false
    }

    /// The next chunk, or [`None`] when the stream is exhausted.
    fn next_chunk(&mut self) -> Option<Result<Chunk, ChunkSourceError>>;
}
