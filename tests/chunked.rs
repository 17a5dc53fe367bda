mod common;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use common::{sample_tree, VecStream};

use zarrtree::builder::{DatasetBuilder, DatasetValue, ElementBuffer};
use zarrtree::dtype::Dtype;
use zarrtree::io::{Mode, OpenOptions, WriteError, ZarrIo};

/// The value written into every element of chunk `(ci, cj)`.
fn chunk_value(ci: u64, cj: u64) -> i32 {
    (ci * 100 + cj) as i32
}

fn big_stream(parallel: bool) -> VecStream {
    let mut stream = VecStream::new(vec![Some(1000), Some(1000)], vec![10, 10]);
    stream.parallel = parallel;
    for ci in 0..100 {
        for cj in 0..100 {
            stream.push(
                vec![ci, cj],
                ElementBuffer::Int32(vec![chunk_value(ci, cj); 100]),
            );
        }
    }
    stream
}

fn write_big(stream: VecStream, options: OpenOptions) -> ZarrIo<zarrtree::storage::store::MemoryStore> {
    let mut tree = sample_tree();
    let big = tree.arena.insert_dataset(DatasetBuilder::new(
        "big",
        Dtype::Int32,
        DatasetValue::Stream(Box::new(stream)),
    ));
    tree.arena.add_child(tree.root, big).unwrap();
    let io = ZarrIo::open_memory(options);
    io.write(&mut tree).unwrap();
    io
}

fn check_big(io: &ZarrIo<zarrtree::storage::store::MemoryStore>) {
    let big = io.read().unwrap().dataset("big").unwrap();
    assert_eq!(big.shape(), &[1000, 1000]);
    assert_eq!(big.chunk_shape(), &[10, 10]);
    let array = big.read_array().unwrap();
    let ElementBuffer::Int32(values) = &array.elements else {
        panic!("int32 dataset");
    };
    // Spot-check positions across several chunks.
    for (row, col) in [(0u64, 0u64), (9, 9), (10, 0), (55, 123), (999, 999)] {
        let expected = chunk_value(row / 10, col / 10);
        assert_eq!(values[(row * 1000 + col) as usize], expected, "({row},{col})");
    }
}

#[test]
fn iterative_chunked_write() {
    // A consolidation pass over 10000 chunk keys dominates this test's
    // runtime without changing what it checks.
    let io = write_big(
        big_stream(false),
        OpenOptions::new(Mode::Create).consolidate_metadata(false),
    );
    check_big(&io);
}

#[test]
fn parallel_chunked_write_matches_serial() {
    let io = write_big(
        big_stream(true),
        OpenOptions::new(Mode::Create)
            .consolidate_metadata(false)
            .parallel_workers(4),
    );
    check_big(&io);
}

#[test]
fn overlapping_chunks_fail() {
    let mut stream = VecStream::new(vec![Some(20)], vec![10]);
    stream.push(vec![0], ElementBuffer::Int32(vec![1; 10]));
    stream.push(vec![1], ElementBuffer::Int32(vec![2; 10]));
    stream.push(vec![0], ElementBuffer::Int32(vec![3; 10]));

    let mut tree = sample_tree();
    let big = tree.arena.insert_dataset(DatasetBuilder::new(
        "big",
        Dtype::Int32,
        DatasetValue::Stream(Box::new(stream)),
    ));
    tree.arena.add_child(tree.root, big).unwrap();

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    let err = io.write(&mut tree).unwrap_err();
    assert!(matches!(
        err,
        WriteError::OverlappingChunks { ref indices, .. } if indices == &[0]
    ));
}

#[test]
fn chunk_outside_declared_shape_fails() {
    let mut stream = VecStream::new(vec![Some(10)], vec![10]);
    stream.push(vec![1], ElementBuffer::Int32(vec![1; 10]));

    let mut tree = sample_tree();
    let big = tree.arena.insert_dataset(DatasetBuilder::new(
        "big",
        Dtype::Int32,
        DatasetValue::Stream(Box::new(stream)),
    ));
    tree.arena.add_child(tree.root, big).unwrap();

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    assert!(matches!(
        io.write(&mut tree).unwrap_err(),
        WriteError::ChunkOutOfBounds { .. }
    ));
}

#[test]
fn unlimited_dimension_grows_to_written_extent() {
    let mut stream = VecStream::new(vec![None], vec![4]);
    stream.push(vec![0], ElementBuffer::Int64(vec![0, 1, 2, 3]));
    stream.push(vec![1], ElementBuffer::Int64(vec![4, 5, 6, 7]));
    stream.push(vec![2], ElementBuffer::Int64(vec![8, 9, 10, 11]));

    let mut tree = sample_tree();
    let series = tree.arena.insert_dataset(DatasetBuilder::new(
        "series",
        Dtype::Int64,
        DatasetValue::Stream(Box::new(stream)),
    ));
    tree.arena.add_child(tree.root, series).unwrap();

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();

    let series = io.read().unwrap().dataset("series").unwrap();
    assert_eq!(series.shape(), &[12]);
    assert_eq!(
        series.read_array().unwrap().elements,
        ElementBuffer::Int64((0..12).collect())
    );
}

#[test]
fn edge_chunk_is_padded_with_fill() {
    let mut stream = VecStream::new(vec![Some(6)], vec![4]);
    stream.push(vec![0], ElementBuffer::Int32(vec![1, 2, 3, 4]));
    // The final chunk is clipped by the declared shape.
    stream.push(vec![1], ElementBuffer::Int32(vec![5, 6]));

    let mut tree = sample_tree();
    let series = tree.arena.insert_dataset(DatasetBuilder::new(
        "series",
        Dtype::Int32,
        DatasetValue::Stream(Box::new(stream)),
    ));
    tree.arena.add_child(tree.root, series).unwrap();

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();

    let series = io.read().unwrap().dataset("series").unwrap();
    assert_eq!(series.shape(), &[6]);
    assert_eq!(
        series.read_array().unwrap().elements,
        ElementBuffer::Int32(vec![1, 2, 3, 4, 5, 6])
    );
}

#[test]
fn stream_error_propagates() {
    let mut stream = VecStream::new(vec![Some(20)], vec![10]);
    stream.push(vec![0], ElementBuffer::Int32(vec![1; 10]));
    stream
        .items
        .push_back(Err("sensor went away".to_string().into()));

    let mut tree = sample_tree();
    let big = tree.arena.insert_dataset(DatasetBuilder::new(
        "big",
        Dtype::Int32,
        DatasetValue::Stream(Box::new(stream)),
    ));
    tree.arena.add_child(tree.root, big).unwrap();

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    let err = io.write(&mut tree).unwrap_err();
    assert!(matches!(
        err,
        WriteError::ChunkSource { ref reason, .. } if reason.contains("sensor went away")
    ));
}

#[test]
fn progress_callback_reports_chunks() {
    let seen = Arc::new(AtomicU64::new(0));
    let seen_in_callback = seen.clone();
    let options = OpenOptions::new(Mode::Create).progress(Arc::new(move |path, done, total| {
        assert_eq!(path, "/series");
        assert_eq!(total, Some(3));
        seen_in_callback.store(done, Ordering::Relaxed);
    }));

    let mut stream = VecStream::new(vec![Some(12)], vec![4]);
    for index in 0..3u64 {
        stream.push(
            vec![index],
            ElementBuffer::Int32(vec![index as i32; 4]),
        );
    }
    let mut tree = sample_tree();
    let series = tree.arena.insert_dataset(DatasetBuilder::new(
        "series",
        Dtype::Int32,
        DatasetValue::Stream(Box::new(stream)),
    ));
    tree.arena.add_child(tree.root, series).unwrap();

    let io = ZarrIo::open_memory(options);
    io.write(&mut tree).unwrap();
    assert_eq!(seen.load(Ordering::Relaxed), 3);
}
