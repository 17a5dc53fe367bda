mod common;

use common::{sample_tree, VecStream};

use zarrtree::builder::{
    ArrayValue, CompoundValue, DatasetBuilder, DatasetValue, ElementBuffer, FieldValue,
    ScalarValue,
};
use zarrtree::dtype::{AttrValue, CompoundField, Dtype};
use zarrtree::io::{Mode, OpenOptions, WriteError, ZarrIo};
use zarrtree::storage::{consolidate_metadata, read_consolidated, WritableStore};

#[test]
fn basic_write_read_memory() {
    let mut tree = sample_tree();
    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();

    let root = io.read().unwrap();
    assert_eq!(root.attributes().unwrap()["doc"], AttrValue::Str("top".to_string()));

    let g1 = root.group("g1").unwrap();
    assert_eq!(g1.attributes().unwrap()["n"], AttrValue::Int(3));

    let d1 = g1.dataset("d1").unwrap();
    assert_eq!(d1.shape(), &[2, 2]);
    assert_eq!(d1.chunk_shape(), &[1, 2]);
    assert_eq!(*d1.dtype(), Dtype::Int32);
    assert_eq!(
        d1.read_array().unwrap(),
        ArrayValue::new(vec![2, 2], ElementBuffer::Int32(vec![1, 2, 3, 4])).unwrap()
    );
}

#[test]
fn basic_write_read_directory() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("sample.zarr");
    let mut tree = sample_tree();
    let io = ZarrIo::open_directory(&path, OpenOptions::new(Mode::Create)).unwrap();
    io.write(&mut tree).unwrap();
    io.close();

    let io = ZarrIo::open_directory(&path, OpenOptions::new(Mode::Read)).unwrap();
    assert!(io.can_read().unwrap());
    let root = io.read().unwrap();
    let materialized = root.materialize().unwrap();
    assert_eq!(
        materialized.root_group().attributes["doc"],
        AttrValue::Str("top".to_string())
    );
    // Root object id was minted on write and survives the round trip.
    assert_eq!(
        materialized.root_group().object_id,
        tree.root_group().object_id
    );
}

#[test]
fn scalar_and_string_datasets() {
    let mut tree = sample_tree();
    let comment = tree.arena.insert_dataset(DatasetBuilder::new(
        "comment",
        Dtype::Utf8,
        DatasetValue::Scalar(ScalarValue::Str("unit comment 𝒢😀".to_string())),
    ));
    tree.arena.add_child(tree.root, comment).unwrap();
    let flags = tree.arena.insert_dataset(DatasetBuilder::new(
        "flags",
        Dtype::Bool,
        DatasetValue::Array(
            ArrayValue::new(vec![3], ElementBuffer::Bool(vec![true, false, true])).unwrap(),
        ),
    ));
    tree.arena.add_child(tree.root, flags).unwrap();
    let stamps = tree.arena.insert_dataset(DatasetBuilder::new(
        "stamps",
        Dtype::IsoDatetime,
        DatasetValue::Array(
            ArrayValue::new(
                vec![2],
                ElementBuffer::Str(vec![
                    "2024-01-01T00:00:00Z".to_string(),
                    "2024-01-02T12:30:00Z".to_string(),
                ]),
            )
            .unwrap(),
        ),
    ));
    tree.arena.add_child(tree.root, stamps).unwrap();

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();
    let root = io.read().unwrap();

    let comment = root.dataset("comment").unwrap();
    assert_eq!(comment.shape(), &[] as &[u64]);
    assert_eq!(
        comment.read_scalar().unwrap(),
        ScalarValue::Str("unit comment 𝒢😀".to_string())
    );

    let flags = root.dataset("flags").unwrap();
    assert_eq!(
        flags.read_array().unwrap().elements,
        ElementBuffer::Bool(vec![true, false, true])
    );

    let stamps = root.dataset("stamps").unwrap();
    assert_eq!(*stamps.dtype(), Dtype::IsoDatetime);
    assert_eq!(
        stamps.read_array().unwrap().elements,
        ElementBuffer::Str(vec![
            "2024-01-01T00:00:00Z".to_string(),
            "2024-01-02T12:30:00Z".to_string(),
        ])
    );
}

#[test]
fn compound_dataset_round_trip() {
    let fields = vec![
        CompoundField {
            name: "t".to_string(),
            dtype: Dtype::Float64,
        },
        CompoundField {
            name: "count".to_string(),
            dtype: Dtype::Int32,
        },
    ];
    let rows = vec![
        vec![
            FieldValue::Scalar(ScalarValue::Float(0.5)),
            FieldValue::Scalar(ScalarValue::Int(3)),
        ],
        vec![
            FieldValue::Scalar(ScalarValue::Float(1.5)),
            FieldValue::Scalar(ScalarValue::Int(-7)),
        ],
    ];
    let mut tree = sample_tree();
    let events = tree.arena.insert_dataset(DatasetBuilder::new(
        "events",
        Dtype::Compound(fields),
        DatasetValue::Compound(CompoundValue { rows: rows.clone() }),
    ));
    tree.arena.add_child(tree.root, events).unwrap();

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();
    let events = io.read().unwrap().dataset("events").unwrap();
    assert_eq!(events.read_compound().unwrap().rows, rows);
}

#[test]
fn non_finite_attributes_round_trip() {
    let mut tree = sample_tree();
    tree.root_group_mut()
        .attributes
        .insert("nan".to_string(), f64::NAN.into());
    tree.root_group_mut()
        .attributes
        .insert("inf".to_string(), f64::INFINITY.into());

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();
    let attrs = io.read().unwrap().attributes().unwrap();
    assert!(matches!(attrs["nan"], AttrValue::Float(f) if f.is_nan()));
    assert_eq!(attrs["inf"], AttrValue::Float(f64::INFINITY));
}

#[test]
fn reserved_attribute_rejected() {
    let mut tree = sample_tree();
    tree.root_group_mut()
        .attributes
        .insert("zarr_link".to_string(), "boom".into());

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    let err = io.write(&mut tree).unwrap_err();
    assert!(matches!(
        err,
        WriteError::ReservedAttribute { ref name, .. } if name == "zarr_link"
    ));
}

#[test]
fn read_mode_rejects_write() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("readonly.zarr");
    let mut tree = sample_tree();
    ZarrIo::open_directory(&path, OpenOptions::new(Mode::Create))
        .unwrap()
        .write(&mut tree)
        .unwrap();

    let io = ZarrIo::open_directory(&path, OpenOptions::new(Mode::Read)).unwrap();
    assert!(matches!(
        io.write(&mut sample_tree()),
        Err(WriteError::ReadOnlyMode)
    ));
}

#[cfg(feature = "gzip")]
#[test]
fn gzip_compressed_dataset_round_trip() {
    use zarrtree::builder::Compressor;

    let mut tree = sample_tree();
    let mut big = DatasetBuilder::new(
        "big",
        Dtype::Float64,
        DatasetValue::Array(
            ArrayValue::new(vec![100], ElementBuffer::Float64(vec![1.25; 100])).unwrap(),
        ),
    );
    big.io.compressor = Some(Compressor::Gzip { level: 4 });
    let big = tree.arena.insert_dataset(big);
    tree.arena.add_child(tree.root, big).unwrap();

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();
    let big = io.read().unwrap().dataset("big").unwrap();
    assert_eq!(big.metadata().compressor.as_ref().unwrap()["id"], "gzip");
    assert_eq!(
        big.read_array().unwrap().elements,
        ElementBuffer::Float64(vec![1.25; 100])
    );
}

#[test]
fn consolidated_metadata_is_consistent_and_optional() {
    let mut tree = sample_tree();
    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();

    // The stored index matches a freshly computed one.
    let stored = read_consolidated(&**io.storage()).unwrap().unwrap();
    let fresh = consolidate_metadata(&**io.storage()).unwrap();
    assert_eq!(stored, fresh);

    // Readers fall back to per-node metadata without the index.
    io.storage()
        .erase(&".zmetadata".try_into().unwrap())
        .unwrap();
    let root = io.read().unwrap();
    assert_eq!(root.child_names().unwrap(), vec!["g1".to_string()]);
    assert_eq!(
        root.group("g1").unwrap().dataset("d1").unwrap().shape(),
        &[2, 2]
    );
}

#[test]
fn unlimited_stream_with_no_chunks_reads_empty() {
    let mut tree = sample_tree();
    let stream = VecStream::new(vec![None], vec![5]);
    let empty = tree.arena.insert_dataset(DatasetBuilder::new(
        "empty",
        Dtype::Int32,
        DatasetValue::Stream(Box::new(stream)),
    ));
    tree.arena.add_child(tree.root, empty).unwrap();

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();
    let empty = io.read().unwrap().dataset("empty").unwrap();
    assert_eq!(empty.shape(), &[0]);
    assert!(empty.read_array().unwrap().elements.is_empty());
}

#[test]
fn hierarchy_tree_rendering() {
    let mut tree = sample_tree();
    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();
    let rendered = io.read().unwrap().hierarchy_tree().unwrap();
    assert_eq!(rendered, "/\n  g1\n    d1 [2, 2] int32\n");
}
