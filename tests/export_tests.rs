mod common;

use std::path::PathBuf;

use common::sample_tree;

use zarrtree::builder::{
    ArrayValue, BuilderTree, DatasetBuilder, DatasetValue, ElementBuffer, ExternalTarget,
    LinkBuilder, LinkTarget,
};
use zarrtree::dtype::Dtype;
use zarrtree::export::{export, ExportError, ExportOptions, SourceTree};
use zarrtree::io::{ChildNode, Mode, OpenOptions, ZarrIo};

/// The sample tree with a root-level link to `/g1/d1` and gzip-style hints.
fn source_tree_with_link() -> BuilderTree {
    let mut tree = sample_tree();
    let g1 = tree.root_group().children[0];
    let d1 = tree.arena.group(g1).unwrap().children[0];
    let alias = tree
        .arena
        .insert_link(LinkBuilder::new("alias", LinkTarget::Local(d1)));
    tree.arena.add_child(tree.root, alias).unwrap();
    tree
}

#[test]
fn export_preserves_structure_chunks_and_links() {
    let dir = tempfile::TempDir::new().unwrap();
    let src_path = dir.path().join("src.zarr");
    let dst_path = dir.path().join("dst.zarr");

    let mut tree = source_tree_with_link();
    let src_io = ZarrIo::open_directory(&src_path, OpenOptions::new(Mode::Create)).unwrap();
    src_io.write(&mut tree).unwrap();

    let src_root = src_io.read().unwrap();
    let dst_io = ZarrIo::open_directory(&dst_path, OpenOptions::new(Mode::Create)).unwrap();
    export(&src_root, &dst_io, &ExportOptions::default()).unwrap();

    let dst_root = dst_io.read().unwrap();
    // Chunk shape is inherited from the source dataset.
    let d1 = dst_root.group("g1").unwrap().dataset("d1").unwrap();
    assert_eq!(d1.chunk_shape(), &[1, 2]);
    assert_eq!(
        d1.read_array().unwrap(),
        ArrayValue::new(vec![2, 2], ElementBuffer::Int32(vec![1, 2, 3, 4])).unwrap()
    );

    // The link stays a same-file link with relative source ".".
    let records = dst_root.link_records().unwrap();
    assert_eq!(records[0].source, ".");
    assert_eq!(records[0].path, "/g1/d1");
    let ChildNode::Dataset(aliased) = dst_root.child("alias").unwrap() else {
        panic!("alias resolves in the destination");
    };
    assert_eq!(aliased.shape(), &[2, 2]);

    // Object ids are carried over, so same-file records stay valid.
    assert_eq!(
        dst_root.object_id().unwrap(),
        src_root.object_id().unwrap()
    );
}

#[test]
fn export_remaps_external_links_to_destination_root() {
    let dir = tempfile::TempDir::new().unwrap();
    let target_path = dir.path().join("target.zarr");
    ZarrIo::open_directory(&target_path, OpenOptions::new(Mode::Create))
        .unwrap()
        .write(&mut sample_tree())
        .unwrap();

    // The source file lives in a subdirectory, so its stored relative
    // source differs from what the destination needs.
    let src_dir = dir.path().join("inner");
    std::fs::create_dir(&src_dir).unwrap();
    let src_path = src_dir.join("src.zarr");
    let mut tree = sample_tree();
    let external = tree.arena.insert_link(LinkBuilder::new(
        "remote",
        LinkTarget::External(ExternalTarget {
            file: target_path.clone(),
            path: "/g1/d1".to_string(),
            object_id: None,
            source_object_id: None,
            extra: serde_json::Map::new(),
        }),
    ));
    tree.arena.add_child(tree.root, external).unwrap();
    let src_io = ZarrIo::open_directory(&src_path, OpenOptions::new(Mode::Create)).unwrap();
    src_io.write(&mut tree).unwrap();
    assert_eq!(
        src_io.read().unwrap().link_records().unwrap()[0].source,
        "../../target.zarr"
    );

    let dst_path = dir.path().join("dst.zarr");
    let dst_io = ZarrIo::open_directory(&dst_path, OpenOptions::new(Mode::Create)).unwrap();
    export(&src_io.read().unwrap(), &dst_io, &ExportOptions::default()).unwrap();

    let dst_root = dst_io.read().unwrap();
    assert_eq!(dst_root.link_records().unwrap()[0].source, "../target.zarr");
    let ChildNode::Dataset(remote) = dst_root.child("remote").unwrap() else {
        panic!("remote resolves in the destination");
    };
    assert_eq!(remote.shape(), &[2, 2]);
}

/// A foreign hierarchical source: hands the coordinator a builder tree with
/// per-dataset hints, the way an HDF5 reader would.
struct ForeignSource {
    root: PathBuf,
}

impl SourceTree for ForeignSource {
    fn source_root(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }

    fn to_tree(&self) -> Result<BuilderTree, ExportError> {
        let mut tree = BuilderTree::new();
        tree.root_group_mut()
            .attributes
            .insert("origin".to_string(), "foreign".into());

        // Fixed-length byte strings from the foreign file, valid UTF-8.
        let mut labels = DatasetBuilder::new(
            "labels",
            Dtype::Ascii,
            DatasetValue::Array(
                ArrayValue::new(
                    vec![2],
                    ElementBuffer::Str(vec!["left".to_string(), "right".to_string()]),
                )
                .unwrap(),
            ),
        );
        labels.io.chunk_shape = Some(vec![2]);
        let labels = tree.arena.insert_dataset(labels);
        tree.arena.add_child(tree.root, labels).unwrap();

        let mut grid = DatasetBuilder::new(
            "grid",
            Dtype::Float32,
            DatasetValue::Array(
                ArrayValue::new(vec![128, 128], ElementBuffer::Float32(vec![0.5; 128 * 128]))
                    .unwrap(),
            ),
        );
        grid.io.chunk_shape = Some(vec![64, 64]);
        let grid = tree.arena.insert_dataset(grid);
        tree.arena.add_child(tree.root, grid).unwrap();

        // A link record carrying a key this backend does not interpret.
        let mut extra = serde_json::Map::new();
        extra.insert("h5_flavor".to_string(), "external".into());
        let link = tree.arena.insert_link(LinkBuilder::new(
            "grid_alias",
            LinkTarget::External(ExternalTarget {
                file: PathBuf::from("."),
                path: "/grid".to_string(),
                object_id: None,
                source_object_id: None,
                extra,
            }),
        ));
        tree.arena.add_child(tree.root, link).unwrap();
        Ok(tree)
    }
}

#[test]
fn export_from_foreign_source() {
    let dir = tempfile::TempDir::new().unwrap();
    let src = ForeignSource {
        root: dir.path().join("foreign.h5"),
    };
    let dst_path = dir.path().join("dst.zarr");
    let dst_io = ZarrIo::open_directory(&dst_path, OpenOptions::new(Mode::Create)).unwrap();
    export(&src, &dst_io, &ExportOptions::default()).unwrap();

    let root = dst_io.read().unwrap();
    // Valid byte strings are normalized to variable-length UTF-8.
    let labels = root.dataset("labels").unwrap();
    assert_eq!(*labels.dtype(), Dtype::Utf8);
    assert_eq!(
        labels.read_array().unwrap().elements,
        ElementBuffer::Str(vec!["left".to_string(), "right".to_string()])
    );

    // Chunking hints are honored.
    let grid = root.dataset("grid").unwrap();
    assert_eq!(grid.chunk_shape(), &[64, 64]);

    // Same-file link with its unknown record key intact.
    let records = root.link_records().unwrap();
    assert_eq!(records[0].source, ".");
    assert_eq!(records[0].extra["h5_flavor"], "external");
    let ChildNode::Dataset(aliased) = root.child("grid_alias").unwrap() else {
        panic!("grid_alias resolves");
    };
    assert_eq!(aliased.shape(), &[128, 128]);
}
