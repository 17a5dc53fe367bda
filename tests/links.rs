mod common;

use common::{init_tracing, sample_tree};

use zarrtree::builder::{
    ArrayValue, ElementBuffer, ExternalTarget, GroupBuilder, LinkBuilder, LinkTarget,
};
use zarrtree::io::{ChildNode, Mode, OpenOptions, ReadError, ZarrIo};
use zarrtree::link::ResolveError;

/// The sample tree plus a root-level soft link `alias` to `/g1/d1`.
fn tree_with_alias() -> zarrtree::builder::BuilderTree {
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
fn soft_link_record_grammar() {
    let mut tree = tree_with_alias();
    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();

    let root_id = tree.root_group().object_id.clone().unwrap();
    let raw = io.read().unwrap().raw_attributes().unwrap();
    assert_eq!(
        raw["zarr_link"],
        serde_json::json!([{
            "name": "alias",
            "source": ".",
            "path": "/g1/d1",
            "object_id": null,
            "source_object_id": root_id,
        }])
    );
}

#[test]
fn soft_link_resolves_to_target_dataset() {
    let mut tree = tree_with_alias();
    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();

    let root = io.read().unwrap();
    let ChildNode::Dataset(aliased) = root.child("alias").unwrap() else {
        panic!("alias resolves to a dataset");
    };
    assert_eq!(aliased.path().as_str(), "/g1/d1");
    assert_eq!(
        aliased.read_array().unwrap(),
        ArrayValue::new(vec![2, 2], ElementBuffer::Int32(vec![1, 2, 3, 4])).unwrap()
    );
}

#[test]
fn file_move_keeps_links_resolving() {
    let dir = tempfile::TempDir::new().unwrap();
    let before = dir.path().join("before.zarr");
    let mut tree = tree_with_alias();
    ZarrIo::open_directory(&before, OpenOptions::new(Mode::Create))
        .unwrap()
        .write(&mut tree)
        .unwrap();

    // Rename the whole file; nothing inside is modified.
    let after = dir.path().join("after.zarr");
    std::fs::rename(&before, &after).unwrap();

    let io = ZarrIo::open_directory(&after, OpenOptions::new(Mode::Read)).unwrap();
    let ChildNode::Dataset(aliased) = io.read().unwrap().child("alias").unwrap() else {
        panic!("alias resolves to a dataset");
    };
    assert_eq!(aliased.shape(), &[2, 2]);
}

/// Write a target file and a file linking into it, then move both together.
#[test]
fn external_link_moved_together_resolves() {
    init_tracing();
    let parent = tempfile::TempDir::new().unwrap();
    let target_path = parent.path().join("target.zarr");
    let mut target_tree = sample_tree();
    ZarrIo::open_directory(&target_path, OpenOptions::new(Mode::Create))
        .unwrap()
        .write(&mut target_tree)
        .unwrap();

    let linker_path = parent.path().join("linker.zarr");
    let mut linker_tree = sample_tree();
    let external = linker_tree.arena.insert_link(LinkBuilder::new(
        "remote",
        LinkTarget::External(ExternalTarget {
            file: target_path.clone(),
            path: "/g1/d1".to_string(),
            object_id: None,
            source_object_id: target_tree.root_group().object_id.clone(),
            extra: serde_json::Map::new(),
        }),
    ));
    linker_tree.arena.add_child(linker_tree.root, external).unwrap();
    ZarrIo::open_directory(&linker_path, OpenOptions::new(Mode::Create))
        .unwrap()
        .write(&mut linker_tree)
        .unwrap();

    // The stored source is relative, so the pair can move as a unit.
    let io = ZarrIo::open_directory(&linker_path, OpenOptions::new(Mode::Read)).unwrap();
    let records = io.read().unwrap().link_records().unwrap();
    assert_eq!(records[0].source, "../target.zarr");

    let moved = tempfile::TempDir::new().unwrap();
    std::fs::rename(
        &target_path,
        moved.path().join("target.zarr"),
    )
    .unwrap();
    std::fs::rename(
        &linker_path,
        moved.path().join("linker.zarr"),
    )
    .unwrap();

    let io = ZarrIo::open_directory(
        moved.path().join("linker.zarr"),
        OpenOptions::new(Mode::Read),
    )
    .unwrap();
    let ChildNode::Dataset(remote) = io.read().unwrap().child("remote").unwrap() else {
        panic!("remote resolves to a dataset");
    };
    assert_eq!(
        remote.read_array().unwrap().elements,
        ElementBuffer::Int32(vec![1, 2, 3, 4])
    );
}

#[test]
fn missing_external_file_is_reported() {
    let parent = tempfile::TempDir::new().unwrap();
    let linker_path = parent.path().join("linker.zarr");
    let mut tree = sample_tree();
    let external = tree.arena.insert_link(LinkBuilder::new(
        "gone",
        LinkTarget::External(ExternalTarget {
            file: parent.path().join("never-written.zarr"),
            path: "/g1".to_string(),
            object_id: None,
            source_object_id: None,
            extra: serde_json::Map::new(),
        }),
    ));
    tree.arena.add_child(tree.root, external).unwrap();
    ZarrIo::open_directory(&linker_path, OpenOptions::new(Mode::Create))
        .unwrap()
        .write(&mut tree)
        .unwrap();

    let io = ZarrIo::open_directory(&linker_path, OpenOptions::new(Mode::Read)).unwrap();
    let root = io.read().unwrap();
    // The rest of the file stays readable; only the dereference fails.
    assert_eq!(root.child_names().unwrap(), vec!["g1".to_string()]);
    let err = root.child("gone").unwrap_err();
    assert!(matches!(
        err,
        ReadError::Resolve(ResolveError::ExternalUnavailable { .. })
    ));
}

#[test]
fn broken_link_raises_only_on_dereference() {
    let mut tree = sample_tree();
    let g1 = tree.root_group().children[0];
    let dangling = tree.arena.insert_group(GroupBuilder::new("doomed"));
    tree.arena.add_child(tree.root, dangling).unwrap();
    let link = tree
        .arena
        .insert_link(LinkBuilder::new("dangling", LinkTarget::Local(dangling)));
    tree.arena.add_child(g1, link).unwrap();

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();

    // Erase the target after the fact to sever the link.
    use zarrtree::storage::WritableStore;
    io.storage()
        .erase_prefix(&"doomed/".try_into().unwrap())
        .unwrap();
    zarrtree::storage::consolidate_metadata(&**io.storage()).unwrap();

    let root = io.read().unwrap();
    let g1 = root.group("g1").unwrap();
    // Traversal of the group still succeeds.
    assert!(g1.child_names().unwrap().is_empty());
    let err = g1.child("dangling").unwrap_err();
    assert!(matches!(
        err,
        ReadError::Resolve(ResolveError::BrokenLink { .. })
    ));
}

#[test]
fn dataset_link_in_subgroup() {
    // A link can live anywhere, not just at the root.
    let mut tree = sample_tree();
    let g1 = tree.root_group().children[0];
    let d1 = tree.arena.group(g1).unwrap().children[0];
    let g2 = tree.arena.insert_group(GroupBuilder::new("g2"));
    tree.arena.add_child(tree.root, g2).unwrap();
    let link = tree
        .arena
        .insert_link(LinkBuilder::new("shared", LinkTarget::Local(d1)));
    tree.arena.add_child(g2, link).unwrap();

    let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
    io.write(&mut tree).unwrap();
    let g2 = io.read().unwrap().group("g2").unwrap();
    let records = g2.link_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "/g1/d1");

    let ChildNode::Dataset(shared) = g2.child("shared").unwrap() else {
        panic!("shared resolves to a dataset");
    };
    assert_eq!(shared.shape(), &[2, 2]);
}
