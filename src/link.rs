//! Links and object references.
//!
//! The chunked store has no native link or reference type. Links are
//! emulated with the reserved `zarr_link` group attribute holding a JSON
//! array of [`LinkRecord`]s; object references are dataset elements or
//! attribute values holding [`ReferenceRecord`]s. A record names its target
//! by `source` (the relative path from the containing file's root to the
//! target's file, `"."` for the same file) and `path` (the absolute in-file
//! node path), so whole-file moves keep every record valid.
//!
//! Resolution is lazy: see [`RefSlot`].

mod record;
mod resolve;

pub use record::{LinkRecord, ReferenceRecord};
pub use resolve::{RefSlot, ResolveError, ResolvedNode};

use std::path::{Path, PathBuf};

/// The `source` of a record whose target is in the same file.
pub const SAME_FILE: &str = ".";

/// Compute the `source` of a record: the relative path from the file rooted
/// at `current_root` to the file rooted at `target_root`.
///
/// Returns [`SAME_FILE`] when the roots are equal, and the absolute target
/// root when no relative path exists (e.g. different drives).
#[must_use]
pub fn relative_source(current_root: &Path, target_root: &Path) -> String {
    if current_root == target_root {
        return SAME_FILE.to_string();
    }
    match pathdiff::diff_paths(target_root, current_root) {
        Some(diff) if diff.as_os_str().is_empty() => SAME_FILE.to_string(),
        Some(diff) => path_to_source(&diff),
        None => path_to_source(target_root),
    }
}

/// Resolve a record `source` against the root of the containing file.
///
/// The result is lexically normalized (`.` and `..` components collapsed) so
/// it can be re-anchored against another root.
#[must_use]
pub fn resolve_source(current_root: &Path, source: &str) -> PathBuf {
    if source == SAME_FILE {
        current_root.to_path_buf()
    } else {
        normalize(&current_root.join(source))
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Render a path with `/` separators, as stored in records.
fn path_to_source(path: &Path) -> String {
    let components: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    components.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_source_same_file() {
        assert_eq!(
            relative_source(Path::new("/data/a.zarr"), Path::new("/data/a.zarr")),
            "."
        );
    }

    #[test]
    fn relative_source_sibling() {
        assert_eq!(
            relative_source(Path::new("/data/a.zarr"), Path::new("/data/b.zarr")),
            "../b.zarr"
        );
        assert_eq!(
            relative_source(Path::new("/data/a.zarr"), Path::new("/other/c.zarr")),
            "../../other/c.zarr"
        );
    }

    #[test]
    fn resolve_inverts_relative() {
        let current = Path::new("/data/a.zarr");
        let target = Path::new("/data/b.zarr");
        let source = relative_source(current, target);
        assert_eq!(resolve_source(current, &source), target);

        let deeper = Path::new("/data/inner/c.zarr");
        let source = relative_source(deeper, target);
        assert_eq!(source, "../../b.zarr");
        assert_eq!(resolve_source(deeper, &source), target);
    }
}
