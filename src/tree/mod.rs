//! In-memory source tree
//!
//! Cache mode snapshots the whole source hierarchy into this tree before
//! anything is written. Nodes are a six-kind sum type sharing a common
//! header; directories own their children in an append-only vector plus a
//! filename→index map for child directories. There are no parent pointers:
//! a node addresses itself through `parent_index` and the walker re-enters
//! a directory top-down from the root, so growing child vectors never
//! invalidate anything.

use crate::error::{CloneError, Result};
use crate::fs::paths::split_relative;
use bitflags::bitflags;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

bitflags! {
    /// Marks applied by the prune pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PruneMask: u8 {
        /// node matched a --prune path in pass 1
        const EXACT = 1 << 0;
        /// node lies inside a kept subtree
        const ALL_BELOW = 1 << 1;
        /// node is on the directory spine leading to a kept subtree
        const UP_CHAIN = 1 << 2;
    }
}

/// Header shared by every node kind.
#[derive(Debug, Clone)]
pub struct NodeBase {
    /// leaf name, no path separators
    pub filename: OsString,
    /// device id of the containing filesystem
    pub st_dev: u64,
    /// mode and type bits
    pub st_mode: u32,
    /// this node's slot in its parent's child vector
    pub parent_index: usize,
    pub prune_mask: PruneMask,
    /// set only on the source root
    pub is_root: bool,
}

/// Directory payload.
#[derive(Debug, Clone, Default)]
pub struct DirData {
    pub children: Vec<Node>,
    /// child *directories* by leaf name; non-directories are not mapped
    pub fn_map: HashMap<OsString, usize>,
    /// absolute path of the directory containing this one
    pub parent_path: PathBuf,
    /// source root is -1, its direct children are 0
    pub depth: i32,
}

/// Regular-file payload.
#[derive(Debug, Clone, Default)]
pub struct RegData {
    pub contents: Vec<u8>,
    /// a short read of 0 bytes was observed
    pub read_found_nothing: bool,
    /// contents were synthesized (deref pseudo-file); never re-read source
    pub always_use_contents: bool,
}

/// The six node kinds.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Directory(DirData),
    Symlink {
        /// raw link text, preserved verbatim
        target: PathBuf,
    },
    Regular(RegData),
    Device {
        is_block: bool,
        st_rdev: u64,
    },
    FifoSocket,
    Other,
}

/// One cached source node.
#[derive(Debug, Clone)]
pub struct Node {
    pub base: NodeBase,
    pub kind: NodeKind,
}

impl Node {
    /// Build a node with an unassigned parent slot; insertion fixes it up.
    pub fn new(filename: OsString, st_dev: u64, st_mode: u32, kind: NodeKind) -> Self {
        Self {
            base: NodeBase {
                filename,
                st_dev,
                st_mode,
                parent_index: 0,
                prune_mask: PruneMask::empty(),
                is_root: false,
            },
            kind,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    pub fn as_dir(&self) -> Option<&DirData> {
        match &self.kind {
            NodeKind::Directory(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut DirData> {
        match &mut self.kind {
            NodeKind::Directory(d) => Some(d),
            _ => None,
        }
    }

    /// Number of nodes in this subtree, self included.
    pub fn subtree_len(&self) -> u64 {
        let mut n = 1;
        if let NodeKind::Directory(d) = &self.kind {
            for c in &d.children {
                n += c.subtree_len();
            }
        }
        n
    }
}

/// The cached source tree.
#[derive(Debug)]
pub struct Tree {
    pub root: Node,
    /// canonical source root path
    pub source: PathBuf,
}

impl Tree {
    /// Create a tree whose root models the canonical source directory.
    pub fn new(source: &Path, st_dev: u64, st_mode: u32) -> Self {
        let filename = source
            .file_name()
            .map(OsStr::to_os_string)
            .unwrap_or_else(|| OsString::from("/"));
        let parent_path = source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        let mut root = Node::new(
            filename,
            st_dev,
            st_mode,
            NodeKind::Directory(DirData {
                children: Vec::new(),
                fn_map: HashMap::new(),
                parent_path,
                depth: -1,
            }),
        );
        root.base.is_root = true;
        Self {
            root,
            source: source.to_path_buf(),
        }
    }

    /// Borrow the directory node addressed by an index path from the root.
    pub fn dir_at(&self, idx_path: &[usize]) -> Result<&Node> {
        let mut cur = &self.root;
        for &i in idx_path {
            let dir = cur
                .as_dir()
                .ok_or_else(|| CloneError::TreeInvariant(format!("non-directory at slot {i}")))?;
            cur = dir
                .children
                .get(i)
                .ok_or_else(|| CloneError::TreeInvariant(format!("child index {i} out of range")))?;
        }
        Ok(cur)
    }

    /// Mutable variant of [`Tree::dir_at`].
    pub fn dir_at_mut(&mut self, idx_path: &[usize]) -> Result<&mut Node> {
        let mut cur = &mut self.root;
        for &i in idx_path {
            let dir = cur
                .as_dir_mut()
                .ok_or_else(|| CloneError::TreeInvariant(format!("non-directory at slot {i}")))?;
            cur = dir
                .children
                .get_mut(i)
                .ok_or_else(|| CloneError::TreeInvariant(format!("child index {i} out of range")))?;
        }
        Ok(cur)
    }

    /// Append `node` to the directory at `dir_idx_path`. Returns the slot
    /// the child landed in (its `parent_index`).
    pub fn insert_child(&mut self, dir_idx_path: &[usize], mut node: Node) -> Result<usize> {
        let parent = self.dir_at_mut(dir_idx_path)?;
        let dir = parent.as_dir_mut().ok_or_else(|| {
            CloneError::TreeInvariant("insert target is not a directory".into())
        })?;
        let idx = dir.children.len();
        node.base.parent_index = idx;
        if node.is_dir() {
            dir.fn_map.insert(node.base.filename.clone(), idx);
        }
        dir.children.push(node);
        Ok(idx)
    }

    /// Resolve the index path of the directory whose absolute path is
    /// `abs_dir`. This is the pass-1 walker's re-entry after backing up two
    /// or more levels: split the path below the walk root, then follow the
    /// filename→index maps top-down.
    ///
    /// For the main walk `anchor` is empty and `walk_root` is the source
    /// path; a nested dereference walk passes the synthesized directory's
    /// slot and the canonical target path instead.
    pub fn reenter(&self, anchor: &[usize], walk_root: &Path, abs_dir: &Path) -> Result<Vec<usize>> {
        let comps = split_relative(abs_dir, walk_root).map_err(|e| {
            CloneError::TreeInvariant(format!(
                "re-entry path '{}' unusable: {e:?}",
                abs_dir.display()
            ))
        })?;
        let mut idx_path = Vec::with_capacity(anchor.len() + comps.len());
        idx_path.extend_from_slice(anchor);
        let mut cur = self.dir_at(anchor)?;
        for comp in &comps {
            let dir = cur.as_dir().ok_or_else(|| {
                CloneError::TreeInvariant(format!(
                    "re-entry hit non-directory below '{}'",
                    abs_dir.display()
                ))
            })?;
            let &i = dir.fn_map.get(comp.as_os_str()).ok_or_else(|| {
                CloneError::TreeInvariant(format!(
                    "re-entry lost '{}' under '{}'",
                    Path::new(comp).display(),
                    abs_dir.display()
                ))
            })?;
            cur = &dir.children[i];
            idx_path.push(i);
        }
        Ok(idx_path)
    }

    /// Locate a node by its components relative to the source root. Interior
    /// components must be directories; the final one may be any kind.
    pub fn locate(&self, rel: &[OsString]) -> Option<Vec<usize>> {
        let mut idx_path = Vec::with_capacity(rel.len());
        let mut cur = &self.root;
        for (pos, comp) in rel.iter().enumerate() {
            let dir = cur.as_dir()?;
            if let Some(&i) = dir.fn_map.get(comp.as_os_str()) {
                cur = &dir.children[i];
                idx_path.push(i);
                continue;
            }
            // non-directories are not in the map; allowed as the last hop
            if pos == rel.len() - 1 {
                let i = dir
                    .children
                    .iter()
                    .position(|c| c.base.filename == *comp)?;
                idx_path.push(i);
                return Some(idx_path);
            }
            return None;
        }
        Some(idx_path)
    }

    /// Verify the structural invariants of the whole tree.
    pub fn check_invariants(&self) -> Result<()> {
        fn walk(node: &Node) -> Result<()> {
            let Some(dir) = node.as_dir() else {
                return Ok(());
            };
            for (i, child) in dir.children.iter().enumerate() {
                if child.base.parent_index != i {
                    return Err(CloneError::TreeInvariant(format!(
                        "'{}' has parent_index {} but sits in slot {i}",
                        Path::new(&child.base.filename).display(),
                        child.base.parent_index
                    )));
                }
                if child.is_dir() {
                    match dir.fn_map.get(&child.base.filename) {
                        Some(&mi) if mi == i => {}
                        _ => {
                            return Err(CloneError::TreeInvariant(format!(
                                "fn_map misses directory '{}'",
                                Path::new(&child.base.filename).display()
                            )))
                        }
                    }
                }
                walk(child)?;
            }
            Ok(())
        }
        if !self.root.base.is_root {
            return Err(CloneError::TreeInvariant("root flag missing".into()));
        }
        walk(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_node(name: &str, parent_path: &str, depth: i32) -> Node {
        Node::new(
            name.into(),
            1,
            0o40755,
            NodeKind::Directory(DirData {
                parent_path: parent_path.into(),
                depth,
                ..Default::default()
            }),
        )
    }

    fn reg_node(name: &str) -> Node {
        Node::new(name.into(), 1, 0o100644, NodeKind::Regular(RegData::default()))
    }

    fn sample_tree() -> Tree {
        // /src/{class/{net/{eth0}}, attr}
        let mut tree = Tree::new(Path::new("/src"), 1, 0o40755);
        let class = tree
            .insert_child(&[], dir_node("class", "/src", 0))
            .unwrap();
        let net = tree
            .insert_child(&[class], dir_node("net", "/src/class", 1))
            .unwrap();
        tree.insert_child(&[class, net], reg_node("eth0")).unwrap();
        tree.insert_child(&[], reg_node("attr")).unwrap();
        tree
    }

    #[test]
    fn test_root_shape() {
        let tree = Tree::new(Path::new("/sys"), 7, 0o40555);
        assert!(tree.root.base.is_root);
        assert_eq!(tree.root.base.filename, OsString::from("sys"));
        assert_eq!(tree.root.as_dir().unwrap().depth, -1);
        assert_eq!(tree.root.as_dir().unwrap().parent_path, PathBuf::from("/"));
    }

    #[test]
    fn test_insert_assigns_parent_index() {
        let tree = sample_tree();
        tree.check_invariants().unwrap();
        let root_dir = tree.root.as_dir().unwrap();
        assert_eq!(root_dir.children.len(), 2);
        assert_eq!(root_dir.children[0].base.parent_index, 0);
        assert_eq!(root_dir.children[1].base.parent_index, 1);
    }

    #[test]
    fn test_fn_map_covers_dirs_only() {
        let tree = sample_tree();
        let root_dir = tree.root.as_dir().unwrap();
        assert_eq!(root_dir.fn_map.get(OsStr::new("class")), Some(&0));
        // "attr" is regular, not mapped
        assert!(root_dir.fn_map.get(OsStr::new("attr")).is_none());
    }

    #[test]
    fn test_reenter_walks_fn_maps() {
        let tree = sample_tree();
        let idx = tree
            .reenter(&[], Path::new("/src"), Path::new("/src/class/net"))
            .unwrap();
        assert_eq!(idx, vec![0, 0]);
        let node = tree.dir_at(&idx).unwrap();
        assert_eq!(node.base.filename, OsString::from("net"));
    }

    #[test]
    fn test_reenter_anchored_below_subdir() {
        let tree = sample_tree();
        // anchor at "class", walk rooted at some unrelated real path
        let idx = tree
            .reenter(&[0], Path::new("/real/target"), Path::new("/real/target/net"))
            .unwrap();
        assert_eq!(idx, vec![0, 0]);
    }

    #[test]
    fn test_reenter_rejects_foreign_path() {
        let tree = sample_tree();
        assert!(tree
            .reenter(&[], Path::new("/src"), Path::new("/other/place"))
            .is_err());
    }

    #[test]
    fn test_locate_regular_leaf() {
        let tree = sample_tree();
        let idx = tree
            .locate(&[OsString::from("class"), OsString::from("net"), OsString::from("eth0")])
            .unwrap();
        let node = tree.dir_at(&idx).unwrap();
        assert_eq!(node.base.filename, OsString::from("eth0"));
        assert!(!node.is_dir());
    }

    #[test]
    fn test_locate_missing() {
        let tree = sample_tree();
        assert!(tree.locate(&[OsString::from("nope")]).is_none());
        assert!(tree
            .locate(&[OsString::from("attr"), OsString::from("below")])
            .is_none());
    }

    #[test]
    fn test_subtree_len() {
        let tree = sample_tree();
        assert_eq!(tree.root.subtree_len(), 5);
    }

    #[test]
    fn test_invariant_violation_detected() {
        let mut tree = sample_tree();
        tree.root.as_dir_mut().unwrap().children[1].base.parent_index = 9;
        assert!(tree.check_invariants().is_err());
    }

    #[test]
    fn test_prune_mask_ops() {
        let mut m = PruneMask::empty();
        m |= PruneMask::UP_CHAIN;
        assert!(m.contains(PruneMask::UP_CHAIN));
        m |= PruneMask::ALL_BELOW;
        m.remove(PruneMask::UP_CHAIN);
        assert_eq!(m, PruneMask::ALL_BELOW);
    }
}
