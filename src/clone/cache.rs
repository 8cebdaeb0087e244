//! Cache scanner (pass 1)
//!
//! Walks the source exactly like the direct scanner but materializes
//! nothing: every surviving entry becomes a node in the in-memory tree.
//! The walker keeps the index path of the directory it is inserting into;
//! backing up one level pops it, backing up two or more rebuilds it from
//! the root through the filename→index maps, so growing child vectors can
//! never leave a stale reference behind.

use crate::clone::{WalkPolicy, DEREF_NEST_MAX, SYMLINK_TARGET_PSEUDO_FILE};
use crate::config::CloneConfig;
use crate::error::{CloneError, Result};
use crate::fs::classify::{update_stats, Classified, FileKind};
use crate::fs::paths::path_contains_canon;
use crate::fs::reader::read_bounded;
use crate::stats::Stats;
use crate::tree::{DirData, Node, NodeKind, PruneMask, RegData, Tree};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Build the in-memory tree for the whole source.
pub(crate) fn scan(
    cfg: &CloneConfig,
    policy: &mut WalkPolicy,
    stats: &mut Stats,
    root_dev: u64,
    root_mode: u32,
) -> Result<Tree> {
    let mut tree = Tree::new(&cfg.source, root_dev, root_mode);
    let source = cfg.source.clone();
    cache_walk(cfg, policy, stats, &mut tree, &source, &[], 0, 0)?;
    stats.num_cached_nodes = tree.root.subtree_len();
    Ok(tree)
}

/// Walk `walk_root` inserting nodes below the directory at `anchor`.
#[allow(clippy::too_many_arguments)]
fn cache_walk(
    cfg: &CloneConfig,
    policy: &mut WalkPolicy,
    stats: &mut Stats,
    tree: &mut Tree,
    walk_root: &Path,
    anchor: &[usize],
    base_depth: u32,
    nest: usize,
) -> Result<()> {
    let nest_budget = if cfg.max_depth > 0 {
        cfg.max_depth as usize
    } else {
        DEREF_NEST_MAX
    };
    if nest > nest_budget {
        return Err(CloneError::DerefLoop {
            path: walk_root.to_path_buf(),
            depth: nest,
        });
    }

    let mut walker = WalkDir::new(walk_root).min_depth(1).follow_links(false);
    if cfg.max_depth > 0 {
        let remaining = cfg.max_depth.saturating_sub(base_depth);
        if remaining == 0 {
            return Ok(());
        }
        walker = walker.max_depth(remaining as usize);
    }

    // index path of the directory receiving entries at the current depth
    let mut cur_idx: Vec<usize> = anchor.to_vec();
    let mut prev_depth: usize = 1;
    let mut last_dir_idx: usize = 0;

    let mut it = walker.into_iter();
    while let Some(item) = it.next() {
        let entry = match item {
            Ok(e) => e,
            Err(e) => {
                if nest == 0 && e.path() == Some(walk_root) {
                    let ioe = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk loop"));
                    return Err(CloneError::TruncatedScan {
                        path: walk_root.to_path_buf(),
                        source: ioe,
                    });
                }
                stats.num_error += 1;
                debug!(error = %e, "source walk error, continue");
                continue;
            }
        };

        let pt = entry.path();
        let depth = entry.depth();
        trace!(path = %pt.display(), "about to cache this source entry");
        stats.note_depth((base_depth + depth as u32) as u64);

        // re-enter the directory the walker is now emitting into
        if depth == prev_depth + 1 {
            cur_idx.push(last_dir_idx);
        } else if depth + 1 == prev_depth {
            cur_idx.pop();
        } else if depth < prev_depth {
            let parent = pt.parent().ok_or_else(|| {
                CloneError::TreeInvariant(format!("'{}' has no parent", pt.display()))
            })?;
            cur_idx = tree.reenter(anchor, walk_root, parent)?;
        }
        prev_depth = depth;

        let sl_meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                stats.num_error += 1;
                debug!(path = %pt.display(), error = %e, "symlink_status failed, continue");
                if entry.file_type().is_dir() {
                    // no node to attach children to
                    it.skip_current_dir();
                }
                continue;
            }
        };
        let sl_kind = FileKind::from_file_type(sl_meta.file_type());
        let targ_kind = match std::fs::metadata(pt) {
            Ok(m) => FileKind::from_file_type(m.file_type()),
            Err(_) => FileKind::NotFound,
        };

        let hidden = entry
            .file_name()
            .as_encoded_bytes()
            .first()
            .is_some_and(|&b| b == b'.');

        let excluded = policy.take_exclude(pt);
        if excluded {
            stats.num_excluded += 1;
            debug!(path = %pt.display(), "matched for exclusion");
        }
        let excluded_fn = policy.match_excl_fn(entry.file_name());
        if excluded_fn {
            stats.num_excluded_by_filename += 1;
        }

        update_stats(Classified { sl_kind, targ_kind }, hidden, stats);

        if hidden && !cfg.clone_hidden {
            stats.num_hidden_skipped += 1;
            if sl_kind == FileKind::Dir {
                it.skip_current_dir();
            }
            continue;
        }

        let filename = entry.file_name().to_os_string();
        let mut node = match sl_kind {
            FileKind::Dir => {
                if !cfg.no_xdev && sl_meta.dev() != policy.root_dev {
                    debug!(path = %pt.display(), "leaving this fs instance, don't enter");
                    it.skip_current_dir();
                }
                if excluded || excluded_fn {
                    it.skip_current_dir();
                    continue;
                }
                Node::new(
                    filename,
                    sl_meta.dev(),
                    sl_meta.mode(),
                    NodeKind::Directory(DirData {
                        parent_path: pt.parent().unwrap_or(walk_root).to_path_buf(),
                        depth: (base_depth + depth as u32) as i32 - 1,
                        ..Default::default()
                    }),
                )
            }
            FileKind::Symlink => {
                let raw = match std::fs::read_link(pt) {
                    Ok(t) => t,
                    Err(e) => {
                        stats.num_error += 1;
                        debug!(path = %pt.display(), error = %e, "read_symlink failed");
                        continue;
                    }
                };
                // a dereference match overrides an exclude match
                if policy.take_deref(pt) {
                    cache_deref(
                        cfg,
                        policy,
                        stats,
                        tree,
                        pt,
                        &cur_idx,
                        raw,
                        base_depth + depth as u32,
                        nest,
                    )?;
                    continue;
                }
                if excluded || excluded_fn {
                    continue;
                }
                Node::new(
                    filename,
                    sl_meta.dev(),
                    sl_meta.mode(),
                    NodeKind::Symlink { target: raw },
                )
            }
            FileKind::Regular => {
                if excluded || excluded_fn {
                    continue;
                }
                match regular_node(cfg, stats, pt, filename, &sl_meta) {
                    Some(n) => n,
                    None => continue,
                }
            }
            FileKind::Block | FileKind::Char => {
                if excluded || excluded_fn {
                    continue;
                }
                Node::new(
                    filename,
                    sl_meta.dev(),
                    sl_meta.mode(),
                    NodeKind::Device {
                        is_block: sl_kind == FileKind::Block,
                        st_rdev: sl_meta.rdev(),
                    },
                )
            }
            FileKind::Fifo | FileKind::Socket => Node::new(
                filename,
                sl_meta.dev(),
                sl_meta.mode(),
                NodeKind::FifoSocket,
            ),
            FileKind::Other | FileKind::NotFound => {
                trace!(path = %pt.display(), "unrepresentable entry, skip");
                continue;
            }
        };

        if policy.match_prune(pt) {
            node.base.prune_mask |= PruneMask::EXACT;
            policy.prune_matched = true;
        }
        let is_dir = node.is_dir();
        let idx = tree.insert_child(&cur_idx, node)?;
        if is_dir {
            last_dir_idx = idx;
        }
    }
    Ok(())
}

/// Build a regular-file node, reading contents now when `--cache --cache`.
fn regular_node(
    cfg: &CloneConfig,
    stats: &mut Stats,
    pt: &Path,
    filename: std::ffi::OsString,
    sl_meta: &std::fs::Metadata,
) -> Option<Node> {
    if cfg.cache_level >= 2 {
        let out = read_bounded(pt, cfg.reglen, cfg.wait_ms, sl_meta.mode(), stats)?;
        Some(Node::new(
            filename,
            sl_meta.dev(),
            out.mode,
            NodeKind::Regular(RegData {
                contents: out.contents,
                read_found_nothing: out.found_nothing,
                always_use_contents: false,
            }),
        ))
    } else {
        Some(Node::new(
            filename,
            sl_meta.dev(),
            sl_meta.mode(),
            NodeKind::Regular(RegData::default()),
        ))
    }
}

/// Insert the in-tree form of a dereferenced symlink: a synthesized
/// directory (or copied regular file), never a symlink node.
#[allow(clippy::too_many_arguments)]
fn cache_deref(
    cfg: &CloneConfig,
    policy: &mut WalkPolicy,
    stats: &mut Stats,
    tree: &mut Tree,
    pt: &Path,
    cur_idx: &[usize],
    raw: std::path::PathBuf,
    depth: u32,
    nest: usize,
) -> Result<()> {
    let filename = pt
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();

    let canon = match std::fs::canonicalize(pt) {
        Ok(c) => c,
        Err(e) => {
            debug!(path = %pt.display(), error = %e, "deref target unresolvable, keep symlink");
            return symlink_fallback(policy, tree, cur_idx, pt, filename, raw);
        }
    };
    if !path_contains_canon(&cfg.source, &canon) {
        debug!(path = %canon.display(), "deref target outside source, keep symlink");
        return symlink_fallback(policy, tree, cur_idx, pt, filename, raw);
    }

    match std::fs::metadata(&canon) {
        Ok(meta) if meta.is_dir() => {
            stats.num_derefed += 1;
            let mut dir = Node::new(
                filename,
                meta.dev(),
                meta.mode(),
                NodeKind::Directory(DirData {
                    parent_path: pt.parent().unwrap_or(&cfg.source).to_path_buf(),
                    depth: depth as i32 - 1,
                    ..Default::default()
                }),
            );
            if policy.match_prune(pt) {
                dir.base.prune_mask |= PruneMask::EXACT;
                policy.prune_matched = true;
            }
            let idx = tree.insert_child(cur_idx, dir)?;
            let mut sub_idx = cur_idx.to_vec();
            sub_idx.push(idx);

            // pseudo-file carrying the resolved target path
            let mut text = canon.as_os_str().as_encoded_bytes().to_vec();
            text.push(b'\n');
            let pseudo = Node::new(
                SYMLINK_TARGET_PSEUDO_FILE.into(),
                meta.dev(),
                0o444,
                NodeKind::Regular(RegData {
                    contents: text,
                    read_found_nothing: false,
                    always_use_contents: true,
                }),
            );
            tree.insert_child(&sub_idx, pseudo)?;

            cache_walk(cfg, policy, stats, tree, &canon, &sub_idx, depth, nest + 1)
        }
        Ok(meta) if meta.is_file() => {
            stats.num_derefed += 1;
            match regular_node(cfg, stats, &canon, filename, &meta) {
                Some(node) => apply_prune_mark(policy, tree, cur_idx, pt, node),
                None => Ok(()),
            }
        }
        _ => symlink_fallback(policy, tree, cur_idx, pt, filename, raw),
    }
}

/// Deref could not expand; record a plain symlink node instead.
fn symlink_fallback(
    policy: &mut WalkPolicy,
    tree: &mut Tree,
    cur_idx: &[usize],
    pt: &Path,
    filename: std::ffi::OsString,
    raw: std::path::PathBuf,
) -> Result<()> {
    let (dev, mode) = std::fs::symlink_metadata(pt)
        .map(|m| (m.dev(), m.mode()))
        .unwrap_or((0, 0o120_777));
    let node = Node::new(filename, dev, mode, NodeKind::Symlink { target: raw });
    apply_prune_mark(policy, tree, cur_idx, pt, node)
}

fn apply_prune_mark(
    policy: &mut WalkPolicy,
    tree: &mut Tree,
    cur_idx: &[usize],
    pt: &Path,
    mut node: Node,
) -> Result<()> {
    if policy.match_prune(pt) {
        node.base.prune_mask |= PruneMask::EXACT;
        policy.prune_matched = true;
    }
    tree.insert_child(cur_idx, node)?;
    Ok(())
}
