//! Prune propagation (pass 2)
//!
//! Pass 1 only stamped `EXACT` on the nodes that matched a `--prune` path.
//! This pass turns those stamps into the full take-set: `ALL_BELOW` over
//! every matched subtree, `UP_CHAIN` along the directory spine from each
//! kept region up to the source root, and — the part that makes sysfs
//! pruning useful at all — the same treatment for every subtree reachable
//! through a kept symlink whose target lies inside the source.
//!
//! Single ownership rules out marking a sibling subtree while a recursion
//! holds its ancestors, so symlink targets queue onto a worklist that
//! drains after each mark pass, and `UP_CHAIN` stamps are applied last.
//! A region that is already `ALL_BELOW` terminates re-entry, which is what
//! keeps symlink cycles finite.

use crate::error::{CloneError, Result};
use crate::fs::paths::{path_contains_canon, split_relative};
use crate::stats::Stats;
use crate::tree::{Node, NodeBase, NodeKind, PruneMask, Tree};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

#[derive(Default)]
struct PruneCtx {
    /// component chains (relative to root) whose ancestors need UP_CHAIN
    up_chains: Vec<Vec<OsString>>,
    /// canonical symlink targets still to be propagated into
    targets: VecDeque<PathBuf>,
}

/// Run prune propagation over the cached tree.
pub(crate) fn propagate(tree: &mut Tree, take_all: bool, stats: &mut Stats) -> Result<()> {
    let source = tree.source.clone();
    let mut ctx = PruneCtx::default();
    let mut rel: Vec<OsString> = Vec::new();

    mark_walk(&mut tree.root, take_all, &source, &mut rel, &mut ctx, stats);

    while let Some(target) = ctx.targets.pop_front() {
        let comps = match split_relative(&target, &source) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %target.display(), error = ?e, "prune target path error");
                stats.num_prune_targ_path_err += 1;
                continue;
            }
        };
        let Some(idx_path) = tree.locate(&comps) else {
            trace!(path = %target.display(), "prune target not in cache");
            stats.num_prune_targ_missing += 1;
            continue;
        };
        let node = tree.dir_at_mut(&idx_path)?;
        if node.base.prune_mask.contains(PruneMask::ALL_BELOW) {
            continue;
        }
        ctx.up_chains.push(comps.clone());
        match node.kind {
            NodeKind::Directory(_) => {
                let mut rel = comps;
                mark_walk(node, true, &source, &mut rel, &mut ctx, stats);
            }
            _ => set_all_below(&mut node.base),
        }
    }

    for chain in std::mem::take(&mut ctx.up_chains) {
        apply_up_chain(tree, &chain)?;
    }

    stats.num_pruned_kept = count_kept(&tree.root);
    Ok(())
}

/// Depth-first mark pass. `in_prune` is true inside an already-selected
/// region; an `EXACT` stamp starts a new one.
fn mark_walk(
    node: &mut Node,
    in_prune: bool,
    source: &Path,
    rel: &mut Vec<OsString>,
    ctx: &mut PruneCtx,
    stats: &mut Stats,
) {
    let eff = in_prune || node.base.prune_mask.contains(PruneMask::EXACT);

    match &mut node.kind {
        NodeKind::Directory(dir) => {
            if node.base.prune_mask.contains(PruneMask::ALL_BELOW) {
                // region already fully marked; terminates symlink cycles
                return;
            }
            if eff {
                set_all_below(&mut node.base);
                if !in_prune {
                    ctx.up_chains.push(rel.clone());
                }
            }
            for child in &mut dir.children {
                rel.push(child.base.filename.clone());
                mark_walk(child, eff, source, rel, ctx, stats);
                rel.pop();
            }
        }
        NodeKind::Symlink { .. } => {
            if eff && !node.base.prune_mask.contains(PruneMask::ALL_BELOW) {
                set_all_below(&mut node.base);
                if !in_prune {
                    ctx.up_chains.push(rel.clone());
                }
                let mut abs = source.to_path_buf();
                for c in rel.iter() {
                    abs.push(c);
                }
                match std::fs::canonicalize(&abs) {
                    Ok(canon) => {
                        if path_contains_canon(source, &canon) {
                            ctx.targets.push_back(canon);
                        } else {
                            trace!(path = %canon.display(), "kept symlink points outside source");
                            stats.num_prune_sym_outside += 1;
                        }
                    }
                    Err(e) => {
                        debug!(path = %abs.display(), error = %e, "kept symlink unresolvable");
                        stats.num_prune_targ_path_err += 1;
                    }
                }
            }
        }
        _ => {
            if eff && !node.base.prune_mask.contains(PruneMask::ALL_BELOW) {
                set_all_below(&mut node.base);
                if !in_prune {
                    ctx.up_chains.push(rel.clone());
                }
            }
        }
    }
}

/// ALL_BELOW wins over UP_CHAIN (tie-break for spines that turn out to be
/// inside a kept region).
fn set_all_below(base: &mut NodeBase) {
    base.prune_mask.insert(PruneMask::ALL_BELOW);
    base.prune_mask.remove(PruneMask::UP_CHAIN);
}

/// Stamp UP_CHAIN on every ancestor of the node addressed by `chain`,
/// walking top-down from the root through the filename→index maps.
fn apply_up_chain(tree: &mut Tree, chain: &[OsString]) -> Result<()> {
    let mut node = &mut tree.root;
    for comp in chain {
        if !node.base.prune_mask.contains(PruneMask::ALL_BELOW) {
            node.base.prune_mask.insert(PruneMask::UP_CHAIN);
        }
        let filename = node.base.filename.clone();
        let dir = node.as_dir_mut().ok_or_else(|| {
            CloneError::TreeInvariant(format!(
                "up-chain crosses non-directory '{}'",
                Path::new(&filename).display()
            ))
        })?;
        let &idx = dir.fn_map.get(comp).ok_or_else(|| {
            CloneError::TreeInvariant(format!(
                "up-chain lost '{}' under '{}'",
                Path::new(comp).display(),
                Path::new(&filename).display()
            ))
        })?;
        node = &mut dir.children[idx];
    }
    Ok(())
}

fn count_kept(node: &Node) -> u64 {
    let mut n = u64::from(!node.base.prune_mask.is_empty());
    if let NodeKind::Directory(dir) = &node.kind {
        for child in &dir.children {
            n += count_kept(child);
        }
    }
    n
}
