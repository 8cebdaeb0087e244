//! Unroll pass (final)
//!
//! Emits the cached tree onto the destination. Source paths are rebuilt by
//! joining filenames down from the source root — inside a dereferenced
//! subtree that path crosses the live symlink, which is exactly what makes
//! lazy content reads resolve to the real target. With prune active, any
//! node whose mask is still empty takes its whole subtree with it.

use crate::config::CloneConfig;
use crate::error::Result;
use crate::fs::reader::read_bounded;
use crate::fs::writer::{create_device_node, create_dir, create_symlink, write_regular};
use crate::stats::Stats;
use crate::tree::{Node, NodeKind, Tree};
use std::path::Path;
use tracing::trace;

/// Write the tree below the destination root. `filter` enables prune-mask
/// filtering (set only when a prune pass actually ran).
pub(crate) fn run(
    tree: &Tree,
    cfg: &CloneConfig,
    filter: bool,
    stats: &mut Stats,
) -> Result<()> {
    // the destination root itself always exists (validated at config time)
    unroll_children(&tree.root, &tree.source, &cfg.destination, cfg, filter, stats)
}

fn unroll_children(
    node: &Node,
    src_dir: &Path,
    dst_dir: &Path,
    cfg: &CloneConfig,
    filter: bool,
    stats: &mut Stats,
) -> Result<()> {
    let Some(dir) = node.as_dir() else {
        return Ok(());
    };
    for child in &dir.children {
        if filter && child.base.prune_mask.is_empty() {
            trace!(name = %Path::new(&child.base.filename).display(), "pruned, skip subtree");
            continue;
        }
        let src = src_dir.join(&child.base.filename);
        let dst = dst_dir.join(&child.base.filename);
        match &child.kind {
            NodeKind::Directory(_) => {
                create_dir(&dst, child.base.st_mode, cfg.destin_all_new, stats);
                unroll_children(child, &src, &dst, cfg, filter, stats)?;
            }
            NodeKind::Symlink { target } => {
                create_symlink(
                    target.as_os_str(),
                    &dst,
                    cfg.destin_all_new,
                    cfg.extra,
                    stats,
                );
            }
            NodeKind::Regular(reg) => {
                if reg.always_use_contents || cfg.cache_level >= 2 {
                    if reg.always_use_contents {
                        stats.num_reg_tries += 1;
                    }
                    write_regular(
                        &dst,
                        &reg.contents,
                        child.base.st_mode,
                        cfg.destin_all_new,
                        stats,
                    );
                } else if let Some(out) =
                    read_bounded(&src, cfg.reglen, cfg.wait_ms, child.base.st_mode, stats)
                {
                    write_regular(&dst, &out.contents, out.mode, cfg.destin_all_new, stats);
                }
            }
            NodeKind::Device { st_rdev, .. } => {
                create_device_node(&dst, child.base.st_mode, *st_rdev, stats);
            }
            // recognized during the scan, never materialized
            NodeKind::FifoSocket | NodeKind::Other => {}
        }
    }
    Ok(())
}
