//! Single-pass direct clone
//!
//! Used when neither caching nor pruning is requested: every source entry
//! is applied to the destination the moment the walker yields it. A
//! dereferenced symlink whose target is a directory re-enters this scanner
//! with the target as the new walk root, which is the one place recursion
//! depth needs a hard stop.

use crate::clone::{WalkPolicy, DEREF_NEST_MAX, SYMLINK_TARGET_PSEUDO_FILE};
use crate::config::CloneConfig;
use crate::error::{CloneError, Result};
use crate::fs::classify::{update_stats, Classified, FileKind};
use crate::fs::paths::path_contains_canon;
use crate::fs::reader::read_bounded;
use crate::fs::writer::{create_device_node, create_dir, create_symlink, write_regular};
use crate::stats::Stats;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Run the single-pass clone.
pub(crate) fn run(cfg: &CloneConfig, policy: &mut WalkPolicy, stats: &mut Stats) -> Result<()> {
    let source = cfg.source.clone();
    let destination = cfg.destination.clone();
    clone_tree(cfg, policy, stats, &source, &destination, 0, 0)
}

/// Walk `walk_root` and apply each entry below `dst_root`. `base_depth` is
/// the overall iterator depth at which this walk starts (non-zero inside a
/// dereference deep copy) and `nest` counts deref re-entries.
fn clone_tree(
    cfg: &CloneConfig,
    policy: &mut WalkPolicy,
    stats: &mut Stats,
    walk_root: &Path,
    dst_root: &Path,
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
        trace!(path = %pt.display(), "about to scan this source entry");
        stats.note_depth((base_depth + entry.depth() as u32) as u64);

        let sl_meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                stats.num_error += 1;
                debug!(path = %pt.display(), error = %e, "symlink_status failed, continue");
                if entry.file_type().is_dir() {
                    // its destination directory cannot be created either
                    it.skip_current_dir();
                }
                continue;
            }
        };
        let sl_kind = FileKind::from_file_type(sl_meta.file_type());
        let targ_meta = std::fs::metadata(pt).ok();
        let targ_kind = targ_meta
            .as_ref()
            .map(|m| FileKind::from_file_type(m.file_type()))
            .unwrap_or(FileKind::NotFound);

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

        update_stats(
            Classified { sl_kind, targ_kind },
            hidden,
            stats,
        );

        if cfg.no_dst {
            // scan only; walkdir already enforces max-depth
            continue;
        }

        if hidden && !cfg.clone_hidden {
            stats.num_hidden_skipped += 1;
            if sl_kind == FileKind::Dir {
                it.skip_current_dir();
            }
            continue;
        }

        let rel = match pt.strip_prefix(walk_root) {
            Ok(r) => r,
            Err(_) => {
                stats.num_error += 1;
                debug!(path = %pt.display(), "entry escaped the walk root, continue");
                continue;
            }
        };
        let dst = dst_root.join(rel);

        match sl_kind {
            FileKind::Dir => {
                if !cfg.no_xdev && sl_meta.dev() != policy.root_dev {
                    debug!(path = %pt.display(), "leaving this fs instance, don't enter");
                    it.skip_current_dir();
                }
                if excluded || excluded_fn {
                    it.skip_current_dir();
                    continue;
                }
                create_dir(&dst, sl_meta.mode(), cfg.destin_all_new, stats);
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
                    deref_copy(
                        cfg,
                        policy,
                        stats,
                        pt,
                        &dst,
                        &raw,
                        base_depth + entry.depth() as u32,
                        nest,
                    )?;
                } else if !(excluded || excluded_fn) {
                    create_symlink(
                        raw.as_os_str(),
                        &dst,
                        cfg.destin_all_new,
                        cfg.extra,
                        stats,
                    );
                }
            }
            FileKind::Regular => {
                if excluded || excluded_fn {
                    continue;
                }
                if let Some(out) =
                    read_bounded(pt, cfg.reglen, cfg.wait_ms, sl_meta.mode(), stats)
                {
                    write_regular(&dst, &out.contents, out.mode, cfg.destin_all_new, stats);
                }
            }
            FileKind::Block | FileKind::Char => {
                if excluded || excluded_fn {
                    continue;
                }
                if let Some(meta) = &targ_meta {
                    create_device_node(&dst, meta.mode(), meta.rdev(), stats);
                }
            }
            // recognized and counted, never materialized
            FileKind::Fifo | FileKind::Socket => {}
            FileKind::Other | FileKind::NotFound => {
                trace!(path = %pt.display(), "unrepresentable entry, skip");
            }
        }
    }
    Ok(())
}

/// Expand one dereferenced symlink into a deep copy of its target.
#[allow(clippy::too_many_arguments)]
fn deref_copy(
    cfg: &CloneConfig,
    policy: &mut WalkPolicy,
    stats: &mut Stats,
    pt: &Path,
    dst: &Path,
    raw: &Path,
    depth: u32,
    nest: usize,
) -> Result<()> {
    let canon = match std::fs::canonicalize(pt) {
        Ok(c) => c,
        Err(e) => {
            debug!(path = %pt.display(), error = %e, "deref target unresolvable, keep symlink");
            create_symlink(raw.as_os_str(), dst, cfg.destin_all_new, cfg.extra, stats);
            return Ok(());
        }
    };
    if !path_contains_canon(&cfg.source, &canon) {
        debug!(path = %canon.display(), "deref target outside source, keep symlink");
        create_symlink(raw.as_os_str(), dst, cfg.destin_all_new, cfg.extra, stats);
        return Ok(());
    }

    match std::fs::metadata(&canon) {
        Ok(meta) if meta.is_dir() => {
            stats.num_derefed += 1;
            create_dir(dst, meta.mode(), cfg.destin_all_new, stats);
            let mut text = canon.as_os_str().as_encoded_bytes().to_vec();
            text.push(b'\n');
            stats.num_reg_tries += 1;
            write_regular(
                &dst.join(SYMLINK_TARGET_PSEUDO_FILE),
                &text,
                0o444,
                cfg.destin_all_new,
                stats,
            );
            clone_tree(cfg, policy, stats, &canon, dst, depth, nest + 1)
        }
        Ok(meta) if meta.is_file() => {
            stats.num_derefed += 1;
            if let Some(out) = read_bounded(&canon, cfg.reglen, cfg.wait_ms, meta.mode(), stats)
            {
                write_regular(dst, &out.contents, out.mode, cfg.destin_all_new, stats);
            }
            Ok(())
        }
        _ => {
            create_symlink(raw.as_os_str(), dst, cfg.destin_all_new, cfg.extra, stats);
            Ok(())
        }
    }
}
