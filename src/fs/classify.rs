//! File-kind classification
//!
//! Each source entry is looked at twice: once through `symlink_metadata`
//! (the entry itself) and once through `metadata` (following symlinks).
//! A symlink whose target is gone classifies as `NotFound` on the second
//! look, which is how hanging symlinks are counted.

use crate::stats::Stats;
use std::fs::FileType;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// POSIX file kinds as the clone engine distinguishes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Dir,
    Symlink,
    Regular,
    Block,
    Char,
    Fifo,
    Socket,
    Other,
    /// stat failed with a not-found class (hanging symlink target)
    NotFound,
}

impl FileKind {
    /// Classify a `std::fs::FileType`.
    pub fn from_file_type(ft: FileType) -> Self {
        if ft.is_dir() {
            Self::Dir
        } else if ft.is_symlink() {
            Self::Symlink
        } else if ft.is_file() {
            Self::Regular
        } else if ft.is_block_device() {
            Self::Block
        } else if ft.is_char_device() {
            Self::Char
        } else if ft.is_fifo() {
            Self::Fifo
        } else if ft.is_socket() {
            Self::Socket
        } else {
            Self::Other
        }
    }
}

/// Both views of one directory entry.
#[derive(Debug, Clone, Copy)]
pub struct Classified {
    /// kind of the entry itself (symlink status, does not follow)
    pub sl_kind: FileKind,
    /// kind of the target after following symlinks
    pub targ_kind: FileKind,
}

/// Classify `path` from both sides. Returns `None` when even
/// `symlink_metadata` fails (the walk error counter is the caller's job).
pub fn classify(path: &Path) -> Option<Classified> {
    let sl_meta = std::fs::symlink_metadata(path).ok()?;
    let sl_kind = FileKind::from_file_type(sl_meta.file_type());

    let targ_kind = match std::fs::metadata(path) {
        Ok(meta) => FileKind::from_file_type(meta.file_type()),
        Err(_) => FileKind::NotFound,
    };

    Some(Classified { sl_kind, targ_kind })
}

/// Increment the per-kind counters for one classified entry.
pub fn update_stats(cl: Classified, hidden: bool, stats: &mut Stats) {
    if hidden {
        stats.num_hidden += 1;
    }
    if cl.sl_kind == FileKind::Symlink {
        match cl.targ_kind {
            FileKind::Dir => stats.num_sym2dir += 1,
            FileKind::Regular => stats.num_sym2reg += 1,
            FileKind::Block => stats.num_sym2block += 1,
            FileKind::Char => stats.num_sym2char += 1,
            FileKind::NotFound => stats.num_sym_hang += 1,
            _ => stats.num_sym_other += 1,
        }
        return;
    }
    match cl.targ_kind {
        FileKind::Dir => stats.num_dir += 1,
        FileKind::Symlink => stats.num_sym_hang += 1,
        FileKind::Regular => stats.num_regular += 1,
        FileKind::Block => stats.num_block += 1,
        FileKind::Char => stats.num_char += 1,
        FileKind::Fifo => stats.num_fifo += 1,
        FileKind::Socket => stats.num_socket += 1,
        _ => stats.num_other += 1,
    }
}
