//! Per-run statistics
//!
//! Every recoverable failure in the clone engine lands in a counter here
//! instead of an error value, so one unreadable attribute never aborts a
//! scan of a million nodes. The summary printer mirrors the counter layout:
//! scan counters always, regular-file transfer counters when at least one
//! transfer was attempted, dereference/prune detail at the second
//! `--statistics` level.

use humansize::{format_size, BINARY};

/// Error classes observed while reading a source regular file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceClass {
    Eacces,
    Eperm,
    Eio,
    Enodata,
    /// ENOENT, ENODEV or ENXIO: the attribute vanished mid-scan
    Vanished,
    Other,
}

impl SourceClass {
    /// Map a raw errno to its source-side class.
    pub fn from_errno(err: i32) -> Self {
        match err {
            libc::EACCES => Self::Eacces,
            libc::EPERM => Self::Eperm,
            libc::EIO => Self::Eio,
            libc::ENODATA => Self::Enodata,
            libc::ENOENT | libc::ENODEV | libc::ENXIO => Self::Vanished,
            _ => Self::Other,
        }
    }
}

/// Error classes observed while writing to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestClass {
    Eacces,
    Eperm,
    Eio,
    Other,
}

impl DestClass {
    /// Map a raw errno to its destination-side class.
    pub fn from_errno(err: i32) -> Self {
        match err {
            libc::EACCES => Self::Eacces,
            libc::EPERM => Self::Eperm,
            libc::EIO => Self::Eio,
            _ => Self::Other,
        }
    }
}

/// Counters accumulated over a whole clone run.
#[derive(Debug, Default, Clone)]
pub struct Stats {
    // source scan counters
    pub num_dir: u64,
    pub num_regular: u64,
    pub num_sym2dir: u64,
    pub num_sym2reg: u64,
    pub num_sym2block: u64,
    pub num_sym2char: u64,
    pub num_sym_other: u64,
    pub num_sym_hang: u64,
    pub num_block: u64,
    pub num_char: u64,
    pub num_fifo: u64,
    pub num_socket: u64,
    pub num_other: u64,
    pub num_hidden: u64,
    pub num_hidden_skipped: u64,
    pub num_excluded: u64,
    pub num_excluded_by_filename: u64,
    pub num_derefed: u64,
    pub num_error: u64,
    /// deepest iterator depth observed (1 = direct child of the source root)
    pub max_depth_seen: u64,

    // destination counters
    pub num_dir_d_success: u64,
    pub num_dir_d_exists: u64,
    pub num_dir_d_fail: u64,
    pub num_sym_d_success: u64,
    pub num_sym_d_dangling: u64,
    pub num_mknod_d_success: u64,
    pub num_mknod_d_eacces: u64,
    pub num_mknod_d_eperm: u64,
    pub num_mknod_d_e_other: u64,

    // regular-file transfer counters
    pub num_reg_tries: u64,
    pub num_reg_success: u64,
    pub num_reg_s_at_reglen: u64,
    pub num_reg_s_eacces: u64,
    pub num_reg_s_eperm: u64,
    pub num_reg_s_eio: u64,
    pub num_reg_s_enodata: u64,
    pub num_reg_s_enoent_enodev_enxio: u64,
    pub num_reg_s_eagain: u64,
    pub num_reg_s_timeout: u64,
    pub num_reg_s_e_other: u64,
    pub num_reg_d_eacces: u64,
    pub num_reg_d_eperm: u64,
    pub num_reg_d_eio: u64,
    pub num_reg_d_e_other: u64,
    pub num_reg_d_short_write: u64,
    pub bytes_copied: u64,

    // cache / prune counters
    pub num_cached_nodes: u64,
    pub num_pruned_kept: u64,
    pub num_prune_sym_outside: u64,
    pub num_prune_targ_missing: u64,
    pub num_prune_targ_path_err: u64,

    // --extra verification counters
    pub num_dst_entries: u64,
    pub num_dst_dangling_sym: u64,
}

impl Stats {
    /// Record a source-side regular-file error class.
    pub fn count_source(&mut self, class: SourceClass) {
        match class {
            SourceClass::Eacces => self.num_reg_s_eacces += 1,
            SourceClass::Eperm => self.num_reg_s_eperm += 1,
            SourceClass::Eio => self.num_reg_s_eio += 1,
            SourceClass::Enodata => self.num_reg_s_enodata += 1,
            SourceClass::Vanished => self.num_reg_s_enoent_enodev_enxio += 1,
            SourceClass::Other => self.num_reg_s_e_other += 1,
        }
    }

    /// Record a destination-side regular-file error class.
    pub fn count_dest(&mut self, class: DestClass) {
        match class {
            DestClass::Eacces => self.num_reg_d_eacces += 1,
            DestClass::Eperm => self.num_reg_d_eperm += 1,
            DestClass::Eio => self.num_reg_d_eio += 1,
            DestClass::Other => self.num_reg_d_e_other += 1,
        }
    }

    /// Record a freshly observed iterator depth.
    pub fn note_depth(&mut self, depth: u64) {
        if depth > self.max_depth_seen {
            self.max_depth_seen = depth;
        }
    }

    /// Print the summary. `level` is the number of `--statistics` flags;
    /// `with_destination` is false under `--no-dst`.
    pub fn print_summary(&self, level: u8, with_destination: bool) {
        println!("Number of regular files: {}", self.num_regular);
        println!("Number of directories: {}", self.num_dir);
        println!("Number of symlinks to directories: {}", self.num_sym2dir);
        println!("Number of symlinks to regular files: {}", self.num_sym2reg);
        println!(
            "Number of symlinks to block device nodes: {}",
            self.num_sym2block
        );
        println!(
            "Number of symlinks to char device nodes: {}",
            self.num_sym2char
        );
        println!("Number of symlinks to others: {}", self.num_sym_other);
        println!(
            "Number of hanging symlinks: {} [may be resolved later in scan]",
            self.num_sym_hang
        );
        println!(
            "Number of hidden files skipped: {}",
            self.num_hidden_skipped
        );
        println!("Number of block device nodes: {}", self.num_block);
        println!("Number of char device nodes: {}", self.num_char);
        println!("Number of fifo_s: {}", self.num_fifo);
        println!("Number of sockets: {}", self.num_socket);
        println!("Number of other file types: {}", self.num_other);
        println!(
            "Number of filenames starting with '.': {}",
            self.num_hidden
        );
        if with_destination {
            println!(
                "Number of dst created directories: {}",
                self.num_dir_d_success
            );
            println!("Number of dst created symlinks: {}", self.num_sym_d_success);
        }
        println!("Number of files excluded: {}", self.num_excluded);
        println!(
            "Number of files excluded by filename: {}",
            self.num_excluded_by_filename
        );
        println!("Maximum depth of source scan: {}", self.max_depth_seen);
        println!("Number of scan errors detected: {}", self.num_error);

        if self.num_reg_tries > 0 {
            println!("\n>> Following associated with clone/copy of regular files");
            println!("Number of attempts to clone: {}", self.num_reg_tries);
            println!("Number of clone successes: {}", self.num_reg_success);
            println!(
                "Number of bytes cloned: {}",
                format_size(self.bytes_copied, BINARY)
            );
            println!("Number of source EACCES errors: {}", self.num_reg_s_eacces);
            println!("Number of source EPERM errors: {}", self.num_reg_s_eperm);
            println!("Number of source EIO errors: {}", self.num_reg_s_eio);
            println!(
                "Number of source ENODATA errors: {}",
                self.num_reg_s_enodata
            );
            println!(
                "Number of source ENOENT, ENODEV or ENXIO errors: {}",
                self.num_reg_s_enoent_enodev_enxio
            );
            println!("Number of source EAGAIN errors: {}", self.num_reg_s_eagain);
            println!("Number of source poll timeouts: {}", self.num_reg_s_timeout);
            println!("Number of source other errors: {}", self.num_reg_s_e_other);
            println!("Number of dst EACCES errors: {}", self.num_reg_d_eacces);
            println!("Number of dst EPERM errors: {}", self.num_reg_d_eperm);
            println!("Number of dst EIO errors: {}", self.num_reg_d_eio);
            println!("Number of dst other errors: {}", self.num_reg_d_e_other);
            println!(
                "Number of files at reglen or longer: {}",
                self.num_reg_s_at_reglen
            );
        }

        if level > 1 {
            println!("\n>> Extra detail");
            println!("Number of symlinks dereferenced: {}", self.num_derefed);
            println!("Number of nodes cached: {}", self.num_cached_nodes);
            println!("Number of nodes kept by prune: {}", self.num_pruned_kept);
            println!(
                "Number of prune symlink targets outside source: {}",
                self.num_prune_sym_outside
            );
            println!(
                "Number of prune symlink targets not found: {}",
                self.num_prune_targ_missing
            );
            println!(
                "Number of prune symlink target path errors: {}",
                self.num_prune_targ_path_err
            );
            println!(
                "Number of dst directories already existing: {}",
                self.num_dir_d_exists
            );
            println!(
                "Number of dst directory create failures: {}",
                self.num_dir_d_fail
            );
            println!("Number of dst short writes: {}", self.num_reg_d_short_write);
            println!(
                "Number of dst symlinks created dangling: {}",
                self.num_sym_d_dangling
            );
            println!(
                "Number of dst mknod successes: {}",
                self.num_mknod_d_success
            );
            println!(
                "Number of dst mknod EACCES/EPERM/other errors: {}/{}/{}",
                self.num_mknod_d_eacces, self.num_mknod_d_eperm, self.num_mknod_d_e_other
            );
            if self.num_dst_entries > 0 {
                println!(
                    "Number of dst entries verified: {}",
                    self.num_dst_entries
                );
                println!(
                    "Number of dst dangling symlinks: {}",
                    self.num_dst_dangling_sym
                );
            }
        }
    }
}
