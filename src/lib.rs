//! # pseudoclone - frozen snapshots of Linux pseudo file systems
//!
//! Normal CLI tools (find, tar, cp) have problems with sysfs and friends:
//! regular files there do not report usable sizes in `stat`, some reads
//! block indefinitely, some attributes refuse `open` but still expose
//! their mode bits, and symlinks criss-cross the tree in ways worth
//! preserving exactly. pseudoclone clones such a tree into an ordinary
//! directory so it can be inspected offline.
//!
//! ## Quick start
//!
//! ```no_run
//! use pseudoclone::clone;
//! use pseudoclone::config::{CliArgs, CloneConfig};
//! use clap::Parser;
//!
//! let args = CliArgs::parse_from([
//!     "pseudoclone",
//!     "--source=/sys/class/nvme",
//!     "--destination=/tmp/nvme",
//! ]);
//! let cfg = CloneConfig::from_cli(&args).unwrap();
//! let outcome = clone::run(&cfg).unwrap();
//! outcome.stats.print_summary(1, true);
//! ```
//!
//! ## Passes
//!
//! - **direct**: one pass, source entries are applied to the destination
//!   as the walker yields them.
//! - **cache** (`--cache`): pass 1 builds an in-memory tree; repeat the
//!   flag to also cache regular-file contents.
//! - **prune** (`--prune=PATH`, implies `--cache`): pass 2 marks the
//!   subtrees to keep, including those only reachable through symlinks.
//! - **unroll**: the marked tree is written out.

#![warn(clippy::all)]

pub mod clone;
pub mod config;
pub mod error;
pub mod fs;
pub mod stats;
pub mod tree;

// Re-export commonly used types
pub use clone::{CloneOutcome, SYMLINK_TARGET_PSEUDO_FILE};
pub use config::{CliArgs, CloneConfig};
pub use error::{CloneError, IoResultExt, Result};
pub use stats::Stats;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
