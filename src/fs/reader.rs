//! Bounded regular-file reader
//!
//! sysfs attributes lie about their size in `stat` and some block forever on
//! `read`, so the reader never trusts metadata and never blocks without a
//! bound: contents are pulled in 1024-byte chunks up to `reglen`, and with
//! `--wait=MS` the descriptor is opened non-blocking and EAGAIN is absorbed
//! by a single-fd poll with that timeout.
//!
//! The reader never returns an error. Every failure maps to a counter in
//! [`Stats`] and the caller either gets bytes (possibly zero of them) plus
//! recovered mode bits, or `None` when the attribute vanished mid-scan.

use crate::stats::{SourceClass, Stats};
use std::fs::OpenOptions;
use std::io::Read;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use tracing::debug;

/// Re-read chunk size; a read shorter than this ends the loop.
const CHUNK: usize = 1024;

/// What one bounded read produced.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    /// up to `reglen` bytes of content (empty on timeout or source error)
    pub contents: Vec<u8>,
    /// st_mode of the source file
    pub mode: u32,
    /// the very first read returned 0 bytes
    pub found_nothing: bool,
}

/// Read up to `reglen` bytes from `path`.
///
/// `fallback_mode` is the mode the scanner already obtained via
/// `symlink_metadata`; it is used when `open` fails in a way that still
/// leaves the file representable. Returns `None` only when the file
/// vanished (nothing left to represent).
pub fn read_bounded(
    path: &Path,
    reglen: u32,
    wait_ms: Option<u32>,
    fallback_mode: u32,
    stats: &mut Stats,
) -> Option<ReadOutcome> {
    stats.num_reg_tries += 1;

    let nonblock = wait_ms.is_some() && reglen > 0;
    let mut opts = OpenOptions::new();
    opts.read(true);
    if nonblock {
        opts.custom_flags(libc::O_NONBLOCK);
    }

    let file = match opts.open(path) {
        Ok(f) => f,
        Err(e) => {
            let err = e.raw_os_error().unwrap_or(0);
            let class = SourceClass::from_errno(err);
            stats.count_source(class);
            if class == SourceClass::Eacces {
                // sysfs has write-only attributes whose open is denied but
                // whose mode bits are still visible via stat
                if let Ok(meta) = std::fs::metadata(path) {
                    return Some(ReadOutcome {
                        contents: Vec::new(),
                        mode: meta.mode(),
                        found_nothing: false,
                    });
                }
                // stat also failed; fall through to the fallback-mode path
            }
            if class == SourceClass::Vanished {
                return None;
            }
            return Some(ReadOutcome {
                contents: Vec::new(),
                mode: fallback_mode,
                found_nothing: false,
            });
        }
    };

    let mode = match file.metadata() {
        Ok(meta) => meta.mode(),
        Err(_) => {
            // not expected once open succeeded
            stats.count_source(SourceClass::Other);
            fallback_mode
        }
    };

    if reglen == 0 {
        return Some(ReadOutcome {
            contents: Vec::new(),
            mode,
            found_nothing: false,
        });
    }

    let reglen = reglen as usize;
    let mut contents = vec![0u8; reglen];
    let mut total = 0usize;
    let mut found_nothing = false;
    let mut file = file;

    while total < reglen {
        let want = CHUNK.min(reglen - total);
        match file.read(&mut contents[total..total + want]) {
            Ok(0) => {
                if total == 0 {
                    found_nothing = true;
                }
                break;
            }
            Ok(n) => {
                total += n;
                if n < want {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                stats.num_reg_s_eagain += 1;
                match poll_readable(file.as_raw_fd(), wait_ms) {
                    PollOutcome::Ready => continue,
                    PollOutcome::TimedOut => {
                        stats.num_reg_s_timeout += 1;
                        debug!(path = %path.display(), "timed out waiting for this file");
                        contents.clear();
                        return Some(ReadOutcome {
                            contents,
                            mode,
                            found_nothing: false,
                        });
                    }
                    PollOutcome::Failed => {
                        stats.count_source(SourceClass::Other);
                        contents.clear();
                        return Some(ReadOutcome {
                            contents,
                            mode,
                            found_nothing: false,
                        });
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                stats.count_source(SourceClass::from_errno(e.raw_os_error().unwrap_or(0)));
                contents.clear();
                return Some(ReadOutcome {
                    contents,
                    mode,
                    found_nothing: false,
                });
            }
        }
    }

    if total >= reglen {
        stats.num_reg_s_at_reglen += 1;
    }
    contents.truncate(total);
    Some(ReadOutcome {
        contents,
        mode,
        found_nothing,
    })
}

enum PollOutcome {
    Ready,
    TimedOut,
    /// poll itself failed or reported POLLERR (promoted to EPROTO)
    Failed,
}

fn poll_readable(fd: i32, wait_ms: Option<u32>) -> PollOutcome {
    let Some(ms) = wait_ms else {
        // EAGAIN without --wait: nothing to suspend on
        return PollOutcome::Failed;
    };
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let r = unsafe { libc::poll(&mut pfd, 1, ms as libc::c_int) };
    if r == 0 {
        PollOutcome::TimedOut
    } else if r > 0 {
        if pfd.revents & libc::POLLIN != 0 {
            PollOutcome::Ready
        } else {
            // POLLERR and friends promote to EPROTO
            PollOutcome::Failed
        }
    } else {
        PollOutcome::Failed
    }
}
