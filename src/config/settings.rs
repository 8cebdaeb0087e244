//! CLI arguments and validated runtime configuration
//!
//! `CliArgs` is the raw clap surface; `CloneConfig::from_cli` turns it into
//! something the clone engine can trust: canonical source and destination,
//! expanded and containment-filtered exclude vector, validated dereference
//! and prune paths, and the defaulting rules around `--no-dst`.

use crate::error::{CloneError, Result};
use crate::fs::paths::path_contains_canon;
use clap::{ArgAction, Parser};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default source root.
const DEF_SOURCE: &str = "/sys";
/// Default destination root, used only when the source was also defaulted.
const DEF_DESTINATION: &str = "/tmp/sys";
/// Default maximum bytes cloned per regular file.
const DEF_REGLEN: u32 = 256;

/// Clone a Linux pseudo file system into a frozen on-disk snapshot
#[derive(Parser, Debug, Clone)]
#[command(name = "pseudoclone")]
#[command(version)]
#[command(about = "Clone Linux pseudo file systems (sysfs, procfs, ...) to a plain directory")]
#[command(long_about = r#"
By default this utility clones /sys to /tmp/sys. The resulting subtree is a
frozen snapshot that may be useful for later offline analysis. Hidden files
are skipped and symlinks are created, even if dangling. Only a bounded
prefix of each regular file is copied, because pseudo file systems do not
report usable sizes in stat(2).

Examples:
  pseudoclone                                    # /sys -> /tmp/sys
  pseudoclone -s /proc/acpi -d /tmp/acpi         # explicit source and destination
  pseudoclone --no-dst --statistics              # scan only, report counters
  pseudoclone --cache --prune=/sys/class/nvme    # keep one subtree (and its spine)
"#)]
pub struct CliArgs {
    /// Build the in-memory tree first; repeat to also cache regular file contents
    #[arg(long, action = ArgAction::Count)]
    pub cache: u8,

    /// Symlink to expand into a deep copy of its target (repeatable)
    #[arg(long = "dereference", value_name = "PATH")]
    pub dereference: Vec<PathBuf>,

    /// Clone destination (default /tmp/sys, only when the source is defaulted)
    #[arg(short = 'd', long, value_name = "DPATH")]
    pub destination: Option<PathBuf>,

    /// Glob pattern; matching files and directories are excluded (repeatable)
    #[arg(short = 'e', long, value_name = "PAT")]
    pub exclude: Vec<String>,

    /// Exclude entries by leaf name, anywhere in the tree (repeatable)
    #[arg(long = "excl-fn", value_name = "NAME")]
    pub excl_fn: Vec<String>,

    /// Extra consistency checks and post-clone destination verification
    #[arg(long)]
    pub extra: bool,

    /// Clone hidden files (default: ignore them)
    #[arg(short = 'H', long)]
    pub hidden: bool,

    /// Maximum depth of scan (0 means no limit)
    #[arg(short = 'm', long = "max-depth", value_name = "MAXD", default_value_t = 0)]
    pub max_depth: u32,

    /// Ignore the destination, just scan the source
    #[arg(short = 'D', long = "no-dst")]
    pub no_dst: bool,

    /// Clone may span multiple file systems (default: stay in the source's)
    #[arg(short = 'N', long = "no-xdev")]
    pub no_xdev: bool,

    /// Keep only the subtrees anchored at these paths; implies --cache (repeatable)
    #[arg(long, value_name = "PATH")]
    pub prune: Vec<PathBuf>,

    /// Maximum bytes cloned from each regular file
    #[arg(short = 'r', long, value_name = "RLEN", default_value_t = DEF_REGLEN)]
    pub reglen: u32,

    /// Clone source (default /sys)
    #[arg(short = 's', long, value_name = "SPATH")]
    pub source: Option<PathBuf>,

    /// Gather and output statistics; repeat for extra detail
    #[arg(short = 'S', long = "statistics", action = ArgAction::Count)]
    pub statistics: u8,

    /// Increase verbosity (repeatable)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Milliseconds to wait when a regular file read returns EAGAIN
    #[arg(short = 'w', long, value_name = "MS_R")]
    pub wait: Option<u32>,
}

/// Validated configuration driving one clone run.
#[derive(Debug, Clone)]
pub struct CloneConfig {
    /// canonical source root
    pub source: PathBuf,
    /// canonical destination root; unused under `--no-dst`
    pub destination: PathBuf,
    pub no_dst: bool,
    /// the destination directory was created by us, so nothing can pre-exist
    pub destin_all_new: bool,
    /// 0 = single pass, 1 = cache structure, 2 = cache contents too
    pub cache_level: u8,
    pub clone_hidden: bool,
    pub no_xdev: bool,
    /// 0 = unlimited
    pub max_depth: u32,
    pub reglen: u32,
    pub wait_ms: Option<u32>,
    pub extra: bool,
    pub stats_level: u8,
    /// canonical exclude paths, sorted and deduplicated
    pub exclude: Vec<PathBuf>,
    /// leaf names excluded anywhere, sorted
    pub excl_fn: Vec<OsString>,
    /// canonical symlink paths to dereference, sorted
    pub deref: Vec<PathBuf>,
    /// canonical prune anchors, sorted
    pub prune: Vec<PathBuf>,
    /// a prune anchor equals the source root: keep everything
    pub prune_take_all: bool,
    /// all of source/destination/no-dst/statistics were defaulted
    pub banner_eligible: bool,
}

impl CloneConfig {
    /// True when at least one prune anchor is active.
    pub fn prune_active(&self) -> bool {
        self.prune_take_all || !self.prune.is_empty()
    }

    /// Build and validate the runtime configuration.
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let source = match &args.source {
            Some(p) => {
                if !p.is_dir() {
                    return Err(CloneError::config(format!(
                        "source '{}' doesn't exist or is not a directory",
                        p.display()
                    )));
                }
                p.canonicalize()
                    .map_err(|e| CloneError::config(format!(
                        "cannot canonicalize source '{}': {e}",
                        p.display()
                    )))?
            }
            None => PathBuf::from(DEF_SOURCE),
        };

        if args.no_dst && args.destination.is_some() {
            return Err(CloneError::config(
                "--destination and --no-dst contradict, pick one",
            ));
        }

        let mut destin_all_new = false;
        let destination = if args.no_dst {
            PathBuf::new()
        } else {
            let d = match &args.destination {
                Some(d) => d.clone(),
                None => {
                    if args.source.is_some() {
                        return Err(CloneError::config(
                            "when --source is given, also give --destination (or --no-dst)",
                        ));
                    }
                    PathBuf::from(DEF_DESTINATION)
                }
            };
            if d.as_os_str().is_empty() {
                return Err(CloneError::config("destination is an empty string"));
            }
            resolve_destination(&d, &mut destin_all_new)?
        };

        if !args.no_dst && source == destination {
            return Err(CloneError::config(format!(
                "source and destination are both '{}'; that is not practical",
                source.display()
            )));
        }

        let excl_fn = validate_excl_fn(&args.excl_fn)?;
        let deref = resolve_deref(&args.dereference, &source)?;
        let (prune, prune_take_all) = resolve_prune(&args.prune, &source)?;
        let (exclude, destin_excluded) = expand_excludes(&args.exclude, &source, &destination)?;

        if !args.no_dst {
            check_containment_guards(
                &source,
                &destination,
                args.max_depth,
                &exclude,
                destin_excluded,
            )?;
        }

        let mut cache_level = args.cache;
        if (prune_take_all || !prune.is_empty()) && cache_level == 0 {
            debug!("--prune given without --cache; enabling --cache");
            cache_level = 1;
        }

        Ok(Self {
            source,
            destination,
            no_dst: args.no_dst,
            destin_all_new,
            cache_level,
            clone_hidden: args.hidden,
            no_xdev: args.no_xdev,
            max_depth: args.max_depth,
            reglen: args.reglen,
            wait_ms: args.wait,
            extra: args.extra,
            stats_level: args.statistics,
            exclude,
            excl_fn,
            deref,
            prune,
            prune_take_all,
            banner_eligible: args.source.is_none()
                && args.destination.is_none()
                && !args.no_dst
                && args.statistics == 0,
        })
    }
}

fn resolve_destination(d: &Path, destin_all_new: &mut bool) -> Result<PathBuf> {
    if d.exists() {
        if !d.is_dir() {
            return Err(CloneError::config(format!(
                "destination '{}' is not a directory",
                d.display()
            )));
        }
        return d.canonicalize().map_err(|e| {
            CloneError::config(format!("cannot canonicalize '{}': {e}", d.display()))
        });
    }
    let parent = d.parent().unwrap_or_else(|| Path::new("/"));
    if !parent.is_dir() {
        return Err(CloneError::config(format!(
            "'{}' needs to be an existing directory",
            parent.display()
        )));
    }
    std::fs::create_dir(d).map_err(|e| {
        CloneError::config(format!("cannot create destination '{}': {e}", d.display()))
    })?;
    *destin_all_new = true;
    d.canonicalize()
        .map_err(|e| CloneError::config(format!("cannot canonicalize '{}': {e}", d.display())))
}

fn validate_excl_fn(names: &[String]) -> Result<Vec<OsString>> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        if name.is_empty() || name.contains('/') {
            return Err(CloneError::config(format!(
                "--excl-fn='{name}' must be a bare filename without path separators"
            )));
        }
        out.push(OsString::from(name));
    }
    out.sort();
    out.dedup();
    Ok(out)
}

fn resolve_deref(paths: &[PathBuf], source: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::with_capacity(paths.len());
    for p in paths {
        let meta = std::fs::symlink_metadata(p).map_err(|e| {
            CloneError::config(format!("--dereference='{}': {e}", p.display()))
        })?;
        if !meta.file_type().is_symlink() {
            return Err(CloneError::config(format!(
                "--dereference='{}' is not a symlink",
                p.display()
            )));
        }
        // canonicalize the parent only; canonicalizing the whole path would
        // resolve the very symlink we want to address
        let parent = p.parent().unwrap_or_else(|| Path::new("/"));
        let file_name = p.file_name().ok_or_else(|| {
            CloneError::config(format!("--dereference='{}' has no filename", p.display()))
        })?;
        let canon = parent
            .canonicalize()
            .map_err(|e| CloneError::config(format!("--dereference='{}': {e}", p.display())))?
            .join(file_name);
        if !path_contains_canon(source, &canon) {
            return Err(CloneError::config(format!(
                "--dereference='{}' is not contained in the source",
                p.display()
            )));
        }
        out.push(canon);
    }
    out.sort();
    out.dedup();
    Ok(out)
}

fn resolve_prune(paths: &[PathBuf], source: &Path) -> Result<(Vec<PathBuf>, bool)> {
    let mut out = Vec::with_capacity(paths.len());
    let mut take_all = false;
    for p in paths {
        let canon = p
            .canonicalize()
            .map_err(|e| CloneError::config(format!("--prune='{}': {e}", p.display())))?;
        if canon == source {
            take_all = true;
            continue;
        }
        if !path_contains_canon(source, &canon) {
            return Err(CloneError::config(format!(
                "--prune='{}' is not contained in the source",
                p.display()
            )));
        }
        out.push(canon);
    }
    out.sort();
    out.dedup();
    Ok((out, take_all))
}

fn expand_excludes(
    patterns: &[String],
    source: &Path,
    destination: &Path,
) -> Result<(Vec<PathBuf>, bool)> {
    let mut out = Vec::new();
    let mut destin_excluded = false;
    for pat in patterns {
        let entries = glob::glob(pat)
            .map_err(|e| CloneError::config(format!("bad --exclude='{pat}': {e}")))?;
        let mut matched = 0usize;
        for entry in entries {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    debug!(pattern = %pat, error = %e, "exclude expansion error, skip");
                    continue;
                }
            };
            matched += 1;
            let canon = match path.canonicalize() {
                Ok(c) => c,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "exclude path rejected");
                    continue;
                }
            };
            if path_contains_canon(source, &canon) {
                if canon == *destination {
                    destin_excluded = true;
                }
                out.push(canon);
            } else {
                debug!(path = %canon.display(), "exclude ignored, not contained in source");
            }
        }
        if matched == 0 {
            warn!(pattern = %pat, "--exclude did not match any file, continue");
        }
    }
    out.sort();
    out.dedup();
    Ok((out, destin_excluded))
}

fn check_containment_guards(
    source: &Path,
    destination: &Path,
    max_depth: u32,
    exclude: &[PathBuf],
    destin_excluded: bool,
) -> Result<()> {
    if path_contains_canon(source, destination) {
        warn!("source contains destination, infinite recursion possible");
        if max_depth == 0 && exclude.is_empty() {
            return Err(CloneError::config(
                "source contains destination and neither --max-depth nor --exclude is active",
            ));
        }
        if !destin_excluded {
            warn!("probably best to --exclude the destination, will continue");
        }
    } else if path_contains_canon(destination, source) {
        warn!("strange: destination contains source, is infinite recursion possible?");
    }
    Ok(())
}
