//! Clone engine
//!
//! The orchestrator picks the pass structure: a single direct pass when
//! neither caching nor pruning was asked for, otherwise cache-scan →
//! (prune-propagate) → unroll. Every pass shares one [`WalkPolicy`] so
//! exclude and dereference matches are consumed exactly once per run, and
//! one [`Stats`] record that survives into the final report.

mod cache;
mod direct;
mod prune;
mod unroll;

use crate::config::CloneConfig;
use crate::error::{CloneError, Result};
use crate::stats::Stats;
use std::ffi::{OsStr, OsString};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Name of the pseudo-file injected into every dereference-synthesized
/// directory; its content is the canonical target path plus a newline.
pub const SYMLINK_TARGET_PSEUDO_FILE: &str = "0_source_symlink_target_path";

/// Nested dereference budget when `--max-depth` is inactive. The deref
/// vector is finite, so this only guards pathological link arrangements.
pub(crate) const DEREF_NEST_MAX: usize = 64;

/// Per-run working state shared by the scanners.
pub(crate) struct WalkPolicy {
    /// sorted canonical exclude paths; matches are removed
    exclude: Vec<PathBuf>,
    /// sorted leaf names excluded anywhere; never consumed
    excl_fn: Vec<OsString>,
    /// sorted canonical symlink paths to dereference; matches are removed
    deref: Vec<PathBuf>,
    /// sorted canonical prune anchors
    prune: Vec<PathBuf>,
    /// device id of the filesystem containing the source root
    pub root_dev: u64,
    /// at least one prune anchor matched during pass 1
    pub prune_matched: bool,
}

impl WalkPolicy {
    fn new(cfg: &CloneConfig, root_dev: u64) -> Self {
        Self {
            exclude: cfg.exclude.clone(),
            excl_fn: cfg.excl_fn.clone(),
            deref: cfg.deref.clone(),
            prune: cfg.prune.clone(),
            root_dev,
            prune_matched: false,
        }
    }

    /// Binary-search `path` in the exclude vector, removing it on a hit so
    /// the vector shrinks as the scan proceeds.
    pub(crate) fn take_exclude(&mut self, path: &Path) -> bool {
        match self.exclude.binary_search_by(|p| p.as_path().cmp(path)) {
            Ok(i) => {
                self.exclude.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Leaf-name exclusion, independent of location.
    pub(crate) fn match_excl_fn(&self, name: &OsStr) -> bool {
        self.excl_fn
            .binary_search_by(|n| n.as_os_str().cmp(name))
            .is_ok()
    }

    /// Consume-on-use dereference match.
    pub(crate) fn take_deref(&mut self, path: &Path) -> bool {
        match self.deref.binary_search_by(|p| p.as_path().cmp(path)) {
            Ok(i) => {
                self.deref.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Prune anchors match any number of times.
    pub(crate) fn match_prune(&self, path: &Path) -> bool {
        self.prune
            .binary_search_by(|p| p.as_path().cmp(path))
            .is_ok()
    }
}

/// What one clone run produced, beyond the files on disk.
#[derive(Debug)]
pub struct CloneOutcome {
    pub stats: Stats,
    pub scan_time: Duration,
    pub prune_time: Option<Duration>,
    pub unroll_time: Option<Duration>,
    pub elapsed: Duration,
}

/// Run a whole clone according to `cfg`.
pub fn run(cfg: &CloneConfig) -> Result<CloneOutcome> {
    let start = Instant::now();

    let root_meta = std::fs::metadata(&cfg.source).map_err(|e| CloneError::SourceRoot {
        path: cfg.source.clone(),
        source: e,
    })?;
    let mut stats = Stats::default();
    let mut policy = WalkPolicy::new(cfg, root_meta.dev());

    let scan_time;
    let mut prune_time = None;
    let mut unroll_time = None;

    if cfg.cache_level > 0 {
        info!(source = %cfg.source.display(), "cache scan (pass 1)");
        let t = Instant::now();
        let mut tree = cache::scan(cfg, &mut policy, &mut stats, root_meta.dev(), root_meta.mode())?;
        scan_time = t.elapsed();
        if cfg.extra {
            tree.check_invariants()?;
        }

        let filter = cfg.prune_take_all || policy.prune_matched;
        if filter {
            info!("prune propagation (pass 2)");
            let t = Instant::now();
            prune::propagate(&mut tree, cfg.prune_take_all, &mut stats)?;
            prune_time = Some(t.elapsed());
        } else if cfg.prune_active() {
            debug!("no prune anchor matched; keeping the whole tree");
        }

        if !cfg.no_dst {
            info!(destination = %cfg.destination.display(), "unroll");
            let t = Instant::now();
            unroll::run(&tree, cfg, filter, &mut stats)?;
            unroll_time = Some(t.elapsed());
        }
    } else {
        info!(source = %cfg.source.display(), "direct clone");
        let t = Instant::now();
        direct::run(cfg, &mut policy, &mut stats)?;
        scan_time = t.elapsed();
    }

    if cfg.extra && !cfg.no_dst {
        verify_destination(&cfg.destination, &mut stats);
    }

    Ok(CloneOutcome {
        stats,
        scan_time,
        prune_time,
        unroll_time,
        elapsed: start.elapsed(),
    })
}

/// `--extra`: re-walk the finished destination, counting entries and
/// symlinks that do not resolve there.
fn verify_destination(dst: &Path, stats: &mut Stats) {
    for item in WalkDir::new(dst).min_depth(1).follow_links(false) {
        let entry = match item {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "destination verify walk error");
                continue;
            }
        };
        stats.num_dst_entries += 1;
        if entry.file_type().is_symlink() && std::fs::metadata(entry.path()).is_err() {
            stats.num_dst_dangling_sym += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliArgs, CloneConfig};
    use clap::Parser;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn run_cli(extra_args: &[&str], src: &Path, dst: &Path) -> CloneOutcome {
        let mut argv = vec![
            "pseudoclone".to_string(),
            format!("--source={}", src.display()),
            format!("--destination={}", dst.display()),
        ];
        argv.extend(extra_args.iter().map(|s| s.to_string()));
        let args = CliArgs::parse_from(argv);
        let cfg = CloneConfig::from_cli(&args).unwrap();
        run(&cfg).unwrap()
    }

    /// attr = "hello\n", link -> attr, sub/attr2 = 1024 x 'A'
    fn fixture_a() -> TempDir {
        let td = TempDir::new().unwrap();
        std::fs::write(td.path().join("attr"), b"hello\n").unwrap();
        symlink("attr", td.path().join("link")).unwrap();
        std::fs::create_dir(td.path().join("sub")).unwrap();
        std::fs::write(td.path().join("sub/attr2"), vec![b'A'; 1024]).unwrap();
        td
    }

    #[test]
    fn test_basic_direct_clone() {
        let src = fixture_a();
        let work = TempDir::new().unwrap();
        let dst = work.path().join("out1");

        let outcome = run_cli(&[], src.path(), &dst);

        assert_eq!(std::fs::read(dst.join("attr")).unwrap(), b"hello\n");
        assert_eq!(std::fs::read_link(dst.join("link")).unwrap(), Path::new("attr"));
        let attr2 = std::fs::read(dst.join("sub/attr2")).unwrap();
        assert_eq!(attr2.len(), 256);
        assert!(attr2.iter().all(|&b| b == b'A'));
        assert_eq!(outcome.stats.num_reg_s_at_reglen, 1);
        assert_eq!(outcome.stats.num_sym_d_success, 1);
    }

    #[test]
    fn test_exclude_drops_subtree() {
        let src = fixture_a();
        let work = TempDir::new().unwrap();
        let dst = work.path().join("out1");
        let pat = format!("--exclude={}/sub", src.path().display());

        let outcome = run_cli(&[&pat], src.path(), &dst);

        assert!(!dst.join("sub").exists());
        assert!(dst.join("attr").exists());
        assert_eq!(outcome.stats.num_excluded, 1);
    }

    #[test]
    fn test_excl_fn_drops_by_basename() {
        let src = fixture_a();
        let work = TempDir::new().unwrap();
        let dst = work.path().join("out1");

        let outcome = run_cli(&["--excl-fn=attr2"], src.path(), &dst);

        assert!(dst.join("sub").is_dir());
        assert!(!dst.join("sub/attr2").exists());
        assert_eq!(outcome.stats.num_excluded_by_filename, 1);
    }

    #[test]
    fn test_prune_keeps_spine_and_subtree() {
        let td = TempDir::new().unwrap();
        std::fs::create_dir_all(td.path().join("root/a/b/c")).unwrap();
        std::fs::write(td.path().join("root/a/b/c/leaf"), b"X").unwrap();
        std::fs::create_dir(td.path().join("root/a/other")).unwrap();
        std::fs::write(td.path().join("root/a/other/irrelevant"), b"Y").unwrap();
        let work = TempDir::new().unwrap();
        let dst = work.path().join("out");
        let prune = format!("--prune={}/root/a/b", td.path().display());

        run_cli(&[&prune, "--cache"], td.path(), &dst);

        assert!(dst.join("root/a/b/c/leaf").is_file());
        assert_eq!(std::fs::read(dst.join("root/a/b/c/leaf")).unwrap(), b"X");
        assert!(!dst.join("root/a/other").exists());
    }

    #[test]
    fn test_prune_follows_symlink_into_sibling() {
        let td = TempDir::new().unwrap();
        std::fs::create_dir_all(td.path().join("block/sda")).unwrap();
        std::fs::write(td.path().join("block/sda/size"), b"1024\n").unwrap();
        std::fs::create_dir(td.path().join("dev")).unwrap();
        symlink("../block/sda", td.path().join("dev/sda")).unwrap();
        std::fs::create_dir(td.path().join("junk")).unwrap();
        std::fs::write(td.path().join("junk/noise"), b"z").unwrap();
        let work = TempDir::new().unwrap();
        let dst = work.path().join("out");
        let prune = format!("--prune={}/dev", td.path().display());

        run_cli(&[&prune], td.path(), &dst);

        // the kept symlink pulled its target subtree in, spine included
        assert_eq!(
            std::fs::read_link(dst.join("dev/sda")).unwrap(),
            Path::new("../block/sda")
        );
        assert!(dst.join("block/sda/size").is_file());
        assert!(!dst.join("junk").exists());
    }

    #[test]
    fn test_deref_direct_mode() {
        let td = TempDir::new().unwrap();
        std::fs::create_dir_all(td.path().join("block/sda")).unwrap();
        std::fs::write(td.path().join("block/sda/size"), b"1024\n").unwrap();
        std::fs::create_dir(td.path().join("dev")).unwrap();
        symlink("../block/sda", td.path().join("dev/sda")).unwrap();
        let work = TempDir::new().unwrap();
        let dst = work.path().join("out");
        let deref = format!("--dereference={}/dev/sda", td.path().display());

        run_cli(&[&deref], td.path(), &dst);

        assert!(dst.join("dev/sda").is_dir());
        assert_eq!(std::fs::read(dst.join("dev/sda/size")).unwrap(), b"1024\n");
        let pseudo =
            std::fs::read_to_string(dst.join("dev/sda").join(SYMLINK_TARGET_PSEUDO_FILE))
                .unwrap();
        let canon = td.path().join("block/sda").canonicalize().unwrap();
        assert_eq!(pseudo.lines().next().unwrap(), canon.to_str().unwrap());
    }

    #[test]
    fn test_deref_cache_mode_matches_direct() {
        let td = TempDir::new().unwrap();
        std::fs::create_dir_all(td.path().join("block/sda")).unwrap();
        std::fs::write(td.path().join("block/sda/size"), b"1024\n").unwrap();
        std::fs::create_dir(td.path().join("dev")).unwrap();
        symlink("../block/sda", td.path().join("dev/sda")).unwrap();
        let work = TempDir::new().unwrap();
        let dst = work.path().join("out");
        let deref = format!("--dereference={}/dev/sda", td.path().display());

        let outcome = run_cli(&[&deref, "--cache", "--cache"], td.path(), &dst);

        assert!(dst.join("dev/sda").is_dir());
        assert_eq!(std::fs::read(dst.join("dev/sda/size")).unwrap(), b"1024\n");
        let pseudo =
            std::fs::read_to_string(dst.join("dev/sda").join(SYMLINK_TARGET_PSEUDO_FILE))
                .unwrap();
        assert!(pseudo.ends_with('\n'));
        assert_eq!(outcome.stats.num_derefed, 1);
    }

    #[test]
    fn test_deref_target_outside_source_stays_symlink() {
        let td = TempDir::new().unwrap();
        let src_dir = td.path().join("src");
        std::fs::create_dir(&src_dir).unwrap();
        std::fs::write(td.path().join("outside"), b"x").unwrap();
        symlink("../outside", src_dir.join("esc")).unwrap();
        let work = TempDir::new().unwrap();
        let dst = work.path().join("out");
        let deref = format!("--dereference={}/esc", src_dir.display());

        run_cli(&[&deref], &src_dir, &dst);

        assert!(std::fs::symlink_metadata(dst.join("esc"))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[test]
    fn test_cache_mode_equals_direct_output() {
        let src = fixture_a();
        let work = TempDir::new().unwrap();
        let direct_dst = work.path().join("direct");
        let cached_dst = work.path().join("cached");

        run_cli(&[], src.path(), &direct_dst);
        run_cli(&["--cache"], src.path(), &cached_dst);

        for rel in ["attr", "sub/attr2"] {
            assert_eq!(
                std::fs::read(direct_dst.join(rel)).unwrap(),
                std::fs::read(cached_dst.join(rel)).unwrap(),
                "{rel} differs between modes"
            );
        }
        assert_eq!(
            std::fs::read_link(direct_dst.join("link")).unwrap(),
            std::fs::read_link(cached_dst.join("link")).unwrap()
        );
    }

    #[test]
    fn test_max_depth_limits_output() {
        let td = TempDir::new().unwrap();
        std::fs::create_dir_all(td.path().join("l1/l2/l3")).unwrap();
        std::fs::write(td.path().join("l1/top"), b"t").unwrap();
        std::fs::write(td.path().join("l1/l2/mid"), b"m").unwrap();
        std::fs::write(td.path().join("l1/l2/l3/deep"), b"d").unwrap();
        let work = TempDir::new().unwrap();
        let dst = work.path().join("out");

        run_cli(&["--max-depth=2"], td.path(), &dst);

        assert!(dst.join("l1/top").is_file());
        assert!(dst.join("l1/l2").is_dir());
        assert!(!dst.join("l1/l2/mid").exists());
        assert!(!dst.join("l1/l2/l3").exists());
    }

    #[test]
    fn test_hidden_skipped_by_default() {
        let td = TempDir::new().unwrap();
        std::fs::write(td.path().join(".secret"), b"s").unwrap();
        std::fs::write(td.path().join("plain"), b"p").unwrap();
        let work = TempDir::new().unwrap();

        let dst = work.path().join("out");
        let outcome = run_cli(&[], td.path(), &dst);
        assert!(!dst.join(".secret").exists());
        assert!(dst.join("plain").is_file());
        assert_eq!(outcome.stats.num_hidden_skipped, 1);

        let dst2 = work.path().join("out2");
        run_cli(&["--hidden"], td.path(), &dst2);
        assert!(dst2.join(".secret").is_file());
    }

    #[test]
    fn test_no_dst_only_scans() {
        let src = fixture_a();
        let args = CliArgs::parse_from([
            "pseudoclone",
            &format!("--source={}", src.path().display()),
            "--no-dst",
        ]);
        let cfg = CloneConfig::from_cli(&args).unwrap();
        let outcome = run(&cfg).unwrap();

        assert_eq!(outcome.stats.num_regular, 2);
        assert_eq!(outcome.stats.num_dir, 1);
        assert_eq!(outcome.stats.num_sym2reg, 1);
        assert_eq!(outcome.stats.num_reg_tries, 0);
    }

    #[test]
    fn test_extra_verifies_destination() {
        let td = TempDir::new().unwrap();
        std::fs::write(td.path().join("attr"), b"a").unwrap();
        symlink("gone", td.path().join("dangle")).unwrap();
        let work = TempDir::new().unwrap();
        let dst = work.path().join("out");

        let outcome = run_cli(&["--extra"], td.path(), &dst);

        assert_eq!(outcome.stats.num_dst_entries, 2);
        assert_eq!(outcome.stats.num_dst_dangling_sym, 1);
        assert_eq!(outcome.stats.num_sym_d_dangling, 1);
    }

    #[test]
    fn test_missing_source_root_is_catastrophic() {
        let work = TempDir::new().unwrap();
        let src = work.path().join("src");
        std::fs::create_dir(&src).unwrap();
        let args = CliArgs::parse_from([
            "pseudoclone",
            &format!("--source={}", src.display()),
            &format!("--destination={}", work.path().join("out").display()),
        ]);
        let cfg = CloneConfig::from_cli(&args).unwrap();
        std::fs::remove_dir(&src).unwrap();

        match run(&cfg) {
            Err(CloneError::SourceRoot { .. }) => {}
            other => panic!("expected SourceRoot error, got {other:?}"),
        }
    }

    #[test]
    fn test_reglen_bound_holds_everywhere() {
        let td = TempDir::new().unwrap();
        std::fs::create_dir(td.path().join("d")).unwrap();
        for (i, size) in [10usize, 100, 500, 5000].iter().enumerate() {
            std::fs::write(td.path().join("d").join(format!("f{i}")), vec![b'x'; *size])
                .unwrap();
        }
        let work = TempDir::new().unwrap();
        let dst = work.path().join("out");

        run_cli(&["--reglen=64"], td.path(), &dst);

        for entry in WalkDir::new(&dst).min_depth(1) {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                assert!(entry.metadata().unwrap().len() <= 64);
            }
        }
    }
}
