//! Performance benchmarks for pseudoclone
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pseudoclone::fs::paths::{path_contains_canon, split_relative};
use pseudoclone::tree::{DirData, Node, NodeKind, RegData, Tree};
use std::path::Path;
use tempfile::TempDir;

fn bench_path_containment(c: &mut Criterion) {
    let hay = Path::new("/sys");
    let deep = Path::new("/sys/devices/pci0000:00/0000:00:1f.2/ata1/host0/target0:0:0/0:0:0:0");
    let foreign = Path::new("/proc/1/task/1/fdinfo/0");

    c.bench_function("path_contains_deep", |b| {
        b.iter(|| black_box(path_contains_canon(hay, deep)))
    });
    c.bench_function("path_contains_miss", |b| {
        b.iter(|| black_box(path_contains_canon(hay, foreign)))
    });
}

fn bench_split_relative(c: &mut Criterion) {
    let base = Path::new("/sys");
    let deep = Path::new("/sys/devices/pci0000:00/0000:00:1f.2/ata1/host0/target0:0:0/0:0:0:0");

    c.bench_function("split_relative_8_levels", |b| {
        b.iter(|| black_box(split_relative(deep, base).unwrap()))
    });
}

/// Build a tree shaped roughly like a sysfs class directory: wide fan-out,
/// a handful of attributes per node.
fn build_tree(dirs: usize, files_per_dir: usize) -> Tree {
    let mut tree = Tree::new(Path::new("/sys"), 1, 0o40555);
    for d in 0..dirs {
        let dir = Node::new(
            format!("dev{d}").into(),
            1,
            0o40755,
            NodeKind::Directory(DirData::default()),
        );
        let di = tree.insert_child(&[], dir).unwrap();
        for f in 0..files_per_dir {
            let file = Node::new(
                format!("attr{f}").into(),
                1,
                0o100444,
                NodeKind::Regular(RegData::default()),
            );
            tree.insert_child(&[di], file).unwrap();
        }
    }
    tree
}

fn bench_tree_insert(c: &mut Criterion) {
    c.bench_function("tree_insert_1000_nodes", |b| {
        b.iter(|| black_box(build_tree(100, 9)))
    });
}

fn bench_tree_reenter(c: &mut Criterion) {
    let tree = build_tree(500, 4);
    c.bench_function("tree_reenter", |b| {
        b.iter(|| {
            black_box(
                tree.reenter(&[], Path::new("/sys"), Path::new("/sys/dev250"))
                    .unwrap(),
            )
        })
    });
}

fn bench_cache_scan(c: &mut Criterion) {
    use clap::Parser;
    use pseudoclone::config::{CliArgs, CloneConfig};

    let src = TempDir::new().unwrap();
    for i in 0..50 {
        let sub = src.path().join(format!("dev{i}"));
        std::fs::create_dir(&sub).unwrap();
        for j in 0..10 {
            std::fs::write(sub.join(format!("attr{j}")), b"value\n").unwrap();
        }
    }

    let args = CliArgs::parse_from([
        "pseudoclone",
        &format!("--source={}", src.path().display()),
        "--no-dst",
        "--cache",
    ]);
    let cfg = CloneConfig::from_cli(&args).unwrap();

    c.bench_function("cache_scan_500_files", |b| {
        b.iter(|| black_box(pseudoclone::clone::run(&cfg).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_path_containment,
    bench_split_relative,
    bench_tree_insert,
    bench_tree_reenter,
    bench_cache_scan
);

criterion_main!(benches);
