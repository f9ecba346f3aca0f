//! Runs the built probe as a child process: `main_arena` is only reachable
//! from a process's main thread, which libtest does not give us.

use assert_cmd::Command;
use mallocprobe::{
    layout::LayoutGeneration,
    os::{dl, maps},
    version::LibcVersion,
    ProbeReport,
};
use predicates::prelude::*;

fn probe(envs: &[(&str, &str)]) -> Command {
    let mut cmd = Command::cargo_bin("mallocprobe").unwrap();
    cmd.env_remove("GLIBC_TUNABLES")
        .env_remove("MALLOCPROBE_FORMAT")
        .env_remove("MALLOCPROBE_MAX_SCAN_PAGES")
        .env("RUST_LOG", "warn")
        .envs(envs.iter().copied());
    cmd
}

fn json_report(envs: &[(&str, &str)]) -> ProbeReport {
    let mut envs = envs.to_vec();
    envs.push(("MALLOCPROBE_FORMAT", "json"));
    let output = probe(&envs).output().unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    serde_json::from_str(stdout.trim_end()).unwrap()
}

fn host_generation() -> LayoutGeneration {
    LibcVersion::from_runtime().generation()
}

#[test]
fn prints_one_compact_line() {
    let output = probe(&[]).assert().success().get_output().clone();
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.ends_with("}\n"), "{stdout:?}");
    assert_eq!(stdout.lines().count(), 1);

    let version = LibcVersion::from_runtime();
    let prefix = format!("{{\"libc_version\": {},\"main_arena_offset\": 0x", version.raw);
    assert!(stdout.starts_with(&prefix), "{stdout:?}");
}

#[test]
fn arena_offset_lands_in_the_writable_data_of_libc() {
    let report = json_report(&[]);
    assert!(report.main_arena_offset > 0);

    // The offset is ASLR-independent, so it can be checked against our own
    // copy of the same library.
    let anchor = dl::symbol_address(c"malloc").unwrap();
    let libc = dl::object_containing(anchor).unwrap();
    let arena = libc.base + report.main_arena_offset as usize;
    let mapping = maps::self_maps()
        .unwrap()
        .into_iter()
        .find(|m| m.range.contains(&arena))
        .expect("arena address is mapped");
    assert!(mapping.readable() && mapping.writable(), "{mapping:?}");
    assert_eq!(dl::object_containing(arena).map(|o| o.base), Some(libc.base));
}

#[test]
fn offset_is_stable_across_runs() {
    let first = json_report(&[]);
    let second = json_report(&[]);
    assert_eq!(first, second);
}

#[test]
fn cache_follows_the_tunable() {
    if host_generation() == LayoutGeneration::Classic {
        return;
    }
    assert!(json_report(&[]).tcache_enable);
    let off = json_report(&[("GLIBC_TUNABLES", "glibc.malloc.tcache_count=0")]);
    assert!(!off.tcache_enable);
}

#[test]
fn exhausted_scan_budget_fails_loudly() {
    probe(&[("MALLOCPROBE_MAX_SCAN_PAGES", "1")])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("no ELF header"));
}
