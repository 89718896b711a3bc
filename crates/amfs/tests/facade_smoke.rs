//! Exercises the demo binary's command layer against a real engine backed
//! by a temp directory, without going through a subprocess.

use amfs_core::config::Config;
use amfs_core::Engine;

fn engine_in(dir: &std::path::Path) -> Engine {
    let config = Config {
        data_dir: dir.join("data"),
        scratch_dir: dir.join("scratch"),
        sync_listen: "127.0.0.1:0".to_string(),
        sync_unix_socket: None,
        log_level: "off".to_string(),
    };
    Engine::open(&config).unwrap()
}

#[path = "../src/commands.rs"]
mod commands;

#[test]
fn write_then_cat_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());

    commands::write(&engine, "note.txt", "hello amfs").unwrap();
    commands::stat(&engine, "note.txt").unwrap();
    commands::cat(&engine, "note.txt").unwrap();
}

#[test]
fn mkdir_ls_mv_rm_flow() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());

    commands::mkdir(&engine, "journal/2026", 0o755).unwrap();
    commands::write(&engine, "journal/2026/a.txt", "one").unwrap();
    commands::ls(&engine, "journal/2026").unwrap();

    commands::mv(&engine, "journal/2026/a.txt", "journal/2026/b.txt").unwrap();
    assert!(commands::cat(&engine, "journal/2026/a.txt").is_err());
    commands::cat(&engine, "journal/2026/b.txt").unwrap();

    commands::rm(&engine, "journal/2026/b.txt").unwrap();
    assert!(commands::cat(&engine, "journal/2026/b.txt").is_err());
}

#[test]
fn handle_prints_escape_hatch_form() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());

    commands::write(&engine, "f", "x").unwrap();
    commands::handle(&engine, "f").unwrap();
}
