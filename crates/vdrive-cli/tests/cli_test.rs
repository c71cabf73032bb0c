//! E2E tests for the vdrive binary.
//!
//! Every invocation runs against an isolated content root and index directory
//! with HOME and the working directory pointed at scratch space, so no user
//! configuration leaks in.

use std::io::Write;
use std::process::{Command, Output, Stdio};

use vdrive_config::testing::TestEnvironment;

fn vdrive_cmd(env: &TestEnvironment) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_vdrive"));
    cmd.current_dir(&env.source_dir)
        .env("HOME", &env.source_dir)
        .env("VDRIVE_CONTENT_ROOT", &env.content_root)
        .env("VDRIVE_INDEX_DIR", &env.index_dir)
        .env("VDRIVE_NAME", env.drive_name())
        .env_remove("VDRIVE_LOG")
        .env_remove("RUST_LOG");
    cmd
}

fn vdrive(env: &TestEnvironment, args: &[&str]) -> Output {
    vdrive_cmd(env)
        .args(args)
        .output()
        .expect("Failed to execute vdrive")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "vdrive failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

// ========== Files ==========

#[test]
fn e2e_add_then_cat_returns_content() {
    let env = TestEnvironment::new().unwrap();
    let src = env.create_file("notes.txt", b"remember the milk").unwrap();

    let added = vdrive(&env, &["add", "notes.txt", src.to_str().unwrap()]);
    assert_success(&added);
    assert!(stdout(&added).trim_end().ends_with("  notes.txt"));

    let cat = vdrive(&env, &["cat", "notes.txt"]);
    assert_success(&cat);
    assert_eq!(cat.stdout, b"remember the milk");
}

#[test]
fn e2e_add_from_stdin() {
    let env = TestEnvironment::new().unwrap();

    let mut child = vdrive_cmd(&env)
        .args(["add", "piped.bin", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(b"from a pipe").unwrap();
    let added = child.wait_with_output().unwrap();
    assert_success(&added);

    let stat = vdrive(&env, &["stat", "piped.bin"]);
    assert_success(&stat);
    let text = stdout(&stat);
    assert!(text.contains("key:   piped.bin\n"));
    assert!(text.contains("size:  11 (11 B)\n"));
}

#[test]
fn e2e_ls_renders_table_with_mask() {
    let env = TestEnvironment::new().unwrap();
    for (key, body) in [("b.txt", "bb"), ("a.txt", "a"), ("other", "ooo")] {
        let src = env.create_file(key, body.as_bytes()).unwrap();
        assert_success(&vdrive(&env, &["add", key, src.to_str().unwrap()]));
    }

    let ls = vdrive(&env, &["ls", ".txt", "--mask", "5"]);
    assert_success(&ls);
    assert_eq!(
        stdout(&ls),
        "| Key   | Size |\n|-------|------|\n| a.txt | 1 B  |\n| b.txt | 2 B  |\n"
    );
}

#[test]
fn e2e_rm_removes_file_once() {
    let env = TestEnvironment::new().unwrap();
    let src = env.create_file("gone.txt", b"bye").unwrap();
    assert_success(&vdrive(&env, &["add", "gone.txt", src.to_str().unwrap()]));

    assert_success(&vdrive(&env, &["rm", "gone.txt"]));
    assert!(!vdrive(&env, &["rm", "gone.txt"]).status.success());

    let stat = vdrive(&env, &["stat", "gone.txt"]);
    assert!(!stat.status.success());
}

#[test]
fn e2e_missing_source_fails() {
    let env = TestEnvironment::new().unwrap();
    let output = vdrive(&env, &["add", "x", "does-not-exist"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("does-not-exist"));
}

// ========== Drive lifecycle ==========

#[test]
fn e2e_no_create_on_missing_drive_fails() {
    let env = TestEnvironment::new().unwrap();
    let output = vdrive(&env, &["--no-create", "status"]);
    assert!(!output.status.success());
}

#[test]
fn e2e_status_reports_drive_and_writer() {
    let env = TestEnvironment::new().unwrap();
    let src = env.create_file("one", b"1").unwrap();
    assert_success(&vdrive(&env, &["add", "one", src.to_str().unwrap()]));

    let status = vdrive(&env, &["status"]);
    assert_success(&status);
    let text = stdout(&status);
    assert!(text.contains(&format!("Drive:    {}\n", env.drive_name())));
    assert!(text.contains("Files:    1 (1 B)\n"));

    let identity = text
        .lines()
        .find_map(|l| l.strip_prefix("Identity: "))
        .unwrap()
        .to_string();
    assert!(text.contains(&format!("Writers:  {}\n", identity)));
}

#[test]
fn e2e_grant_and_revoke() {
    let env = TestEnvironment::new().unwrap();
    assert_success(&vdrive(&env, &["grant", "alice", "write"]));
    assert!(stdout(&vdrive(&env, &["status"])).contains("alice"));

    assert_success(&vdrive(&env, &["revoke", "alice", "write"]));
    assert!(!stdout(&vdrive(&env, &["status"])).contains("alice"));
}

#[test]
fn e2e_snapshot_prints_content_id() {
    let env = TestEnvironment::new().unwrap();
    let output = vdrive(&env, &["snapshot"]);
    assert_success(&output);
    let id = stdout(&output);
    assert_eq!(id.trim().len(), 64);
    assert!(id.trim().chars().all(|c| c.is_ascii_hexdigit()));
}

// ========== Config ==========

#[test]
fn e2e_config_show_reflects_environment() {
    let env = TestEnvironment::new().unwrap();
    let output = vdrive(&env, &["config", "show"]);
    assert_success(&output);

    let parsed: vdrive_config::Config = toml::from_str(&stdout(&output)).unwrap();
    assert_eq!(parsed.storage.content_root, env.content_root);
    assert_eq!(parsed.drive.name, env.drive_name());
}

#[test]
fn e2e_config_path_under_home() {
    let env = TestEnvironment::new().unwrap();
    let output = vdrive(&env, &["config", "path"]);
    assert_success(&output);
    assert!(stdout(&output).trim().ends_with(".vdrive/config.toml"));
}
