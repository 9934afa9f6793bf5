//! End-to-end sessions against a scripted stdio server.
#![cfg(unix)]

#[path = "common.rs"]
mod common;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, ExitStatus, Stdio};

#[test]
fn test_check_prints_server_info_and_cleans_up() {
    let sandbox = common::Sandbox::new();
    let server = sandbox.fake_server("happy");

    sandbox
        .command()
        .env("VERSE_LSP_CE_BIN", &server)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Server: FakeVerse 0.1.0"))
        .stdout(predicate::str::contains("definitionProvider"))
        .stdout(predicate::str::contains(r#""language":"verse""#));

    assert!(sandbox.leftover_files().is_empty(), "{:?}", sandbox.leftover_files());
    assert!(server.exists());
}

#[test]
fn test_check_reports_rejected_handshake() {
    let sandbox = common::Sandbox::new();
    let server = sandbox.fake_server("reject");

    sandbox
        .command()
        .arg("--server-binary")
        .arg(&server)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("[VerseLspCE Error]"))
        .stderr(predicate::str::contains("no vproject found"));

    assert!(sandbox.leftover_files().is_empty());
}

#[test]
fn test_dev_flag_shows_channel_on_success() {
    let sandbox = common::Sandbox::new();
    let server = sandbox.fake_server("happy");

    sandbox
        .command()
        .env("VERSE_LSP_CE_BIN", &server)
        .env("VERSE_LSP_CE_DEV_SHOW_OUTPUT", "1")
        .arg("check")
        .assert()
        .success()
        .stderr(predicate::str::contains("Using LSP server binary"))
        .stderr(predicate::str::contains("fake server ready"));
}

#[test]
fn test_run_fails_when_server_exits() {
    let sandbox = common::Sandbox::new();
    let server = sandbox.fake_server("oneshot");

    sandbox
        .command()
        .env("VERSE_LSP_CE_BIN", &server)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("exited unexpectedly"));

    assert!(sandbox.leftover_files().is_empty());
}

/// Read stdout until a line containing `marker`, keeping the pipe open so the
/// child can go on printing.
fn read_until(stdout: &mut BufReader<ChildStdout>, marker: &str) -> String {
    let mut seen = String::new();
    loop {
        let mut line = String::new();
        assert_ne!(stdout.read_line(&mut line).unwrap(), 0, "exited early: {seen}");
        seen.push_str(&line);
        if line.contains(marker) {
            return seen;
        }
    }
}

fn send_signal(child: &Child, signal: libc::c_int) {
    #[allow(unsafe_code)]
    // SAFETY: signalling a child process we own.
    let rc = unsafe { libc::kill(libc::pid_t::try_from(child.id()).unwrap(), signal) };
    assert_eq!(rc, 0);
}

fn wait_with_stderr(mut child: Child, mut stdout: BufReader<ChildStdout>) -> (ExitStatus, String) {
    let mut rest = String::new();
    stdout.read_to_string(&mut rest).unwrap();
    let status = child.wait().unwrap();
    let mut stderr = String::new();
    child.stderr.take().unwrap().read_to_string(&mut stderr).unwrap();
    (status, stderr)
}

fn spawn_run(sandbox: &common::Sandbox, server: &Path, files: &[&Path]) -> (Child, BufReader<ChildStdout>) {
    let mut child = sandbox
        .command()
        .env("VERSE_LSP_CE_BIN", server)
        .env("VERSE_LSP_CE_DEV_SHOW_OUTPUT", "1")
        .arg("run")
        .args(files)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let stdout = BufReader::new(child.stdout.take().unwrap());
    (child, stdout)
}

#[test]
fn test_run_opens_documents_until_interrupted() {
    let sandbox = common::Sandbox::new();
    let server = sandbox.fake_server("happy");
    let source = sandbox.write_source("player.verse", "player := class {}\n");
    let notes = sandbox.write_source("notes.txt", "not verse\n");

    let (child, mut stdout) = spawn_run(&sandbox, &server, &[source.as_path(), notes.as_path()]);
    let seen = read_until(&mut stdout, "press Ctrl-C");
    assert!(seen.contains("Opened"), "{seen}");
    assert!(!seen.contains("notes.txt"), "{seen}");

    send_signal(&child, libc::SIGINT);
    let (status, stderr) = wait_with_stderr(child, stdout);
    assert!(status.success(), "{stderr}");
    assert!(stderr.contains("Skipping"), "{stderr}");
    assert!(stderr.contains("Verse language server stopped."), "{stderr}");
    assert!(sandbox.leftover_files().is_empty());
}

#[test]
fn test_run_cleans_up_on_sigterm() {
    let sandbox = common::Sandbox::new();
    let server = sandbox.fake_server("happy");

    let (child, mut stdout) = spawn_run(&sandbox, &server, &[]);
    read_until(&mut stdout, "press Ctrl-C");
    assert_eq!(sandbox.leftover_files().len(), 1);

    send_signal(&child, libc::SIGTERM);
    let (status, stderr) = wait_with_stderr(child, stdout);
    assert!(status.success(), "{status:?}: {stderr}");
    assert!(stderr.contains("Verse language server stopped."), "{stderr}");
    assert!(sandbox.leftover_files().is_empty(), "{:?}", sandbox.leftover_files());
}

#[test]
fn test_run_cleans_up_on_sighup() {
    let sandbox = common::Sandbox::new();
    let server = sandbox.fake_server("happy");

    let (child, mut stdout) = spawn_run(&sandbox, &server, &[]);
    read_until(&mut stdout, "press Ctrl-C");

    send_signal(&child, libc::SIGHUP);
    let (status, stderr) = wait_with_stderr(child, stdout);
    assert!(status.success(), "{status:?}: {stderr}");
    assert!(sandbox.leftover_files().is_empty(), "{:?}", sandbox.leftover_files());
}

#[test]
fn test_check_still_cleans_up_when_signalled_during_shutdown() {
    let sandbox = common::Sandbox::new();
    let server = sandbox.fake_server("hang");

    let mut child = sandbox
        .command()
        .env("VERSE_LSP_CE_BIN", &server)
        .arg("--shutdown-timeout")
        .arg("3")
        .arg("check")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    read_until(&mut stdout, "Capabilities:");

    // The server ignores shutdown, so the client is still inside its bounded
    // shutdown wait when the signal lands.
    send_signal(&child, libc::SIGTERM);
    let (status, stderr) = wait_with_stderr(child, stdout);
    assert!(status.success(), "{status:?}: {stderr}");
    assert!(sandbox.leftover_files().is_empty(), "{:?}", sandbox.leftover_files());
}
