#[path = "common.rs"]
mod common;

use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn test_help_lists_commands() {
    let sandbox = common::Sandbox::new();
    sandbox
        .command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("VERSE_LSP_CE_BIN"));
}

#[test]
fn test_resolve_reports_missing_override() {
    let sandbox = common::Sandbox::new();
    sandbox
        .command()
        .env("VERSE_LSP_CE_BIN", "/custom/server")
        .arg("resolve")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Selected (VERSE_LSP_CE_BIN)"))
        .stderr(predicate::str::contains("could not find LSP server binary /custom/server"));
}

#[test]
fn test_resolve_prefers_override_over_configured_binary() {
    let sandbox = common::Sandbox::new();
    let configured = sandbox.write_source("configured-server", "");
    sandbox
        .command()
        .env("VERSE_LSP_CE_BIN", "/custom/server")
        .arg("--server-binary")
        .arg(&configured)
        .arg("resolve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("/custom/server"));
}

// Windows builds append .exe to the configured path.
#[cfg(not(windows))]
#[test]
fn test_resolve_finds_configured_binary() {
    let sandbox = common::Sandbox::new();
    let configured = sandbox.write_source("configured-server", "");
    sandbox
        .command()
        .arg("--server-binary")
        .arg(&configured)
        .arg("resolve")
        .assert()
        .success()
        .stdout(predicate::str::contains("Selected (configured binary)"));
}

#[test]
fn test_resolve_default_location_uses_flavor() {
    let sandbox = common::Sandbox::new();
    sandbox
        .command()
        .arg("--install-root")
        .arg(&sandbox.workspace)
        .arg("--flavor")
        .arg("Debug")
        .arg("resolve")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Selected (default location)"))
        .stdout(predicate::str::contains("Debug"));
    assert!(sandbox.leftover_files().is_empty());
}

#[test]
fn test_check_without_binary_stages_nothing() {
    let sandbox = common::Sandbox::new();
    sandbox
        .command()
        .env("VERSE_LSP_CE_BIN", "/custom/server")
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Verse language server unavailable"))
        .stderr(predicate::str::contains("/custom/server"));
    assert!(sandbox.leftover_files().is_empty());
}
