//! Integration tests for core CLI contract behavior.

use {
    predicates::prelude::*,
    std::{fs, path::Path},
    tempfile::{TempDir, tempdir},
};

const MISSING_PORT: &str = "/nonexistent/ttySBL0";

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("sblflash")
}

/// A command isolated from the user's configuration and environment.
fn isolated_cmd(dir: &Path) -> assert_cmd::Command {
    let mut cmd = cli_cmd();
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env_remove("SBLFLASH_PORT")
        .env_remove("SBLFLASH_BAUD")
        .env_remove("SBLFLASH_CHIP")
        .env_remove("RUST_LOG");
    cmd
}

fn workdir() -> TempDir {
    tempdir().expect("tempdir should be created")
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    for flag in ["--help", "-h"] {
        cli_cmd()
            .arg(flag)
            .assert()
            .success()
            .code(0)
            .stdout(predicate::str::contains("sblflash"))
            .stdout(predicate::str::contains("autobaud-scan"))
            .stderr(predicate::str::is_empty());
    }
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    for flag in ["--version", "-V"] {
        cli_cmd()
            .arg(flag)
            .assert()
            .success()
            .code(0)
            .stdout(predicate::str::contains("sblflash"))
            .stderr(predicate::str::is_empty());
    }
}

#[test]
fn subcommand_help_exits_zero() {
    cli_cmd()
        .args(["program", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--verify"))
        .stdout(predicate::str::contains("--no-reset"));
}

#[test]
fn completions_bash_exits_zero() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stdout(predicate::str::contains("sblflash"));
}

#[test]
fn completions_without_shell_is_usage_error() {
    let dir = workdir();
    isolated_cmd(dir.path())
        .arg("completions")
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("specify a shell"));
}

#[test]
fn unknown_command_exits_one() {
    cli_cmd()
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn missing_subcommand_exits_one() {
    cli_cmd().assert().failure().code(1);
}

#[test]
fn invalid_byte_exits_one() {
    cli_cmd()
        .args(["-p", MISSING_PORT, "tx-byte", "300"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid byte: 300"));
}

#[test]
fn invalid_chip_exits_one() {
    cli_cmd()
        .args(["--chip", "msp430", "ping"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown chip"));
}

#[test]
fn unopenable_port_exits_two() {
    let dir = workdir();
    for args in [
        vec!["ping"],
        vec!["tx-byte", "0x55"],
        vec!["tx", "0x55", "0x55"],
        vec!["rx", "-10"],
        vec!["chip-id"],
    ] {
        isolated_cmd(dir.path())
            .args(["-p", MISSING_PORT])
            .args(&args)
            .assert()
            .code(2)
            .stdout(predicate::str::is_empty())
            .stderr(predicate::str::contains(format!(
                "Failed to open {MISSING_PORT} at 115200 baud"
            )));
    }
}

#[test]
fn baud_flag_is_reported_in_open_failure() {
    let dir = workdir();
    isolated_cmd(dir.path())
        .args(["-p", MISSING_PORT, "-b", "921600", "reset"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("at 921600 baud"));
}

#[test]
fn port_from_environment_is_used() {
    let dir = workdir();
    isolated_cmd(dir.path())
        .env("SBLFLASH_PORT", "/nonexistent/ttyFromEnv")
        .arg("ping")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("/nonexistent/ttyFromEnv"));
}

#[test]
fn local_config_supplies_port_and_baud() {
    let dir = workdir();
    fs::write(
        dir.path().join("sblflash.toml"),
        "[connection]\nport = \"/nonexistent/ttyFromConfig\"\nbaud = 460800\n",
    )
    .expect("write config");

    isolated_cmd(dir.path())
        .arg("status")
        .assert()
        .code(2)
        .stderr(predicate::str::contains(
            "Failed to open /nonexistent/ttyFromConfig at 460800 baud",
        ));
}

#[test]
fn flag_overrides_config_file() {
    let dir = workdir();
    let config = dir.path().join("custom.toml");
    fs::write(&config, "[connection]\nport = \"/nonexistent/ttyFromConfig\"\n")
        .expect("write config");

    isolated_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["-p", MISSING_PORT, "ping"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains(MISSING_PORT))
        .stderr(predicate::str::contains("ttyFromConfig").not());
}

#[test]
fn invalid_config_is_a_warning_not_an_error() {
    let dir = workdir();
    let config = dir.path().join("bad.toml");
    fs::write(&config, "this is not [valid toml").expect("write config");

    isolated_cmd(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["-p", MISSING_PORT, "ping"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn send_data_over_limit_is_usage_error() {
    let dir = workdir();
    let bytes: Vec<String> = (0..253).map(|i| (i % 256).to_string()).collect();
    isolated_cmd(dir.path())
        .args(["-p", MISSING_PORT, "send-data"])
        .args(&bytes)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Too many bytes (max 252)"));
}

#[test]
fn program_missing_image_exits_one() {
    let dir = workdir();
    isolated_cmd(dir.path())
        .args(["-p", MISSING_PORT, "program", "missing.bin", "0"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Failed to open image"));
}

#[test]
fn program_misaligned_address_fails_before_opening_port() {
    let dir = workdir();
    fs::write(dir.path().join("app.bin"), [0xAAu8; 64]).expect("write image");

    isolated_cmd(dir.path())
        .args(["-p", MISSING_PORT, "program", "app.bin", "0x10"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not page aligned"))
        .stderr(predicate::str::contains("Failed to open").not());
}

#[test]
fn program_into_ccfg_page_is_rejected() {
    let dir = workdir();
    fs::write(dir.path().join("app.bin"), [0xAAu8; 64]).expect("write image");

    isolated_cmd(dir.path())
        .args(["-p", MISSING_PORT, "--chip", "cc26x2", "program", "app.bin", "0x56000"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("CCFG"));
}

#[test]
fn custom_chip_without_geometry_is_usage_error() {
    let dir = workdir();
    isolated_cmd(dir.path())
        .args(["-p", MISSING_PORT, "--chip", "custom", "full-erase"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("requires a flash size"));
}

#[test]
fn non_interactive_without_port_never_prompts() {
    let dir = workdir();
    let output = isolated_cmd(dir.path())
        .args(["--non-interactive", "ping"])
        .output()
        .expect("command should execute");

    // Zero or several candidates fail as usage errors; one candidate is
    // used and then either opens or fails to open.
    let code = output.status.code();
    assert!(matches!(code, Some(1 | 2)), "unexpected exit code {code:?}");
}

#[test]
fn list_ports_json_returns_array() {
    let dir = workdir();
    let output = isolated_cmd(dir.path())
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert!(parsed.is_array(), "should be a JSON array");
}
