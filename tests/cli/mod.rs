use assert_cmd::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tempfile::{Builder, TempDir};

const TEST_CONFIG_FILE: &str = "grantsmith-test.toml";

fn setup_temp_config(dsn: &str) -> std::io::Result<(TempDir, PathBuf)> {
    let temp_dir = Builder::new()
        .prefix("grantsmith-test-dir")
        .rand_bytes(5)
        .tempdir()?;

    let path = temp_dir.path().join(TEST_CONFIG_FILE);
    let mut conf_file = File::create(&path)?;
    write!(
        conf_file,
        r#"
[cluster]
dsn = "{dsn}"

[reconcile]
convergence_delay_ms = 0
"#
    )?;

    Ok((temp_dir, path))
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_help_lists_commands() -> Result<(), Box<dyn std::error::Error>> {
    let output = Command::cargo_bin("grantsmith")?.arg("--help").output()?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["create", "read", "update", "delete", "exists", "lookup-schema"] {
        assert!(stdout.contains(command), "{command} missing from help");
    }
    Ok(())
}

#[test]
fn test_missing_config() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;

    let output = Command::cargo_bin("grantsmith")?
        .arg("-c")
        .arg(temp_dir.path().join("absent.toml"))
        .args(["exists", "user", "101"])
        .output()?;

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("Configuration error"));
    Ok(())
}

#[test]
fn test_non_postgres_dsn_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, config) = setup_temp_config("mysql://localhost/dev")?;

    let output = Command::cargo_bin("grantsmith")?
        .arg("-c")
        .arg(config)
        .args(["exists", "user", "101"])
        .output()?;

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("postgres"));
    Ok(())
}

#[test]
fn test_invalid_id_fails_before_connecting() -> Result<(), Box<dyn std::error::Error>> {
    let (_temp_dir, config) = setup_temp_config("postgres://nobody@127.0.0.1:1/dev")?;

    let output = Command::cargo_bin("grantsmith")?
        .arg("-c")
        .arg(config)
        .args(["exists", "privilege_binding", "nope"])
        .output()?;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Invalid privilege_binding id \"nope\""));
    Ok(())
}

#[test]
fn test_missing_declaration() -> Result<(), Box<dyn std::error::Error>> {
    let (temp_dir, config) = setup_temp_config("postgres://nobody@127.0.0.1:1/dev")?;

    let output = Command::cargo_bin("grantsmith")?
        .arg("-c")
        .arg(config)
        .arg("create")
        .arg("group")
        .arg(temp_dir.path().join("analysts.toml"))
        .output()?;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Could not read declaration"));
    Ok(())
}
