//! Runs the driver binary against an unreachable signing service.

use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};

const UUID: &str = "9a1f04b2-77c1-4d0e-8f53-2b8c6a1e0c11";
const INFO_HASH: &str = "0123456789abcdef0123456789abcdef01234567";

fn unreachable_url() -> String {
    // Bind then drop to get a port with nothing listening.
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    format!("http://{}/cghub/security/csr_sign", addr)
}

fn write_config(dir: &Path, name: &str, mode: &str) -> std::path::PathBuf {
    let credential = dir.join("credential.key");
    std::fs::write(&credential, "token-123\n").unwrap();
    let path = dir.join(name);
    std::fs::write(
        &path,
        format!(
            "[signing]\ncsr_signing_url = \"{}\"\ncredential = \"{}\"\n\n[runtime]\nmode = \"{}\"\nverbosity = 0\n",
            unreachable_url(),
            credential.display(),
            mode
        ),
    )
    .unwrap();
    path
}

fn run(dir: &Path, tmp: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_swarm-bootstrap"))
        .args(args)
        .current_dir(dir)
        .env("TMPDIR", tmp)
        .env_remove("GENETORRENT_DEVMODE")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn leftover_entries(tmp: &Path) -> Vec<String> {
    std::fs::read_dir(tmp)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn test_interactive_failure_removes_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let tmp = dir.path().join("tmp");
    std::fs::create_dir(&tmp).unwrap();
    // No config argument: bootstrap.toml in the working directory is loaded.
    write_config(dir.path(), "bootstrap.toml", "interactive");

    let output = run(dir.path(), &tmp, &[UUID, INFO_HASH]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1), "stderr: {}", stderr);
    assert!(stderr.contains(UUID), "stderr: {}", stderr);
    assert!(
        String::from_utf8_lossy(&output.stdout).contains("✓ Workspace ready"),
        "the run must get as far as creating the workspace"
    );
    assert_eq!(leftover_entries(&tmp), Vec::<String>::new());
}

#[test]
fn test_server_failure_removes_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let tmp = dir.path().join("tmp");
    std::fs::create_dir(&tmp).unwrap();
    let config = write_config(dir.path(), "server.toml", "server");

    let output = run(
        dir.path(),
        &tmp,
        &[config.to_str().unwrap(), UUID, INFO_HASH],
    );
    assert!(!output.status.success());
    assert_eq!(leftover_entries(&tmp), Vec::<String>::new());
}

#[test]
fn test_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(dir.path(), dir.path(), &["only-one-argument"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("usage:"));
}
