use assert_cmd::cmd::Command;

#[allow(dead_code)]
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

pub fn make_cli() -> Command {
    Command::cargo_bin(env!("CARGO_PKG_NAME")).expect("Failed to find binary")
}

#[allow(dead_code)]
pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
}
