use std::io::Write;
use std::process::Command;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

fn portfolio(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_portfolio"))
        .args(args)
        .env("RUST_LOG", "off")
        .env_remove("PORTFOLIO_CONFIG")
        .output()
        .expect("run portfolio binary")
}

const MANUAL_ONLY: &str = r#"
[run]
max_concurrency = 2
timeout_secs = 10
offset_usd = "25"

[pricing]
enabled = false

[[sources]]
id = "cold-storage"
kind = "manual"
holdings = [
    { symbol = "USDC", quantity = "100" },
    { symbol = "DAI", quantity = "50", account_type = "earn" },
]
"#;

#[test]
fn test_check_config_accepts_valid_file() {
    let config = write_config(MANUAL_ONLY);
    let output = portfolio(&["check-config", "--config", config.path().to_str().unwrap()]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Configuration OK"));
    assert!(stdout.contains("cold-storage"));
}

#[test]
fn test_check_config_rejects_duplicate_sources() {
    let config = write_config(
        r#"
[[sources]]
id = "dup"
kind = "manual"
holdings = []

[[sources]]
id = "dup"
kind = "manual"
holdings = []
"#,
    );
    let output = portfolio(&["check-config", "--config", config.path().to_str().unwrap()]);
    assert!(!output.status.success());
}

#[test]
fn test_run_prints_json_report() {
    let config = write_config(MANUAL_ONLY);
    let output = portfolio(&["run", "--json", "--config", config.path().to_str().unwrap()]);
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["timed_out"], false);
    assert_eq!(report["outcomes"][0]["status"], "ok");
    assert_eq!(report["ledger"]["total_usd"], "150");
    assert_eq!(report["ledger"]["net_usd"], "125");
    assert_eq!(report["exposure"]["stable_pct"], "100");
}
