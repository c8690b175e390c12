use serde_json::Value;
use std::io::Write;
use std::process::Command;

const SELF_UUID: &str = "00000000-0000-4000-8000-00000000000a";
const ALICE: &str = "00000000-0000-4000-8000-0000000000a1";

fn replay(lines: &[String]) -> Vec<Value> {
    let mut input = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(input, "{line}").unwrap();
    }
    input.flush().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_ingest-replay"))
        .arg(input.path())
        .args(["--self-uuid", SELF_UUID, "--json"])
        .env("RUST_LOG", "off")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "replay failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn text_line(timestamp: u64, body: &str) -> String {
    serde_json::json!({
        "state": "decrypted_ok",
        "envelope": {
            "sender": { "uuid": ALICE },
            "timestamp": timestamp,
            "needs_receipt": true,
            "content": { "data": { "body": body } }
        }
    })
    .to_string()
}

#[test]
fn test_replay_reports_each_line_and_jobs() {
    let no_session = serde_json::json!({
        "state": "no_session",
        "timestamp": 300,
        "failure": { "sender": { "uuid": ALICE }, "sender_device": 2 }
    })
    .to_string();

    let out = replay(&[text_line(100, "hi"), String::new(), text_line(100, "hi"), no_session]);
    assert_eq!(out.len(), 6, "three results and three jobs: {out:?}");

    assert_eq!(out[0]["line"], 1);
    assert_eq!(out[0]["result"]["disposition"], "applied");
    assert_eq!(out[1]["line"], 3);
    assert_eq!(out[1]["result"]["disposition"], "unchanged");
    assert_eq!(out[2]["line"], 4);
    assert_eq!(out[2]["result"]["disposition"], "placeholder");
    assert_eq!(out[2]["result"]["detail"], "DecryptFailed");

    let jobs: Vec<&str> = out[3..].iter().map(|job| job["job"].as_str().unwrap()).collect();
    assert_eq!(
        jobs,
        vec!["send_delivery_receipt", "send_delivery_receipt", "automatic_session_reset"]
    );
    assert_eq!(out[5]["sent_timestamp"], 300);
    assert_eq!(out[5]["device"], 2);
}

#[test]
fn test_replay_rejects_malformed_input() {
    let mut input = tempfile::NamedTempFile::new().unwrap();
    writeln!(input, "{{ not json").unwrap();
    input.flush().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_ingest-replay"))
        .arg(input.path())
        .args(["--self-uuid", SELF_UUID])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("parsing line 1"));
}
