use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

fn valid_alarm_json() -> &'static str {
    r#"
{
  "version": 1,
  "settings": { "time_format": "24h" },
  "alarms": [
    {
      "id": "wake-1",
      "label": "Wake up",
      "time": "07:30",
      "scheduled_date": "2099-02-07"
    },
    {
      "id": "standup-weekdays",
      "time": "09:30",
      "repeat": { "monday": true, "tuesday": true, "wednesday": true, "thursday": true, "friday": true }
    }
  ]
}
"#
}

#[test]
fn list_succeeds_with_valid_alarm_file() {
    let dir = tempdir().expect("tempdir");
    let alarms = dir.path().join("alarms.json");
    fs::write(&alarms, valid_alarm_json()).expect("write json");

    let mut cmd = cargo_bin_cmd!("wakeclock");
    cmd.arg("--list")
        .arg("--alarms")
        .arg(alarms)
        .assert()
        .success()
        .stdout(predicate::str::contains("Alarm report"))
        .stdout(predicate::str::contains("wake-1 07:30 Wake up"))
        .stdout(predicate::str::contains("next=Sat 2099-02-07 07:30"))
        .stdout(predicate::str::contains("repeat=Mon,Tue,Wed,Thu,Fri"));
}

#[test]
fn missing_file_lists_an_empty_collection() {
    let dir = tempdir().expect("tempdir");

    let mut cmd = cargo_bin_cmd!("wakeclock");
    cmd.arg("--list")
        .arg("--alarms")
        .arg(dir.path().join("absent.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Alarms: 0 (0 enabled)"));
}

#[test]
fn malformed_json_fails_with_clear_error() {
    let dir = tempdir().expect("tempdir");
    let alarms = dir.path().join("alarms.json");
    fs::write(&alarms, "{ not-valid-json ").expect("write invalid json");

    let mut cmd = cargo_bin_cmd!("wakeclock");
    cmd.arg("--list")
        .arg("--alarms")
        .arg(alarms)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid JSON"));
}

#[test]
fn duplicate_ids_are_rejected() {
    let dir = tempdir().expect("tempdir");
    let alarms = dir.path().join("alarms.json");
    fs::write(
        &alarms,
        r#"{"version":1,"alarms":[{"id":"a","time":"07:00"},{"id":"a","time":"08:00"}]}"#,
    )
    .expect("write json");

    let mut cmd = cargo_bin_cmd!("wakeclock");
    cmd.arg("--list")
        .arg("--alarms")
        .arg(alarms)
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate alarm id found: a"));
}

#[test]
fn daemon_exits_cleanly_after_run_for_secs() {
    let dir = tempdir().expect("tempdir");
    let alarms = dir.path().join("alarms.json");
    fs::write(&alarms, valid_alarm_json()).expect("write json");

    let mut cmd = cargo_bin_cmd!("wakeclock");
    cmd.env_remove("RUST_LOG")
        .arg("--no-api")
        .arg("--run-for-secs")
        .arg("1")
        .arg("--alarms")
        .arg(alarms)
        .assert()
        .success()
        .stderr(predicate::str::contains("shutdown complete"));
}
