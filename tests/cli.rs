use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn script(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("program.bet");
    fs::write(&path, contents).expect("write script");
    (dir, path)
}

fn betlang() -> Command {
    let mut cmd = Command::cargo_bin("betlang").expect("binary exists");
    cmd.env_remove("BETLANG_SEED")
        .env_remove("BETLANG_COOLOFF_SECONDS")
        .env_remove("BETLANG_TOLERANCE");
    cmd
}

#[test]
fn run_prints_the_last_value() {
    let (_dir, path) = script("define x = 40\nx + 2\n");
    betlang()
        .arg("run")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("42"));
}

#[test]
fn run_is_reproducible_under_a_seed() {
    let (_dir, path) = script("(bet 'left 'middle 'right)\n");
    let first = betlang()
        .arg("run")
        .arg(&path)
        .args(["--seed", "42"])
        .output()
        .expect("run");
    let second = betlang()
        .arg("run")
        .arg(&path)
        .args(["--seed", "42"])
        .output()
        .expect("run");
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn seed_env_var_is_honored() {
    let (_dir, path) = script("(bet 1 2 3)\n");
    let by_flag = betlang()
        .arg("run")
        .arg(&path)
        .args(["--seed", "7"])
        .output()
        .expect("run");
    let by_env = betlang()
        .arg("run")
        .arg(&path)
        .env("BETLANG_SEED", "7")
        .output()
        .expect("run");
    assert_eq!(by_flag.stdout, by_env.stdout);
}

#[test]
fn frontend_errors_exit_with_two() {
    let (_dir, path) = script("(bet-weighted '((a 0.4) (b 0.4) (c 0.3)))\n");
    betlang()
        .arg("run")
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("DutchBook.Violation"));
}

#[test]
fn runtime_errors_exit_with_one() {
    let (_dir, path) = script("(/ 1 0)\n");
    betlang()
        .arg("run")
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Numeric.DomainError"));
}

#[test]
fn usage_errors_exit_with_sixty_four() {
    betlang().arg("run").assert().code(64);
    betlang().arg("frobnicate").assert().code(64);

    let missing = std::path::Path::new("definitely-not-here.bet");
    betlang().arg("run").arg(missing).assert().code(64);
}

#[test]
fn check_reports_without_evaluating() {
    // Division by zero would fail at runtime; `check` must not care.
    let (_dir, path) = script("(/ 1 0)\n");
    betlang().arg("check").arg(&path).assert().success();

    let (_dir2, bad) = script("(bet 1 2)\n");
    betlang()
        .arg("check")
        .arg(&bad)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Arity.Mismatch"));
}

#[test]
fn json_diagnostics_are_line_oriented_objects() {
    let (_dir, path) = script("(bet-weighted '((a 0.4) (b 0.4) (c 0.3)))\n");
    let output = betlang()
        .arg("run")
        .arg(&path)
        .args(["--format", "json"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).expect("utf-8");
    let line = stderr.lines().next().expect("one diagnostic line");
    let parsed: serde_json::Value = serde_json::from_str(line).expect("valid JSON");
    assert_eq!(parsed["kind"], "DutchBookViolation");
    assert_eq!(parsed["severity"], "error");
}

#[test]
fn fmt_round_trips_to_the_keyword_form() {
    let (_dir, path) = script("(bet 'a 'b 'c)\n");
    let output = betlang().arg("fmt").arg(&path).output().expect("fmt");
    assert!(output.status.success());
    let formatted = String::from_utf8(output.stdout).expect("utf-8");
    assert_eq!(formatted, "bet 'a, 'b, 'c end\n");

    // Formatting is a fixed point: format(parse(format(x))) = format(x).
    let (_dir2, path2) = script(&formatted);
    let again = betlang().arg("fmt").arg(&path2).output().expect("fmt");
    assert_eq!(String::from_utf8(again.stdout).expect("utf-8"), formatted);
}

#[test]
fn demo_scripts_run() {
    for script in [
        "demos/quickstart.bet",
        "demos/safety.bet",
        "demos/uncertainty.bet",
    ] {
        betlang()
            .arg("run")
            .arg(script)
            .args(["--seed", "1"])
            .assert()
            .success();
    }
}

#[test]
fn cool_off_env_var_blocks_rapid_bets() {
    let (_dir, path) = script(
        "do a <- validated-bet [['x, 0.5], ['y, 0.5]] 10 10000 3.0\n   b <- validated-bet [['x, 0.5], ['y, 0.5]] 10 10000 3.0\n   return b\nend\n",
    );
    betlang()
        .arg("run")
        .arg(&path)
        .env("BETLANG_COOLOFF_SECONDS", "3600")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("CoolOff.Active"));
}

#[test]
fn safety_off_disables_the_gate() {
    let (_dir, path) = script(
        "do a <- validated-bet [['x, 0.5], ['y, 0.5]] 10 10000 3.0\n   b <- validated-bet [['x, 0.5], ['y, 0.5]] 10 10000 3.0\n   return b\nend\n",
    );
    betlang()
        .arg("run")
        .arg(&path)
        .args(["--safety", "off"])
        .env("BETLANG_COOLOFF_SECONDS", "3600")
        .assert()
        .success();
}
