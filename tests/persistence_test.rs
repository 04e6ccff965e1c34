#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("wallet_db");

    // First run: provision and settle a top-up.
    let mut csv1 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv1, "op, wallet, currency, reference, amount, key, gateway").unwrap();
    writeln!(csv1, "provision, acct-1, SAR, , , ,").unwrap();
    writeln!(csv1, "topup, acct-1, , inv-1, 100, K1, stripe").unwrap();
    writeln!(csv1, "confirm, acct-1, , inv-1, , , psp-1").unwrap();

    let mut cmd1 = Command::new(cargo_bin!("wallet-ledger"));
    cmd1.arg("run").arg(csv1.path()).arg("--db-path").arg(&db_path);

    let output1 = cmd1.output().expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("acct-1,SAR,100,0,active"));

    // Second run against the same database: the balance was recovered.
    let mut csv2 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv2, "op, wallet, currency, reference, amount, key, gateway").unwrap();
    writeln!(csv2, "charge, acct-1, , order-1, 40, K2,").unwrap();

    let mut cmd2 = Command::new(cargo_bin!("wallet-ledger"));
    cmd2.arg("run").arg(csv2.path()).arg("--db-path").arg(&db_path);

    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains("acct-1,SAR,60,0,active"));
}

#[test]
fn test_idempotency_keys_survive_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("wallet_db");

    let mut csv1 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv1, "op, wallet, currency, reference, amount, key, gateway").unwrap();
    writeln!(csv1, "provision, acct-1, SAR, , , ,").unwrap();
    writeln!(csv1, "topup, acct-1, , inv-1, 100, K1, stripe").unwrap();
    writeln!(csv1, "confirm, acct-1, , inv-1, , , psp-1").unwrap();
    writeln!(csv1, "charge, acct-1, , order-1, 40, C1,").unwrap();

    let mut cmd1 = Command::new(cargo_bin!("wallet-ledger"));
    cmd1.arg("run").arg(csv1.path()).arg("--db-path").arg(&db_path);
    assert!(cmd1.output().unwrap().status.success());

    // Replaying the charge key in a later run must not debit again.
    let mut csv2 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv2, "op, wallet, currency, reference, amount, key, gateway").unwrap();
    writeln!(csv2, "charge, acct-1, , order-1, 40, C1,").unwrap();

    let mut cmd2 = Command::new(cargo_bin!("wallet-ledger"));
    cmd2.arg("run").arg(csv2.path()).arg("--db-path").arg(&db_path);

    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains("acct-1,SAR,60,0,active"));
}
