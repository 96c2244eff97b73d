//! CLI integration tests for the souq binary.
//!
//! Each test uses an isolated temp directory for the database, ensuring tests
//! can run in parallel safely.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use std::path::PathBuf;

use assert_cmd::Command;
use assert_fs::TempDir;
use predicates::prelude::*;
use souq::store::{SqliteStore, UserStore};
use souq::types::{Role, UserStatus};

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("data").join("souq.db")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("souq").expect("failed to find binary");
        cmd.env("NO_COLOR", "1")
            .env("DATABASE_URL", format!("sqlite://{}", self.db_path().display()))
            .env("AUTH_SECRET", "cli-test-secret")
            .env("AUTH_BASE_URL", "http://localhost:3000")
            .env_remove("SMTP_HOST");
        cmd
    }

    fn create_admin(&self, email: &str, password: &str) -> assert_cmd::assert::Assert {
        self.cmd()
            .args([
                "admin",
                "create-admin",
                "--email",
                email,
                "--name",
                "Store Owner",
                "--password",
                password,
            ])
            .assert()
    }

    fn store(&self) -> SqliteStore {
        SqliteStore::new(self.db_path()).expect("open database")
    }
}

#[test]
fn test_migrate_creates_database() {
    let ctx = TestContext::new();

    ctx.cmd()
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("schema version"));

    assert!(ctx.db_path().exists());
    assert!(!ctx.store().applied_migrations().unwrap().is_empty());

    // Running again is a no-op.
    ctx.cmd().arg("migrate").assert().success();
}

#[test]
fn test_create_admin() {
    let ctx = TestContext::new();

    ctx.create_admin("Owner@Example.com", "long enough password 42")
        .success()
        .stdout(predicate::str::contains("Created admin 'owner@example.com'"));

    let user = ctx
        .store()
        .get_user_by_email("owner@example.com")
        .unwrap()
        .expect("admin exists");
    assert_eq!(user.role, Role::Admin);
    assert_eq!(user.status, UserStatus::Active);
    assert!(user.email_verified);
    assert!(user.password_hash.starts_with("$argon2"));
}

#[test]
fn test_create_admin_rejects_duplicates() {
    let ctx = TestContext::new();
    ctx.create_admin("owner@example.com", "long enough password 42")
        .success();

    ctx.create_admin("OWNER@example.com", "another long password 7")
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_create_admin_enforces_password_policy() {
    let ctx = TestContext::new();

    ctx.create_admin("owner@example.com", "short")
        .failure()
        .stderr(predicate::str::contains("at least 8 characters"));

    assert!(!ctx.db_path().exists());
}

#[test]
fn test_create_admin_rejects_bad_email() {
    let ctx = TestContext::new();

    ctx.create_admin("not-an-email", "long enough password 42")
        .failure()
        .stderr(predicate::str::contains("Invalid email"));
}

#[test]
fn test_missing_configuration_is_reported() {
    let ctx = TestContext::new();

    ctx.cmd()
        .env_remove("AUTH_SECRET")
        .arg("migrate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("AUTH_SECRET"));
}

#[test]
fn test_invalid_configuration_is_reported() {
    let ctx = TestContext::new();

    ctx.cmd()
        .env("TAX_RATE", "lots")
        .arg("migrate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("TAX_RATE"));
}
