// tests/transaction_test.rs

//! End-to-end transactions against a temporary root, database and mirror

mod common;

use common::{Fixture, Pkg, Scripted};
use rustpack::Error;
use rustpack::commands;
use rustpack::db::models::{Changeset, ChangesetStatus};
use rustpack::packages::InstallReason;
use rustpack::request::RecoverMode;
use rustpack::resolver::ResolutionIssue;
use rustpack::transaction::{PlanIssue, TransactionEngine, TransactionLock, TransactionState};
use std::fs;
use std::sync::atomic::Ordering;

const HOOKS: &str = "pre_install() { :; }\npost_install() { :; }\npre_remove() { :; }\n";

/// a -> b -> c, each with one file
fn chain() -> Vec<Pkg> {
    vec![
        Pkg::new("c", "3.0-1")
            .file("usr/lib/libc3.so", "c")
            .scriptlet(HOOKS),
        Pkg::new("b", "2.0-1")
            .depends("c")
            .file("usr/lib/libb.so", "b")
            .scriptlet(HOOKS),
        Pkg::new("a", "1.0-1")
            .depends("b>=2.0")
            .file("usr/bin/a", "#!/bin/sh\n")
            .scriptlet(HOOKS),
    ]
}

fn changesets(fixture: &Fixture) -> Vec<Changeset> {
    let conn = rustpack::db::open(&fixture.dbpath().join("local.db").to_string_lossy()).unwrap();
    Changeset::list_all(&conn).unwrap()
}

#[test]
fn test_install_pulls_dependencies_first() {
    let fixture = Fixture::new();
    fixture.publish_synced(&chain());

    fixture.run(&["-S", "--noconfirm", "a"], &Scripted::new(&[])).unwrap();

    let installed = fixture.installed();
    assert_eq!(installed.len(), 3);
    assert_eq!(installed["a"].reason, InstallReason::Explicit);
    assert_eq!(installed["b"].reason, InstallReason::Dependency);
    assert_eq!(installed["c"].reason, InstallReason::Dependency);
    assert_eq!(installed["a"].repository.as_deref(), Some("core"));
    assert_eq!(fixture.read_root("/usr/bin/a").as_deref(), Some("#!/bin/sh\n"));
    assert!(fixture.root_file("/usr/lib/libb.so").is_file());

    // c, then b, then a
    assert_eq!(
        fixture.runner.calls(),
        vec![
            "pre_install 3.0-1",
            "post_install 3.0-1",
            "pre_install 2.0-1",
            "post_install 2.0-1",
            "pre_install 1.0-1",
            "post_install 1.0-1",
        ]
    );

    assert!(fixture.cachedir().join("a-1.0-1-any.pkg.tar.gz").is_file());
    assert!(!fixture.journal_path().exists());
    assert!(!fixture.dbpath().join("db.lck").exists());

    let history = changesets(&fixture);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ChangesetStatus::Applied);
    assert_eq!(history[0].description, "install c b a");
}

#[test]
fn test_confirmation_is_required() {
    let fixture = Fixture::new();
    fixture.publish_synced(&chain());
    let confirm = Scripted::new(&[false]);

    let result = fixture.run(&["-S", "a"], &confirm);
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(confirm.questions(), vec!["Proceed with installation?".to_string()]);
    assert!(fixture.installed().is_empty());
    assert!(fixture.snapshot(&fixture.root()).is_empty());

    // A closed input never counts as yes
    let result = fixture.run(&["-S", "a"], &Scripted::new(&[]));
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!fixture.dbpath().join("db.lck").exists());
}

#[test]
fn test_simulation_changes_nothing() {
    let fixture = Fixture::new();
    fixture.publish_synced(&chain());
    let confirm = Scripted::new(&[]);

    let before = fixture.snapshot(fixture.dir.path());
    fixture.run(&["-S", "--test", "a"], &confirm).unwrap();
    let after = fixture.snapshot(fixture.dir.path());

    assert_eq!(before, after);
    assert!(confirm.questions().is_empty());
    assert!(fixture.runner.calls().is_empty());
    // Archives were still fetched and checked, just not into the cache
    assert_eq!(fixture.fetcher.calls.lock().unwrap().len(), 3);
}

#[test]
fn test_simulation_reports_resolution_failures() {
    let fixture = Fixture::new();
    fixture.publish_synced(&[Pkg::new("lonely", "1.0-1").depends("ghost").depends("phantom")]);

    let result = fixture.run(&["-S", "--test", "lonely", "missing"], &Scripted::new(&[]));
    match result {
        Err(Error::Resolution(err)) => {
            assert!(err.issues.contains(&ResolutionIssue::TargetNotFound("missing".to_string())));
            let missing: Vec<_> = err
                .issues
                .iter()
                .filter(|i| matches!(i, ResolutionIssue::DependencyMissing { .. }))
                .collect();
            assert_eq!(missing.len(), 2);
        }
        other => panic!("expected a resolution error, got {:?}", other),
    }
}

#[test]
fn test_needed_is_a_no_op_when_current() {
    let fixture = Fixture::new();
    fixture.publish_synced(&chain());
    fixture.run(&["-S", "--noconfirm", "c"], &Scripted::new(&[])).unwrap();

    let confirm = Scripted::new(&[]);
    fixture.run(&["-S", "--needed", "c"], &confirm).unwrap();

    assert!(confirm.questions().is_empty());
    assert_eq!(changesets(&fixture).len(), 1);
}

#[test]
fn test_file_conflicts_and_overwrite() {
    let fixture = Fixture::new();
    fixture.publish_synced(&[
        Pkg::new("old", "1.0-1").file("usr/share/data/table", "old"),
        Pkg::new("new", "1.0-1").file("usr/share/data/table", "new"),
    ]);
    fixture.run(&["-S", "--noconfirm", "old"], &Scripted::new(&[])).unwrap();

    let err = fixture.run(&["-S", "--noconfirm", "new"], &Scripted::new(&[])).unwrap_err();
    assert_eq!(err.exit_code(), 4);
    match err {
        Error::Plan(plan) => {
            assert_eq!(plan.issues.len(), 1);
            match &plan.issues[0] {
                PlanIssue::FileConflict(conflict) => {
                    assert_eq!(conflict.path, "/usr/share/data/table");
                    assert_eq!(conflict.owner.as_deref(), Some("old"));
                }
                other => panic!("unexpected issue {:?}", other),
            }
        }
        other => panic!("expected a plan error, got {:?}", other),
    }
    assert_eq!(fixture.read_root("/usr/share/data/table").as_deref(), Some("old"));

    fixture
        .run(
            &["-S", "--noconfirm", "--overwrite", "/usr/share/data/*", "new"],
            &Scripted::new(&[]),
        )
        .unwrap();
    assert_eq!(fixture.read_root("/usr/share/data/table").as_deref(), Some("new"));

    let installed = fixture.installed();
    assert!(installed["new"].files.contains(&"/usr/share/data/table".to_string()));
    assert!(!installed["old"].files.contains(&"/usr/share/data/table".to_string()));
}

#[test]
fn test_rollback_returns_overwritten_files() {
    let fixture = Fixture::new();
    fixture.publish_synced(&[
        Pkg::new("old", "1.0-1").file("usr/share/data/table", "old"),
        Pkg::new("new", "1.0-1").file("usr/share/data/table", "new"),
        Pkg::new("viewer", "1.0-1")
            .depends("new")
            .file("usr/bin/viewer", "viewer")
            .scriptlet("pre_install() { FAIL; }\n"),
    ]);
    fixture.run(&["-S", "--noconfirm", "old"], &Scripted::new(&[])).unwrap();

    // new commits, taking the table from old; viewer then fails
    let err = fixture
        .run(
            &["-S", "--noconfirm", "--overwrite", "/usr/share/data/*", "viewer"],
            &Scripted::new(&[]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::CommitFailure { ref package, .. } if package == "viewer"));
    assert!(!fixture.installed()["old"].files.contains(&"/usr/share/data/table".to_string()));

    let ctx = fixture.context();
    let mut conn = rustpack::db::open(&ctx.local_db_path().to_string_lossy()).unwrap();
    let confirm = Scripted::new(&[]).with_recovery(RecoverMode::Rollback);
    let mut engine = TransactionEngine::new(&ctx, Box::new(&fixture.fetcher), Box::new(&confirm))
        .with_scriptlets(Box::new(&fixture.runner));
    engine.begin(&mut conn, None, false).unwrap();
    drop(engine);

    let installed = fixture.installed();
    assert_eq!(installed.len(), 1);
    assert!(installed["old"].files.contains(&"/usr/share/data/table".to_string()));
    assert_eq!(fixture.read_root("/usr/share/data/table").as_deref(), Some("old"));
    assert!(!fixture.journal_path().exists());
}

#[test]
fn test_upgrade_keeps_edited_config() {
    let fixture = Fixture::new();
    fixture.publish_synced(&[Pkg::new("tool", "1.0-1")
        .file("etc/tool.conf", "default1")
        .file("etc/tool.d/extra.conf", "extra1")
        .file("usr/bin/tool", "v1")
        .backup("etc/tool.conf")
        .backup("etc/tool.d/extra.conf")]);
    fixture.run(&["-S", "--noconfirm", "tool"], &Scripted::new(&[])).unwrap();
    fs::write(fixture.root_file("/etc/tool.conf"), "USER EDIT").unwrap();

    fixture.publish(&[Pkg::new("tool", "2.0-1")
        .file("etc/tool.conf", "default2")
        .file("etc/tool.d/extra.conf", "extra1")
        .file("usr/bin/tool", "v2")
        .backup("etc/tool.conf")
        .backup("etc/tool.d/extra.conf")]);
    fixture.run(&["-Syu", "--noconfirm"], &Scripted::new(&[])).unwrap();

    assert_eq!(fixture.installed()["tool"].version, "2.0-1");
    assert_eq!(fixture.read_root("/usr/bin/tool").as_deref(), Some("v2"));
    assert_eq!(fixture.read_root("/etc/tool.conf").as_deref(), Some("USER EDIT"));
    assert_eq!(fixture.read_root("/etc/tool.conf.pacnew").as_deref(), Some("default2"));
    // Identical contents need no .pacnew
    assert_eq!(fixture.read_root("/etc/tool.d/extra.conf").as_deref(), Some("extra1"));
    assert!(!fixture.root_file("/etc/tool.d/extra.conf.pacnew").exists());
}

#[test]
fn test_untracked_file_on_disk_conflicts() {
    let fixture = Fixture::new();
    fixture.publish_synced(&[Pkg::new("tool", "1.0-1").file("usr/bin/tool", "packaged")]);
    fs::create_dir_all(fixture.root_file("/usr/bin")).unwrap();
    fs::write(fixture.root_file("/usr/bin/tool"), "handmade").unwrap();

    let result = fixture.run(&["-S", "--noconfirm", "tool"], &Scripted::new(&[]));
    assert!(matches!(result, Err(Error::Plan(_))));
    assert_eq!(fixture.read_root("/usr/bin/tool").as_deref(), Some("handmade"));
    assert!(fixture.installed().is_empty());
}

#[test]
fn test_remove_refuses_to_break_dependents() {
    let fixture = Fixture::new();
    fixture.publish_synced(&chain());
    fixture.run(&["-S", "--noconfirm", "a"], &Scripted::new(&[])).unwrap();

    let result = fixture.run(&["-R", "--noconfirm", "c"], &Scripted::new(&[]));
    match result {
        Err(Error::Resolution(err)) => assert_eq!(
            err.issues,
            vec![ResolutionIssue::HasDependents {
                name: "c".to_string(),
                dependents: vec!["b".to_string()],
            }]
        ),
        other => panic!("expected a resolution error, got {:?}", other),
    }
    assert_eq!(fixture.installed().len(), 3);

    // -dd skips the check entirely
    fixture.run(&["-Rdd", "--noconfirm", "c"], &Scripted::new(&[])).unwrap();
    assert!(!fixture.installed().contains_key("c"));
}

#[test]
fn test_recursive_remove_takes_orphans() {
    let fixture = Fixture::new();
    fixture.publish_synced(&chain());
    fixture.run(&["-S", "--noconfirm", "a"], &Scripted::new(&[])).unwrap();
    let confirm = Scripted::new(&[true]);

    fixture.run(&["-Rs", "a"], &confirm).unwrap();

    assert_eq!(confirm.questions(), vec!["Do you want to remove these packages?".to_string()]);
    assert!(fixture.installed().is_empty());
    assert!(!fixture.root_file("/usr/bin/a").exists());
    assert!(!fixture.root_file("/usr/lib/libc3.so").exists());

    // Dependents go first
    let removals: Vec<String> = fixture
        .runner
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("pre_remove"))
        .collect();
    assert_eq!(removals, vec!["pre_remove 1.0-1", "pre_remove 2.0-1", "pre_remove 3.0-1"]);
}

#[test]
fn test_removed_backup_files_are_saved() {
    let fixture = Fixture::new();
    let app = Pkg::new("app", "1.0-1")
        .file("etc/app.conf", "default")
        .file("usr/bin/app", "bin")
        .backup("etc/app.conf");
    fixture.publish_synced(&[app]);

    fixture.run(&["-S", "--noconfirm", "app"], &Scripted::new(&[])).unwrap();
    fs::write(fixture.root_file("/etc/app.conf"), "tuned").unwrap();
    fixture.run(&["-R", "--noconfirm", "app"], &Scripted::new(&[])).unwrap();

    assert!(!fixture.root_file("/etc/app.conf").exists());
    assert_eq!(fixture.read_root("/etc/app.conf.pacsave").as_deref(), Some("tuned"));

    fs::remove_file(fixture.root_file("/etc/app.conf.pacsave")).unwrap();
    fixture.run(&["-S", "--noconfirm", "app"], &Scripted::new(&[])).unwrap();
    fixture.run(&["-Rn", "--noconfirm", "app"], &Scripted::new(&[])).unwrap();
    assert!(!fixture.root_file("/etc/app.conf.pacsave").exists());
}

#[test]
fn test_lock_contention() {
    let fixture = Fixture::new();
    fixture.publish_synced(&chain());

    let held = TransactionLock::acquire(&fixture.dbpath().join("db.lck")).unwrap();
    let err = fixture.run(&["-S", "--noconfirm", "c"], &Scripted::new(&[])).unwrap_err();
    assert!(matches!(err, Error::AlreadyLocked(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(fixture.installed().is_empty());

    // Queries never need the lock
    fixture.run(&["-Q"], &Scripted::new(&[])).unwrap();

    drop(held);
    fixture.run(&["-S", "--noconfirm", "c"], &Scripted::new(&[])).unwrap();
    assert!(fixture.installed().contains_key("c"));
}

#[test]
fn test_sysupgrade_replaces_files() {
    let fixture = Fixture::new();
    let scripts = "pre_upgrade() { :; }\n";
    fixture.publish_synced(&[Pkg::new("editor", "1.0-1")
        .file("usr/bin/editor", "v1")
        .file("usr/share/editor/legacy.txt", "legacy")
        .scriptlet(scripts)]);
    fixture.run(&["-S", "--noconfirm", "editor"], &Scripted::new(&[])).unwrap();

    fixture.publish(&[Pkg::new("editor", "1.1-1")
        .file("usr/bin/editor", "v2")
        .scriptlet(scripts)]);
    fixture.run(&["-Syu", "--noconfirm"], &Scripted::new(&[])).unwrap();

    let installed = fixture.installed();
    assert_eq!(installed["editor"].version, "1.1-1");
    assert_eq!(installed["editor"].reason, InstallReason::Explicit);
    assert_eq!(fixture.read_root("/usr/bin/editor").as_deref(), Some("v2"));
    assert!(!fixture.root_file("/usr/share/editor/legacy.txt").exists());
    assert!(fixture.runner.calls().contains(&"pre_upgrade 1.1-1 1.0-1".to_string()));

    let history = changesets(&fixture);
    assert_eq!(history[0].description, "upgrade editor");
}

#[test]
fn test_file_install_resolves_repository_dependencies() {
    let fixture = Fixture::new();
    fixture.publish_synced(&[Pkg::new("runtime", "2.0-1").file("usr/lib/runtime.so", "rt")]);
    let local = Pkg::new("plugin", "0.3-1")
        .depends("runtime")
        .file("usr/lib/plugins/plugin.so", "plugin")
        .build(&fixture.dir.path().join("build"));
    let local = local.to_string_lossy().to_string();

    fixture
        .run(&["-U", "--asdeps", "--noconfirm", &local], &Scripted::new(&[]))
        .unwrap();

    let installed = fixture.installed();
    assert_eq!(installed["plugin"].reason, InstallReason::Dependency);
    assert_eq!(installed["plugin"].repository, None);
    assert_eq!(installed["runtime"].reason, InstallReason::Dependency);
    assert!(fixture.root_file("/usr/lib/plugins/plugin.so").is_file());
}

#[test]
fn test_tampered_archive_is_rejected() {
    let fixture = Fixture::new();
    fixture.publish_synced(&chain());
    // Same name, different bytes than the database advertises
    fs::write(fixture.mirror().join("c-3.0-1-any.pkg.tar.gz"), b"not a package").unwrap();

    let err = fixture.run(&["-S", "--noconfirm", "c"], &Scripted::new(&[])).unwrap_err();
    assert!(matches!(err, Error::IntegrityFailure { .. }));
    assert_eq!(err.exit_code(), 5);
    assert!(fixture.installed().is_empty());
    assert!(!fixture.journal_path().exists());
}

#[test]
fn test_corrupt_cached_archive() {
    let fixture = Fixture::new();
    fixture.publish_synced(&chain());
    let cached = fixture.cachedir().join("c-3.0-1-any.pkg.tar.gz");
    fs::write(&cached, b"truncated").unwrap();

    // --test reports the failure but leaves the cache alone
    let before = fixture.snapshot(&fixture.cachedir());
    let err = fixture.run(&["-S", "--test", "c"], &Scripted::new(&[])).unwrap_err();
    assert!(matches!(err, Error::IntegrityFailure { .. }));
    assert_eq!(before, fixture.snapshot(&fixture.cachedir()));

    // A real run drops it so the next attempt downloads a fresh copy
    let err = fixture.run(&["-S", "--noconfirm", "c"], &Scripted::new(&[])).unwrap_err();
    assert!(matches!(err, Error::IntegrityFailure { .. }));
    assert!(!cached.exists());

    fixture.run(&["-S", "--noconfirm", "c"], &Scripted::new(&[])).unwrap();
    assert!(fixture.installed().contains_key("c"));
}

#[test]
fn test_interrupt_before_download_changes_nothing() {
    let fixture = Fixture::new();
    fixture.publish_synced(&chain());
    fixture.run(&["-S", "--noconfirm", "c"], &Scripted::new(&[])).unwrap();

    let root = fixture.snapshot(&fixture.root());
    let cache = fixture.snapshot(&fixture.cachedir());
    let installed = fixture.installed();

    let confirm = Scripted::new(&[]);
    let session = fixture.session(&confirm);
    session.interrupted.store(true, Ordering::SeqCst);
    let mut ctx = fixture.context();
    let err = commands::run(&common::parse(&["-S", "--noconfirm", "a"]), &mut ctx, &session).unwrap_err();

    assert!(matches!(err, Error::Interrupted));
    assert_eq!(err.exit_code(), 130);
    assert!(!fixture.dbpath().join("db.lck").exists());
    assert!(!fixture.journal_path().exists());
    assert_eq!(root, fixture.snapshot(&fixture.root()));
    assert_eq!(cache, fixture.snapshot(&fixture.cachedir()));
    assert_eq!(installed, fixture.installed());
    assert_eq!(changesets(&fixture).len(), 1);
}

/// lib installs, then app's pre_install fails mid-commit
fn interrupted_fixture() -> Fixture {
    let fixture = Fixture::new();
    fixture.publish_synced(&[
        Pkg::new("lib", "1.0-1").file("usr/lib/libx.so", "lib"),
        Pkg::new("app", "1.0-1")
            .depends("lib")
            .file("usr/bin/app", "app")
            .scriptlet("pre_install() { FAIL; }\n"),
    ]);

    let err = fixture.run(&["-S", "--noconfirm", "app"], &Scripted::new(&[])).unwrap_err();
    assert!(matches!(err, Error::CommitFailure { ref package, .. } if package == "app"));
    assert_eq!(err.exit_code(), 6);
    assert!(fixture.journal_path().exists());
    assert!(fixture.root_file("/usr/lib/libx.so").is_file());
    assert!(fixture.installed().contains_key("lib"));
    fixture
}

#[test]
fn test_interrupted_commit_blocks_new_transactions() {
    let fixture = interrupted_fixture();

    let err = fixture.run(&["-S", "app"], &Scripted::new(&[true])).unwrap_err();
    assert!(matches!(err, Error::InterruptedTransaction(_)));

    // --noconfirm never picks a recovery on its own
    let err = fixture.run(&["-S", "--noconfirm", "app"], &Scripted::new(&[])).unwrap_err();
    assert!(matches!(err, Error::InterruptedTransaction(_)));

    let err = fixture.run(&["-S", "--test", "app"], &Scripted::new(&[])).unwrap_err();
    assert!(matches!(err, Error::InterruptedTransaction(_)));
    assert!(fixture.journal_path().exists());
}

#[test]
fn test_rollback_restores_previous_state() {
    let fixture = interrupted_fixture();
    let ctx = fixture.context();
    let mut conn = rustpack::db::open(&ctx.local_db_path().to_string_lossy()).unwrap();
    let confirm = Scripted::new(&[]).with_recovery(RecoverMode::Rollback);

    let mut engine = TransactionEngine::new(&ctx, Box::new(&fixture.fetcher), Box::new(&confirm))
        .with_scriptlets(Box::new(&fixture.runner));
    engine.begin(&mut conn, None, false).unwrap();
    assert_eq!(engine.state(), TransactionState::Locked);
    drop(engine);

    assert!(!fixture.journal_path().exists());
    assert!(!fixture.root_file("/usr/lib/libx.so").exists());
    assert!(!fixture.root_file("/usr/bin/app").exists());
    assert!(fixture.installed().is_empty());
    assert_eq!(changesets(&fixture)[0].status, ChangesetStatus::RolledBack);
}

#[test]
fn test_resume_finishes_the_transaction() {
    let fixture = interrupted_fixture();
    fixture.runner.heal();

    fixture
        .run(
            &["-S", "--noconfirm", "--needed", "--recover", "resume", "app"],
            &Scripted::new(&[]),
        )
        .unwrap();

    assert!(!fixture.journal_path().exists());
    let installed = fixture.installed();
    assert_eq!(installed.len(), 2);
    assert_eq!(installed["app"].reason, InstallReason::Explicit);
    assert_eq!(fixture.read_root("/usr/bin/app").as_deref(), Some("app"));

    let history = changesets(&fixture);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ChangesetStatus::Applied);
}
