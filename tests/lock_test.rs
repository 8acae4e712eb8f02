mod helpers;

use std::time::{Duration, Instant};

use helpers::{save_fact, TestDir};
use mneme::cli;
use mneme::lock::{hold, ConcurrencyGuard, FileLock, LOCK_FILE};
use mneme::MemoryError;

#[test]
fn contended_lock_times_out_near_its_deadline() {
    let dir = TestDir::new();
    let path = dir.path().join(LOCK_FILE);

    let mut first = FileLock::new(&path, Duration::from_secs(1));
    let _held = hold(&mut first).unwrap();

    let timeout = Duration::from_millis(300);
    let mut second = FileLock::new(&path, timeout).with_poll_interval(Duration::from_millis(20));
    let started = Instant::now();
    let err = hold(&mut second).err().unwrap();
    let waited = started.elapsed();

    assert!(matches!(err, MemoryError::LockTimeout { .. }));
    assert!(waited >= timeout, "gave up early after {waited:?}");
    assert!(waited < timeout * 5, "waited far too long: {waited:?}");
    assert!(!second.is_held());
}

#[test]
fn lock_is_released_when_scope_ends() {
    let dir = TestDir::new();
    let path = dir.path().join("nested").join(LOCK_FILE);

    let mut first = FileLock::new(&path, Duration::from_millis(200));
    {
        let _held = hold(&mut first).unwrap();
        let pid = std::fs::read_to_string(&path).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
    }
    assert!(!first.is_held());

    let mut second = FileLock::new(&path, Duration::from_millis(200));
    assert!(second.acquire().unwrap());
    second.release();
}

#[test]
fn purge_under_contention_changes_nothing() {
    let dir = TestDir::new();
    let fact = save_fact(&dir.log, "do not touch", &[]);
    let before = std::fs::read_to_string(dir.log.today_path()).unwrap();

    let mut holder = FileLock::for_data_dir(dir.path(), &dir.config.lock);
    let _held = hold(&mut holder).unwrap();

    let err = cli::manage::purge(&dir.config, vec![fact.id.clone()]).unwrap_err();
    let err = err.downcast_ref::<MemoryError>().unwrap();
    assert_eq!(err.code(), "LOCK_TIMEOUT");
    assert_eq!(err.exit_code(), 1);

    assert_eq!(std::fs::read_to_string(dir.log.today_path()).unwrap(), before);
    assert!(!mneme::journal::manage::audit_path(&dir.log).exists());
}
