//! Tests for datasource pools

use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use qore_runtime::sql::testing::{sample_rows, MockDriver};
use qore_runtime::sql::{DatasourceConfig, DatasourcePool, PoolConfig};

fn pool(driver: &Arc<MockDriver>, min: usize, max: usize) -> Arc<DatasourcePool> {
    let config = PoolConfig::new(DatasourceConfig::new("mock", "inventory"))
        .with_min(min)
        .with_max(max);
    DatasourcePool::new(driver.clone(), config).unwrap()
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_transaction_stays_on_one_connection() {
    let driver = MockDriver::with_rows(sample_rows(1));
    let pool = pool(&driver, 1, 2);

    let (started_tx, started_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let worker_pool = Arc::clone(&pool);
    let worker = thread::spawn(move || {
        worker_pool.exec("insert into stock values (1)", &[]).unwrap();
        started_tx.send(()).unwrap();
        go_rx.recv().unwrap();
        worker_pool.exec("insert into stock values (2)", &[]).unwrap();
        worker_pool.commit().unwrap();
        assert!(!worker_pool.has_connection());
    });

    started_rx.recv().unwrap();
    // the worker's connection is not available to other threads
    pool.select("select * from stock", &[]).unwrap();
    assert!(!pool.has_connection());
    go_tx.send(()).unwrap();
    worker.join().unwrap();

    let txn = driver.connection_for("insert into stock values (1)").unwrap();
    assert_eq!(driver.connection_for("insert into stock values (2)"), Some(txn));
    assert_ne!(driver.connection_for("select * from stock"), Some(txn));
    assert_eq!(
        driver.executed_on(txn),
        vec![
            "begin".to_string(),
            "insert into stock values (1)".to_string(),
            "insert into stock values (2)".to_string(),
            "commit".to_string(),
        ]
    );
    assert_eq!(driver.opens(), 2);
}

#[test]
fn test_capacity_bound_blocks_extra_threads() {
    let driver = MockDriver::new();
    let pool = pool(&driver, 1, 2);
    let holding = Arc::new(Barrier::new(3));
    let release = Arc::new(Barrier::new(3));

    let holders: Vec<_> = (0..2)
        .map(|i| {
            let pool = Arc::clone(&pool);
            let holding = Arc::clone(&holding);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                pool.exec(&format!("insert into stock values ({})", i), &[]).unwrap();
                holding.wait();
                release.wait();
                pool.commit().unwrap();
            })
        })
        .collect();
    holding.wait();
    assert_eq!(pool.usage().in_use, 2);

    let (done_tx, done_rx) = mpsc::channel();
    let extra_pool = Arc::clone(&pool);
    let extra = thread::spawn(move || {
        extra_pool.select("select count(*) from stock", &[]).unwrap();
        done_tx.send(()).unwrap();
    });

    wait_for(|| pool.usage().waiting == 1);
    assert!(done_rx.try_recv().is_err());
    assert_eq!(pool.usage().current, 2);

    release.wait();
    for h in holders {
        h.join().unwrap();
    }
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    extra.join().unwrap();

    assert!(driver.high_water() <= 2);
    assert_eq!(driver.commits(), 2);
    assert!(pool.stats().waits >= 1);
    let usage = pool.usage();
    assert_eq!(usage.in_use, 0);
    assert_eq!(usage.waiting, 0);
    assert_eq!(usage.free, 2);
}

#[test]
fn test_many_threads_never_exceed_max() {
    let driver = MockDriver::with_rows(sample_rows(2));
    driver.set_delay(Some(Duration::from_millis(1)));
    let pool = pool(&driver, 1, 3);

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for j in 0..5 {
                    pool.exec(&format!("insert into log values ({}, {})", i, j), &[]).unwrap();
                    pool.select_rows("select * from log", &[]).unwrap();
                    pool.commit().unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    assert!(driver.high_water() <= 3, "high water {}", driver.high_water());
    assert_eq!(driver.commits(), 40);
    let usage = pool.usage();
    assert!(usage.current <= 3);
    assert_eq!(usage.in_use, 0);
}

#[test]
fn test_thread_exit_returns_connection() {
    let driver = MockDriver::new();
    let pool = pool(&driver, 1, 1);
    let worker_pool = Arc::clone(&pool);
    thread::spawn(move || {
        worker_pool.exec("update stock set n = 0", &[]).unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(driver.rollbacks(), 1);
    let usage = pool.usage();
    assert_eq!(usage.in_use, 0);
    assert_eq!(usage.free, 1);
    // the single connection is usable again
    pool.exec("update stock set n = 1", &[]).unwrap();
    pool.commit().unwrap();
}

#[test]
fn test_failed_first_statement_rolls_back_and_frees() {
    let driver = MockDriver::new();
    let pool = pool(&driver, 1, 1);
    driver.fail_next_matching("insert into stock values (1)");
    assert!(pool.exec("insert into stock values (1)", &[]).is_err());
    assert_eq!(driver.rollbacks(), 1);
    assert!(!pool.has_connection());
    assert_eq!(pool.usage().free, 1);
}

#[test]
fn test_pool_from_datasource_string() {
    let config = PoolConfig::from_datasource_string("mock:inventory{min=2,max=4}").unwrap();
    assert_eq!((config.min, config.max), (2, 4));
    assert!(config.datasource.options.is_empty());

    let driver = MockDriver::new();
    let pool = DatasourcePool::new(driver.clone(), config).unwrap();
    assert_eq!(driver.opens(), 2);
    assert_eq!(pool.usage().free, 2);

    assert!(PoolConfig::from_datasource_string("mock:inventory{min=5,max=2}").is_err());
    assert!(PoolConfig::from_datasource_string("mock:inventory{max=lots}").is_err());
}
