//! Tests for prepared statements over managed and pooled datasources

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use qore_runtime::sql::testing::{sample_rows, MockDriver};
use qore_runtime::sql::{
    DatasourceConfig, DatasourcePool, DatasourceStatementHelper, ManagedDatasource, PoolConfig, StatementStatus,
};
use qore_runtime::*;

fn managed(rows: usize, autocommit: bool) -> (Arc<MockDriver>, Arc<ManagedDatasource>) {
    let driver = MockDriver::with_rows(sample_rows(rows));
    let config = DatasourceConfig::new("mock", "shop").with_autocommit(autocommit);
    let ds = ManagedDatasource::new(driver.clone(), config);
    (driver, ds)
}

#[test]
fn test_status_walks_forward_on_demand() {
    let (_, ds) = managed(3, true);
    let stmt = ds.statement().unwrap();
    assert_eq!(stmt.status(), StatementStatus::Idle);
    assert!(!stmt.active());

    stmt.prepare("select * from items", vec![]).unwrap();
    assert_eq!(stmt.sql().as_deref(), Some("select * from items"));
    assert_eq!(stmt.status(), StatementStatus::Idle);

    let desc = stmt.describe().unwrap();
    assert_eq!(stmt.status(), StatementStatus::Executed);
    assert_eq!(desc.as_hash().unwrap().get_value("id"), Value::string("int"));
    assert_eq!(stmt.affected_rows().unwrap(), 0);

    stmt.define().unwrap();
    assert_eq!(stmt.status(), StatementStatus::Defined);
    assert!(stmt.active());

    let first_two = stmt.fetch_rows(Some(2)).unwrap();
    assert_eq!(first_two.as_list().unwrap().len(), 2);
    let rest = stmt.fetch_columns(None).unwrap();
    assert_eq!(rest.as_hash().unwrap().get_value("name"), Value::from(vec!["row3"]));
    assert!(!stmt.next().unwrap());

    stmt.close().unwrap();
    assert_eq!(stmt.status(), StatementStatus::Idle);
    assert_eq!(ds.lock_owner(), None);
}

#[test]
fn test_status_names_and_order() {
    assert!(StatementStatus::Idle < StatementStatus::Prepared);
    assert!(StatementStatus::Prepared < StatementStatus::Executed);
    assert!(StatementStatus::Executed < StatementStatus::Defined);
    assert_eq!(StatementStatus::Defined.to_string(), "defined");
    assert_eq!(StatementStatus::Idle.name(), "idle");
}

#[test]
fn test_actions_without_sql_fail() {
    let (driver, ds) = managed(1, true);
    let stmt = ds.statement().unwrap();
    for err in [
        stmt.exec().unwrap_err(),
        stmt.next().unwrap_err(),
        stmt.describe().unwrap_err(),
        stmt.bind(vec![Value::Int(1)]).unwrap_err(),
    ] {
        assert_eq!(err.code(), "SQLSTATEMENT-ERROR");
        assert_eq!(err.category(), ErrorCategory::StatementStatus);
    }
    // closing an idle statement is a no-op
    stmt.close().unwrap();
    assert_eq!(driver.opens(), 0);
    assert_eq!(ds.lock_owner(), None);
}

#[test]
fn test_exec_reports_affected_rows_and_reruns() {
    let (driver, ds) = managed(0, true);
    let stmt = ds.statement().unwrap();
    let ids = Value::from(vec![10i64, 11, 12]);
    stmt.prepare("insert into items (id) values (%v)", vec![ids]).unwrap();
    assert_eq!(stmt.exec().unwrap(), 3);
    assert_eq!(stmt.exec().unwrap(), 3);
    assert_eq!(driver.execs(), 2);
    assert_eq!(driver.prepares(), 2);
    stmt.close().unwrap();
}

#[test]
fn test_reset_datasource_invalidates_open_statement() {
    let (driver, ds) = managed(3, true);
    let stmt = ds.statement().unwrap();
    stmt.prepare("select * from items", vec![]).unwrap();
    assert!(stmt.next().unwrap());
    let serial_before = driver.connection_for("select * from items").unwrap();

    ds.reset().unwrap();
    assert_eq!(driver.opens(), 2);

    let err = stmt.next().unwrap_err();
    assert!(matches!(err, QoreError::CrossConnection { .. }));
    assert_eq!(err.code(), "SQLSTATEMENT-CONNECTION-ERROR");
    assert_eq!(ds.lock_owner(), None);

    stmt.close().unwrap();
    assert_eq!(stmt.status(), StatementStatus::Idle);
    assert_eq!(ds.lock_owner(), None);

    // a fresh prepare runs on the new connection
    assert!(stmt.next().unwrap());
    let serial_after = driver.connection_for("select * from items").unwrap();
    assert_ne!(serial_before, serial_after);
    stmt.close().unwrap();
}

#[test]
fn test_open_statement_blocks_other_threads() {
    let (_, ds) = managed(2, true);
    ds.set_lock_timeout_ms(100);
    let stmt = ds.statement().unwrap();
    stmt.prepare("select * from items", vec![]).unwrap();
    assert!(stmt.next().unwrap());

    let other = Arc::clone(&ds);
    let err = thread::spawn(move || other.select("select 1", &[]).unwrap_err())
        .join()
        .unwrap();
    assert_eq!(err.code(), "TRANSACTION-LOCK-TIMEOUT");

    stmt.close().unwrap();
    let other = Arc::clone(&ds);
    thread::spawn(move || other.select("select 1", &[]).unwrap())
        .join()
        .unwrap();
}

#[test]
fn test_statement_commit_ends_transaction() {
    let (driver, ds) = managed(0, false);
    let stmt = ds.statement().unwrap();
    stmt.prepare("update items set price = price * 2", vec![]).unwrap();
    stmt.exec().unwrap();
    assert!(ds.is_in_transaction());
    stmt.rollback().unwrap();
    assert!(!ds.is_in_transaction());
    assert_eq!(driver.rollbacks(), 1);
    assert_eq!(ds.lock_owner(), None);

    stmt.begin_transaction().unwrap();
    stmt.prepare("update items set price = 0", vec![]).unwrap();
    stmt.exec().unwrap();
    stmt.commit().unwrap();
    assert_eq!(driver.commits(), 1);
    assert_eq!(ds.lock_owner(), None);
}

#[test]
fn test_statement_outlives_caller_handle() {
    let (_, ds) = managed(1, true);
    let stmt = ds.statement().unwrap();
    drop(ds);
    stmt.prepare("select * from items", vec![]).unwrap();
    assert!(stmt.fetch_row().unwrap().is_some());
    assert!(stmt.fetch_row().unwrap().is_none());
}

#[test]
fn test_pooled_statement_keeps_its_connection() {
    let driver = MockDriver::with_rows(sample_rows(2));
    let config = PoolConfig::new(DatasourceConfig::new("mock", "shop")).with_min(1).with_max(1);
    let pool = DatasourcePool::new(driver.clone(), config).unwrap();

    let stmt = pool.statement().unwrap();
    stmt.prepare("select * from items", vec![]).unwrap();
    assert!(stmt.next().unwrap());
    assert!(pool.has_connection());

    let (done_tx, done_rx) = mpsc::channel();
    let other_pool = Arc::clone(&pool);
    let other = thread::spawn(move || {
        other_pool.select("select 1", &[]).unwrap();
        done_tx.send(()).unwrap();
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.usage().waiting == 0 {
        assert!(Instant::now() < deadline, "other thread never waited");
        thread::sleep(Duration::from_millis(2));
    }
    assert!(stmt.next().unwrap());
    assert!(!stmt.next().unwrap());
    assert!(done_rx.try_recv().is_err());

    stmt.commit().unwrap();
    assert!(!pool.has_connection());
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    other.join().unwrap();

    let serial = driver.connection_for("select * from items").unwrap();
    assert_eq!(driver.connection_for("select 1"), Some(serial));
    assert_eq!(driver.opens(), 1);
}

#[test]
fn test_dropping_statement_on_pool_frees_connection() {
    let driver = MockDriver::with_rows(sample_rows(2));
    let config = PoolConfig::new(DatasourceConfig::new("mock", "shop").with_autocommit(true)).with_max(1);
    let pool = DatasourcePool::new(driver.clone(), config).unwrap();
    {
        let stmt = pool.statement().unwrap();
        stmt.prepare("select * from items", vec![]).unwrap();
        stmt.next().unwrap();
        assert!(pool.has_connection());
    }
    assert!(!pool.has_connection());
    assert_eq!(pool.usage().free, 1);
}

#[test]
fn test_pooled_bound_statement_keeps_its_connection() {
    let driver = MockDriver::with_rows(sample_rows(2));
    let config = PoolConfig::new(DatasourceConfig::new("mock", "shop").with_autocommit(true))
        .with_min(1)
        .with_max(2);
    let pool = DatasourcePool::new(driver.clone(), config).unwrap();

    let stmt = pool.statement().unwrap();
    stmt.prepare("insert into items (id) values (%v)", vec![Value::Int(1)]).unwrap();
    stmt.bind(vec![Value::Int(2)]).unwrap();
    assert_eq!(stmt.status(), StatementStatus::Prepared);
    assert!(pool.has_connection());

    // another thread opens a result set while the bound statement waits to run
    let (open_tx, open_rx) = mpsc::channel();
    let (close_tx, close_rx) = mpsc::channel::<()>();
    let other_pool = Arc::clone(&pool);
    let other = thread::spawn(move || {
        let reader = other_pool.statement().unwrap();
        reader.prepare("select * from items", vec![]).unwrap();
        assert!(reader.next().unwrap());
        open_tx.send(()).unwrap();
        close_rx.recv().unwrap();
        reader.close().unwrap();
    });
    open_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert_eq!(stmt.exec().unwrap(), 1);
    close_tx.send(()).unwrap();
    other.join().unwrap();
    stmt.close().unwrap();
    assert!(!pool.has_connection());

    let writer = driver.connection_for("insert into items (id) values (%v)").unwrap();
    let reader = driver.connection_for("select * from items").unwrap();
    assert_ne!(writer, reader);
    assert_eq!(driver.opens(), 2);
    assert_eq!(pool.usage().free, 2);
}
