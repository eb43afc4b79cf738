//! In-memory driver for tests
//!
//! [`MockDriver`] records what the layers above it do (opens, transactions,
//! executed SQL per connection) and can inject failures, so pooling, locking
//! and statement behaviour can be checked without a database server.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::config::DatasourceConfig;
use super::driver::{Driver, DriverConnection, DriverStatement};
use crate::error::{QoreError, Result};
use crate::value::{Value, ValueHash, ValueList};

#[derive(Default)]
struct MockState {
    next_serial: AtomicU64,
    opens: AtomicUsize,
    closes: AtomicUsize,
    live: AtomicUsize,
    high_water: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    execs: AtomicUsize,
    prepares: AtomicUsize,
    fail_open: AtomicBool,
    fail_next: AtomicBool,
    abort_next: AtomicBool,
    fail_matching: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    rows: Mutex<Vec<ValueHash>>,
    log: Mutex<Vec<(u64, String)>>,
}

impl MockState {
    fn action(&self, serial: u64, aborted: &AtomicBool, sql: &str) -> Result<()> {
        self.check(aborted, sql)?;
        self.log.lock().push((serial, sql.to_string()));
        Ok(())
    }

    // Injected faults and delay, without logging
    fn check(&self, aborted: &AtomicBool, sql: &str) -> Result<()> {
        if aborted.load(Ordering::SeqCst) {
            return Err(QoreError::driver("mock", "connection is closed"));
        }
        if self.abort_next.swap(false, Ordering::SeqCst) {
            aborted.store(true, Ordering::SeqCst);
            return Err(QoreError::driver("mock", "server closed the connection unexpectedly"));
        }
        let matched = {
            let mut pending = self.fail_matching.lock();
            if pending.as_deref() == Some(sql) {
                pending.take().is_some()
            } else {
                false
            }
        };
        if matched || self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(QoreError::driver("mock", format!("error executing '{}'", sql)));
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        Ok(())
    }

    fn rows(&self) -> Vec<ValueHash> {
        self.rows.lock().clone()
    }
}

/// Driver that keeps everything in memory.
///
/// Every query returns the configured rows; every statement succeeds unless
/// a failure was injected.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    /// Create a driver with no rows
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a driver whose queries return `rows`
    pub fn with_rows(rows: Vec<ValueHash>) -> Arc<Self> {
        let driver = Self::default();
        *driver.state.rows.lock() = rows;
        Arc::new(driver)
    }

    /// Replace the rows returned by queries
    pub fn set_rows(&self, rows: Vec<ValueHash>) {
        *self.state.rows.lock() = rows;
    }

    /// Make the next open fail
    pub fn fail_next_open(&self) {
        self.state.fail_open.store(true, Ordering::SeqCst);
    }

    /// Make the next action on any connection fail
    pub fn fail_next_action(&self) {
        self.state.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make the next action running exactly `sql` fail
    pub fn fail_next_matching(&self, sql: &str) {
        *self.state.fail_matching.lock() = Some(sql.to_string());
    }

    /// Drop the connection used by the next action
    pub fn abort_next_action(&self) {
        self.state.abort_next.store(true, Ordering::SeqCst);
    }

    /// Sleep this long in every action
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.state.delay.lock() = delay;
    }

    /// Connections opened so far
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Connections closed explicitly
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Connections currently open
    pub fn live_connections(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Most connections ever open at once
    pub fn high_water(&self) -> usize {
        self.state.high_water.load(Ordering::SeqCst)
    }

    /// Transactions started
    pub fn begins(&self) -> usize {
        self.state.begins.load(Ordering::SeqCst)
    }

    /// Commits
    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    /// Rollbacks
    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }

    /// Statements executed, direct or prepared
    pub fn execs(&self) -> usize {
        self.state.execs.load(Ordering::SeqCst)
    }

    /// Statements prepared
    pub fn prepares(&self) -> usize {
        self.state.prepares.load(Ordering::SeqCst)
    }

    /// Every logged action as `(connection serial, sql)`
    pub fn executed(&self) -> Vec<(u64, String)> {
        self.state.log.lock().clone()
    }

    /// Serial of the connection that ran `sql` most recently
    pub fn connection_for(&self, sql: &str) -> Option<u64> {
        self.state
            .log
            .lock()
            .iter()
            .rev()
            .find(|(_, s)| s == sql)
            .map(|(serial, _)| *serial)
    }

    /// SQL run on connection `serial`, in order
    pub fn executed_on(&self, serial: u64) -> Vec<String> {
        self.state
            .log
            .lock()
            .iter()
            .filter(|(s, _)| *s == serial)
            .map(|(_, sql)| sql.clone())
            .collect()
    }
}

impl fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDriver")
            .field("opens", &self.opens())
            .field("live", &self.live_connections())
            .finish()
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn open(&self, config: &DatasourceConfig) -> Result<Box<dyn DriverConnection>> {
        if self.state.fail_open.swap(false, Ordering::SeqCst) {
            return Err(QoreError::driver(
                "mock",
                format!("cannot connect to '{}'", config.database),
            ));
        }
        let serial = self.state.next_serial.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.high_water.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            serial,
            state: Arc::clone(&self.state),
            aborted: Arc::new(AtomicBool::new(false)),
            closed: false,
        }))
    }
}

struct MockConnection {
    serial: u64,
    state: Arc<MockState>,
    aborted: Arc<AtomicBool>,
    closed: bool,
}

impl MockConnection {
    fn action(&self, sql: &str) -> Result<()> {
        self.state.action(self.serial, &self.aborted, sql)
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn rows_as_columns(rows: &[ValueHash]) -> Result<Value> {
    let mut columns = ValueHash::new();
    for row in rows {
        for (name, value) in row.iter() {
            let value = value.clone();
            columns.with_value_mut(name, |slot| -> Result<()> {
                if slot.is_nothing() {
                    *slot = Value::list(ValueList::new());
                }
                match slot.list_mut() {
                    Some(list) => list.push(value),
                    None => Ok(()),
                }
            })?;
        }
    }
    Ok(Value::hash(columns))
}

fn rows_as_list(rows: Vec<ValueHash>) -> Value {
    Value::list(rows.into_iter().map(Value::hash).collect())
}

impl DriverConnection for MockConnection {
    fn select(&mut self, sql: &str, _args: &[Value]) -> Result<Value> {
        self.action(sql)?;
        rows_as_columns(&self.state.rows())
    }

    fn select_rows(&mut self, sql: &str, _args: &[Value]) -> Result<Value> {
        self.action(sql)?;
        Ok(rows_as_list(self.state.rows()))
    }

    fn exec(&mut self, sql: &str, _args: &[Value]) -> Result<Value> {
        self.action(sql)?;
        self.state.execs.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(1))
    }

    fn exec_raw(&mut self, sql: &str) -> Result<Value> {
        self.exec(sql, &[])
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.action("begin")?;
        self.state.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.action("commit")?;
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.action("rollback")?;
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn prepare(&mut self, sql: &str, args: &[Value], raw: bool) -> Result<Box<dyn DriverStatement>> {
        self.state.check(&self.aborted, sql)?;
        self.state.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStatement {
            serial: self.serial,
            state: Arc::clone(&self.state),
            aborted: Arc::clone(&self.aborted),
            sql: sql.to_string(),
            args: if raw { Vec::new() } else { args.to_vec() },
            rows: Vec::new(),
            pos: None,
            executed: false,
        }))
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn server_version(&mut self) -> Result<Value> {
        self.action("version")?;
        Ok(Value::string("mock 1.0"))
    }

    fn close(&mut self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.release();
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.release();
    }
}

struct MockStatement {
    serial: u64,
    state: Arc<MockState>,
    aborted: Arc<AtomicBool>,
    sql: String,
    args: Vec<Value>,
    rows: Vec<ValueHash>,
    pos: Option<usize>,
    executed: bool,
}

impl MockStatement {
    fn is_query(&self) -> bool {
        self.sql.trim_start().to_ascii_lowercase().starts_with("select")
    }

    fn require_executed(&self, what: &str) -> Result<()> {
        if self.executed {
            Ok(())
        } else {
            Err(QoreError::driver("mock", format!("{} before exec", what)))
        }
    }
}

impl DriverStatement for MockStatement {
    fn bind(&mut self, args: &[Value]) -> Result<()> {
        self.args = args.to_vec();
        Ok(())
    }

    fn exec(&mut self) -> Result<()> {
        self.state.action(self.serial, &self.aborted, &self.sql)?;
        self.state.execs.fetch_add(1, Ordering::SeqCst);
        self.rows = if self.is_query() { self.state.rows() } else { Vec::new() };
        self.pos = None;
        self.executed = true;
        Ok(())
    }

    fn define(&mut self) -> Result<()> {
        self.require_executed("define")
    }

    fn describe(&mut self) -> Result<Value> {
        self.require_executed("describe")?;
        let mut desc = ValueHash::new();
        if let Some(first) = self.rows.first() {
            for (name, value) in first.iter() {
                desc.set(name, Value::string(value.type_name()));
            }
        }
        Ok(Value::hash(desc))
    }

    fn next(&mut self) -> Result<bool> {
        self.require_executed("next")?;
        if self.aborted.load(Ordering::SeqCst) {
            return Err(QoreError::driver("mock", "connection is closed"));
        }
        let next = self.pos.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.pos = Some(next);
            Ok(true)
        } else {
            self.pos = Some(self.rows.len());
            Ok(false)
        }
    }

    fn current_row(&self) -> Result<Value> {
        match self.pos.and_then(|p| self.rows.get(p)) {
            Some(row) => Ok(Value::hash(row.clone())),
            None => Err(QoreError::driver("mock", "no current row")),
        }
    }

    fn affected_rows(&self) -> Result<i64> {
        self.require_executed("affected_rows")?;
        if self.is_query() {
            return Ok(0);
        }
        // array binds affect one row per element
        let rows = self
            .args
            .iter()
            .filter_map(|a| a.as_list().map(|l| l.len()))
            .max()
            .unwrap_or(1);
        Ok(rows as i64)
    }

    fn close(&mut self) -> Result<()> {
        self.rows.clear();
        self.pos = None;
        Ok(())
    }
}

/// Rows `{id: n, name: "row<n>"}` for `n` in `1..=count`
pub fn sample_rows(count: usize) -> Vec<ValueHash> {
    (1..=count as i64)
        .map(|n| {
            let mut row = ValueHash::new();
            row.set("id", Value::Int(n));
            row.set("name", Value::string(format!("row{}", n)));
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_connections() {
        let driver = MockDriver::new();
        let cfg = DatasourceConfig::new("mock", "db");
        let mut a = driver.open(&cfg).unwrap();
        let b = driver.open(&cfg).unwrap();
        assert_eq!(driver.live_connections(), 2);
        a.close().unwrap();
        drop(b);
        assert_eq!(driver.live_connections(), 0);
        assert_eq!(driver.high_water(), 2);
        assert_eq!(driver.closes(), 1);
    }

    #[test]
    fn test_fault_injection() {
        let driver = MockDriver::new();
        let cfg = DatasourceConfig::new("mock", "db");
        driver.fail_next_open();
        assert!(driver.open(&cfg).is_err());
        let mut conn = driver.open(&cfg).unwrap();
        driver.fail_next_action();
        assert!(conn.exec("insert", &[]).is_err());
        assert!(!conn.is_aborted());
        driver.abort_next_action();
        assert!(conn.exec("insert", &[]).is_err());
        assert!(conn.is_aborted());
    }

    #[test]
    fn test_statement_walks_rows() {
        let driver = MockDriver::with_rows(sample_rows(2));
        let mut conn = driver.open(&DatasourceConfig::new("mock", "db")).unwrap();
        let mut stmt = conn.prepare("select * from t", &[], false).unwrap();
        stmt.exec().unwrap();
        let rows = stmt.fetch_rows(None).unwrap();
        assert_eq!(rows.as_list().unwrap().len(), 2);
        assert!(!stmt.next().unwrap());
    }
}
