//! Prepared statement lifecycle
//!
//! A statement moves forward through `Idle -> Prepared -> Executed -> Defined`
//! and back to `Idle` on close. Every operation names the status it needs;
//! missing intermediate steps run automatically, so fetching from a freshly
//! prepared statement executes it first.
//!
//! The statement owns no connection. Each action borrows one from its
//! [`DatasourceStatementHelper`]; once prepared on a connection the
//! statement asks the helper to keep that connection until it is closed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::datasource::Datasource;
use super::driver::DriverStatement;
use super::helper::{DatasourceStatementHelper, HelperCommand};
use crate::error::{ExceptionSink, QoreError, Result};
use crate::value::Value;

static NEXT_STATEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle status of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatementStatus {
    /// No driver handle
    Idle,
    /// Prepared on a connection
    Prepared,
    /// Executed
    Executed,
    /// Output bound; rows can be fetched
    Defined,
}

impl StatementStatus {
    /// Lowercase status name
    pub fn name(self) -> &'static str {
        match self {
            StatementStatus::Idle => "idle",
            StatementStatus::Prepared => "prepared",
            StatementStatus::Executed => "executed",
            StatementStatus::Defined => "defined",
        }
    }
}

impl fmt::Display for StatementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct StatementInner {
    status: StatementStatus,
    sql: Option<String>,
    args: Vec<Value>,
    raw: bool,
    driver: Option<Box<dyn DriverStatement>>,
    connection_id: u64,
    holding: bool,
}

impl StatementInner {
    fn driver_mut(&mut self, action: &str) -> Result<&mut Box<dyn DriverStatement>> {
        let status = self.status;
        self.driver.as_mut().ok_or_else(|| QoreError::StatementStatus {
            action: action.to_string(),
            expected: StatementStatus::Prepared.name().to_string(),
            actual: status.name().to_string(),
            message: "the statement has no driver handle".to_string(),
        })
    }

    fn check_connection(&self, ds: &Datasource) -> Result<()> {
        if self.status != StatementStatus::Idle && self.connection_id != ds.connection_id() {
            return Err(QoreError::CrossConnection {
                sql: self.sql.clone().unwrap_or_default(),
                prepared_on: self.connection_id,
                requested: ds.connection_id(),
            });
        }
        Ok(())
    }

    fn advance(&mut self, ds: &mut Datasource, action: &str) -> Result<()> {
        match self.status {
            StatementStatus::Idle => {
                let sql = self.sql.clone().unwrap_or_default();
                let stmt = ds.prepare_statement(&sql, &self.args, self.raw)?;
                self.driver = Some(stmt);
                self.connection_id = ds.connection_id();
                self.status = StatementStatus::Prepared;
            }
            StatementStatus::Prepared => {
                let stmt = self.driver_mut(action)?;
                ds.with_connection(action, true, |_| stmt.exec())?;
                self.status = StatementStatus::Executed;
            }
            StatementStatus::Executed => {
                let stmt = self.driver_mut(action)?;
                ds.with_connection(action, false, |_| stmt.define())?;
                self.status = StatementStatus::Defined;
            }
            StatementStatus::Defined => {}
        }
        tracing::trace!(statement = ?self.sql, status = %self.status, "statement advanced");
        Ok(())
    }

    fn check_status(&mut self, ds: &mut Datasource, want: StatementStatus, action: &str) -> Result<()> {
        while self.status < want {
            self.advance(ds, action)?;
        }
        Ok(())
    }

    // Closes the driver handle; the statement is idle afterwards either way.
    fn discard(&mut self, ds: &mut Datasource) -> Result<()> {
        let result = match self.driver.take() {
            Some(mut stmt) if ds.is_open() && ds.connection_id() == self.connection_id => {
                ds.with_connection("close", false, |_| stmt.close())
            }
            _ => Ok(()),
        };
        self.status = StatementStatus::Idle;
        self.connection_id = 0;
        result
    }

    fn reset_after_abort(&mut self) {
        self.driver = None;
        self.status = StatementStatus::Idle;
        self.connection_id = 0;
    }

    fn hold_command(&mut self) -> HelperCommand {
        // the driver handle is tied to the connection it was prepared on
        let active = self.status >= StatementStatus::Prepared;
        match (active, self.holding) {
            (true, false) => {
                self.holding = true;
                HelperCommand::Acquire
            }
            (false, true) => {
                self.holding = false;
                HelperCommand::Release
            }
            _ => HelperCommand::NoChange,
        }
    }
}

/// A prepared SQL statement.
///
/// ```
/// use qore_runtime::sql::testing::{sample_rows, MockDriver};
/// use qore_runtime::sql::{DatasourceConfig, DatasourceStatementHelper, ManagedDatasource};
///
/// let driver = MockDriver::with_rows(sample_rows(3));
/// let ds = ManagedDatasource::new(driver, DatasourceConfig::new("mock", "db").with_autocommit(true));
/// let stmt = ds.statement().unwrap();
/// stmt.prepare("select * from items", vec![]).unwrap();
/// let mut count = 0;
/// while stmt.next().unwrap() {
///     count += 1;
/// }
/// assert_eq!(count, 3);
/// stmt.close().unwrap();
/// ```
pub struct SqlStatement {
    id: u64,
    helper: Arc<dyn DatasourceStatementHelper>,
    inner: Mutex<StatementInner>,
}

impl SqlStatement {
    /// Create an idle statement bound to `helper`
    pub fn new(helper: Arc<dyn DatasourceStatementHelper>) -> Self {
        Self {
            id: NEXT_STATEMENT_ID.fetch_add(1, Ordering::Relaxed),
            helper,
            inner: Mutex::new(StatementInner {
                status: StatementStatus::Idle,
                sql: None,
                args: Vec::new(),
                raw: false,
                driver: None,
                connection_id: 0,
                holding: false,
            }),
        }
    }

    /// Unique statement id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current status
    pub fn status(&self) -> StatementStatus {
        self.inner.lock().status
    }

    /// True unless idle
    pub fn active(&self) -> bool {
        self.status() != StatementStatus::Idle
    }

    /// SQL text set by the last prepare
    pub fn sql(&self) -> Option<String> {
        self.inner.lock().sql.clone()
    }

    // Borrow a connection from the helper for one action.
    fn bracket<T>(
        &self,
        inner: &mut StatementInner,
        f: impl FnOnce(&mut StatementInner, &mut Datasource) -> Result<T>,
    ) -> Result<T> {
        let action = self.helper.helper_start_action()?;
        let result = {
            let mut ds = action.datasource.lock();
            let result = f(inner, &mut ds);
            if result.is_err() && action.new_transaction && ds.is_in_transaction() {
                if let Err(e) = ds.rollback() {
                    tracing::warn!(statement = self.id, error = %e, "rollback after failed statement action");
                }
            }
            result
        };
        if let Err(QoreError::ConnectionAborted { .. }) = &result {
            inner.reset_after_abort();
        }
        let command = inner.hold_command();
        let ended = self.helper.helper_end_action(command, action.new_transaction);
        let value = result?;
        ended?;
        Ok(value)
    }

    fn run<T>(
        &self,
        action: &str,
        want: Option<StatementStatus>,
        f: impl FnOnce(&mut StatementInner, &mut Datasource) -> Result<T>,
    ) -> Result<T> {
        let mut inner = self.inner.lock();
        if inner.sql.is_none() {
            return Err(QoreError::StatementStatus {
                action: action.to_string(),
                expected: want.unwrap_or(StatementStatus::Prepared).name().to_string(),
                actual: inner.status.name().to_string(),
                message: "no SQL has been prepared".to_string(),
            });
        }
        self.bracket(&mut inner, |inner, ds| {
            inner.check_connection(ds)?;
            if let Some(want) = want {
                inner.check_status(ds, want, action)?;
            }
            f(inner, ds)
        })
    }

    fn set_sql(&self, sql: &str, args: Vec<Value>, raw: bool) -> Result<()> {
        self.close()?;
        let mut inner = self.inner.lock();
        inner.sql = Some(sql.to_string());
        inner.args = args;
        inner.raw = raw;
        Ok(())
    }

    /// Set the SQL and bind arguments; the driver prepare happens on first use.
    ///
    /// An active statement is closed first.
    pub fn prepare(&self, sql: &str, args: Vec<Value>) -> Result<()> {
        self.set_sql(sql, args, false)
    }

    /// Like [`prepare`](Self::prepare) but without placeholder processing
    pub fn prepare_raw(&self, sql: &str) -> Result<()> {
        self.set_sql(sql, Vec::new(), true)
    }

    /// Replace the bind arguments.
    ///
    /// An executed statement is re-prepared on the same connection.
    pub fn bind(&self, args: Vec<Value>) -> Result<()> {
        self.run("bind", None, |inner, ds| {
            if inner.status > StatementStatus::Prepared {
                inner.discard(ds)?;
            }
            inner.args = args;
            if inner.status == StatementStatus::Idle {
                inner.advance(ds, "bind")
            } else {
                let args = inner.args.clone();
                inner.driver_mut("bind")?.bind(&args)
            }
        })
    }

    /// Execute, returning the affected row count.
    ///
    /// An already executed statement runs again.
    pub fn exec(&self) -> Result<i64> {
        self.run("exec", None, |inner, ds| {
            if inner.status >= StatementStatus::Executed {
                inner.discard(ds)?;
            }
            inner.check_status(ds, StatementStatus::Executed, "exec")?;
            let stmt = inner.driver_mut("exec")?;
            stmt.affected_rows()
        })
    }

    /// Bind output buffers
    pub fn define(&self) -> Result<()> {
        self.run("define", Some(StatementStatus::Defined), |_, _| Ok(()))
    }

    /// Describe the result columns
    pub fn describe(&self) -> Result<Value> {
        self.run("describe", Some(StatementStatus::Executed), |inner, ds| {
            let stmt = inner.driver_mut("describe")?;
            ds.with_connection("describe", false, |_| stmt.describe())
        })
    }

    /// Advance to the next row; false once the result set is exhausted
    pub fn next(&self) -> Result<bool> {
        self.run("next", Some(StatementStatus::Defined), |inner, ds| {
            let stmt = inner.driver_mut("next")?;
            ds.with_connection("next", false, |_| stmt.next())
        })
    }

    /// Fetch the next row, or `None` at the end of the result set
    pub fn fetch_row(&self) -> Result<Option<Value>> {
        self.run("fetchRow", Some(StatementStatus::Defined), |inner, ds| {
            let stmt = inner.driver_mut("fetchRow")?;
            ds.with_connection("fetchRow", false, |_| {
                if stmt.next()? {
                    stmt.current_row().map(Some)
                } else {
                    Ok(None)
                }
            })
        })
    }

    /// Current row of a defined statement
    pub fn get_value(&self) -> Result<Value> {
        self.run("getValue", Some(StatementStatus::Defined), |inner, _| {
            inner.driver_mut("getValue")?.current_row()
        })
    }

    /// Fetch up to `max` rows as a list of hashes
    pub fn fetch_rows(&self, max: Option<usize>) -> Result<Value> {
        self.run("fetchRows", Some(StatementStatus::Defined), |inner, ds| {
            let stmt = inner.driver_mut("fetchRows")?;
            ds.with_connection("fetchRows", false, |_| stmt.fetch_rows(max))
        })
    }

    /// Fetch up to `max` rows as a hash of column lists
    pub fn fetch_columns(&self, max: Option<usize>) -> Result<Value> {
        self.run("fetchColumns", Some(StatementStatus::Defined), |inner, ds| {
            let stmt = inner.driver_mut("fetchColumns")?;
            ds.with_connection("fetchColumns", false, |_| stmt.fetch_columns(max))
        })
    }

    /// Rows affected by the last execution
    pub fn affected_rows(&self) -> Result<i64> {
        self.run("affectedRows", Some(StatementStatus::Executed), |inner, _| {
            inner.driver_mut("affectedRows")?.affected_rows()
        })
    }

    /// Close the driver handle and return to idle
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.status == StatementStatus::Idle && !inner.holding {
            return Ok(());
        }
        self.bracket(&mut inner, |inner, ds| inner.discard(ds))
    }

    /// Start a transaction on the statement's connection
    pub fn begin_transaction(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.bracket(&mut inner, |_, ds| ds.begin_transaction())
    }

    /// Close the statement, then commit
    pub fn commit(&self) -> Result<()> {
        self.close()?;
        let mut inner = self.inner.lock();
        self.bracket(&mut inner, |_, ds| ds.commit())
    }

    /// Close the statement, then roll back
    pub fn rollback(&self) -> Result<()> {
        self.close()?;
        let mut inner = self.inner.lock();
        self.bracket(&mut inner, |_, ds| ds.rollback())
    }
}

impl fmt::Debug for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SqlStatement")
            .field("id", &self.id)
            .field("status", &inner.status)
            .field("sql", &inner.sql)
            .finish()
    }
}

impl Drop for SqlStatement {
    fn drop(&mut self) {
        let mut sink = ExceptionSink::new();
        if self.active() || self.inner.lock().holding {
            sink.check(self.close());
        }
        self.helper.helper_destructor(self.id, &mut sink);
        for err in sink.take_all() {
            tracing::warn!(statement = self.id, code = err.code(), error = %err, "error closing statement");
        }
    }
}
