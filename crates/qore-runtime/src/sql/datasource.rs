//! A single physical connection and its transaction state

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::config::DatasourceConfig;
use super::driver::{Driver, DriverConnection, DriverRegistry, DriverStatement};
use crate::error::{QoreError, Result};
use crate::value::Value;

static NEXT_DATASOURCE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One database connection.
///
/// The connection is opened lazily by the first action. Each successful open
/// gets a fresh connection id, so handles prepared on an earlier connection
/// can be told apart after a reconnect.
///
/// A `Datasource` is not synchronized; [`ManagedDatasource`](super::ManagedDatasource)
/// and [`DatasourcePool`](super::DatasourcePool) make sure only one thread
/// uses it at a time.
pub struct Datasource {
    id: u64,
    driver: Arc<dyn Driver>,
    config: DatasourceConfig,
    conn: Option<Box<dyn DriverConnection>>,
    connection_id: u64,
    autocommit: bool,
    in_transaction: bool,
    connection_aborted: bool,
}

impl Datasource {
    /// Create a closed datasource
    pub fn new(driver: Arc<dyn Driver>, config: DatasourceConfig) -> Self {
        Self {
            id: NEXT_DATASOURCE_ID.fetch_add(1, Ordering::Relaxed),
            autocommit: config.autocommit,
            driver,
            config,
            conn: None,
            connection_id: 0,
            in_transaction: false,
            connection_aborted: false,
        }
    }

    /// Create a closed datasource whose driver is looked up by name
    pub fn from_registry(registry: &DriverRegistry, config: DatasourceConfig) -> Result<Self> {
        let driver = registry.get(&config.driver)?;
        Ok(Self::new(driver, config))
    }

    /// Unique id of this datasource object
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id of the current physical connection; 0 while closed
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Connection parameters
    pub fn config(&self) -> &DatasourceConfig {
        &self.config
    }

    /// Name of the driver
    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// True while a physical connection is open
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Autocommit flag
    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// Change the autocommit flag; rejected while a transaction is open
    pub fn set_autocommit(&mut self, autocommit: bool) -> Result<()> {
        if self.in_transaction {
            return Err(QoreError::ValueError(format!(
                "cannot change autocommit on {} while a transaction is in progress",
                self
            )));
        }
        self.autocommit = autocommit;
        Ok(())
    }

    /// True while a transaction is open
    pub fn is_in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// True if the last action found the connection dropped by the server
    pub fn was_connection_aborted(&self) -> bool {
        self.connection_aborted
    }

    /// Open the connection if it is not open yet
    pub fn open(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = self.driver.open(&self.config)?;
        self.conn = Some(conn);
        self.connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        self.connection_aborted = false;
        tracing::debug!(datasource = %self, connection = self.connection_id, "connection opened");
        Ok(())
    }

    /// Close the connection, rolling back an open transaction first
    pub fn close(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let mut result = Ok(());
        if self.in_transaction {
            tracing::warn!(datasource = %self, "closing connection with an open transaction; rolling back");
            result = conn.rollback();
            self.in_transaction = false;
        }
        let closed = conn.close();
        tracing::debug!(datasource = %self, connection = self.connection_id, "connection closed");
        self.connection_id = 0;
        result.and(closed)
    }

    /// Close and reopen the connection
    pub fn reset(&mut self) -> Result<()> {
        self.close()?;
        self.open()
    }

    /// Run `f` against the open connection.
    ///
    /// With `begin` set and autocommit off, a transaction is started first if
    /// none is open. If the driver reports the connection aborted, the
    /// connection is discarded and the action fails with
    /// [`QoreError::ConnectionAborted`].
    pub(crate) fn with_connection<T>(
        &mut self,
        action: &str,
        begin: bool,
        f: impl FnOnce(&mut dyn DriverConnection) -> Result<T>,
    ) -> Result<T> {
        self.open()?;
        let conn = self.conn.as_mut().ok_or_else(|| {
            QoreError::ValueError("connection is not open".to_string())
        })?;
        let mut started = Ok(());
        if begin && !self.autocommit && !self.in_transaction {
            started = conn.begin_transaction();
            if started.is_ok() {
                self.in_transaction = true;
            }
        }
        let result = started.and_then(|()| f(conn.as_mut()));
        if conn.is_aborted() {
            return Err(self.handle_abort(action, result.err()));
        }
        result
    }

    fn handle_abort(&mut self, action: &str, cause: Option<QoreError>) -> QoreError {
        let connection = self.connection_id;
        // the driver handle is unusable; drop it without a close round trip
        self.conn = None;
        self.connection_id = 0;
        self.in_transaction = false;
        self.connection_aborted = true;
        let message = match cause {
            Some(err) => err.to_string(),
            None => "connection lost".to_string(),
        };
        tracing::warn!(datasource = %self, connection, action, %message, "connection aborted");
        QoreError::ConnectionAborted {
            datasource: self.to_string(),
            connection,
            message,
        }
    }

    /// Run a query returning a hash of column lists
    pub fn select(&mut self, sql: &str, args: &[Value]) -> Result<Value> {
        self.with_connection("select", false, |c| c.select(sql, args))
    }

    /// Run a query returning a list of row hashes
    pub fn select_rows(&mut self, sql: &str, args: &[Value]) -> Result<Value> {
        self.with_connection("selectRows", false, |c| c.select_rows(sql, args))
    }

    /// Run a statement; starts a transaction unless autocommit is on
    pub fn exec(&mut self, sql: &str, args: &[Value]) -> Result<Value> {
        let autocommit = self.autocommit;
        self.with_connection("exec", true, |c| {
            let result = c.exec(sql, args)?;
            if autocommit {
                c.commit()?;
            }
            Ok(result)
        })
    }

    /// Run a statement without argument processing
    pub fn exec_raw(&mut self, sql: &str) -> Result<Value> {
        let autocommit = self.autocommit;
        self.with_connection("execRaw", true, |c| {
            let result = c.exec_raw(sql)?;
            if autocommit {
                c.commit()?;
            }
            Ok(result)
        })
    }

    /// Start a transaction explicitly
    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Ok(());
        }
        self.with_connection("beginTransaction", false, |c| c.begin_transaction())?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commit; a closed connection has nothing to commit
    pub fn commit(&mut self) -> Result<()> {
        if self.conn.is_none() {
            self.in_transaction = false;
            return Ok(());
        }
        let result = self.with_connection("commit", false, |c| c.commit());
        self.in_transaction = false;
        result
    }

    /// Roll back; a closed connection has nothing to roll back
    pub fn rollback(&mut self) -> Result<()> {
        if self.conn.is_none() {
            self.in_transaction = false;
            return Ok(());
        }
        let result = self.with_connection("rollback", false, |c| c.rollback());
        self.in_transaction = false;
        result
    }

    /// Prepare a statement on the current connection
    pub fn prepare_statement(&mut self, sql: &str, args: &[Value], raw: bool) -> Result<Box<dyn DriverStatement>> {
        self.with_connection("prepare", true, |c| c.prepare(sql, args, raw))
    }

    /// Server version information
    pub fn server_version(&mut self) -> Result<Value> {
        self.with_connection("getServerVersion", false, |c| c.server_version())
    }
}

impl fmt::Display for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.config)
    }
}

impl fmt::Debug for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datasource")
            .field("id", &self.id)
            .field("config", &self.config.to_string())
            .field("connection_id", &self.connection_id)
            .field("autocommit", &self.autocommit)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl Drop for Datasource {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(datasource = %self, error = %e, "error closing connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::testing::MockDriver;

    fn datasource(driver: &Arc<MockDriver>) -> Datasource {
        Datasource::new(driver.clone(), DatasourceConfig::new("mock", "test"))
    }

    #[test]
    fn test_lazy_open() {
        let driver = MockDriver::new();
        let mut ds = datasource(&driver);
        assert!(!ds.is_open());
        assert_eq!(ds.connection_id(), 0);
        ds.select("select 1", &[]).unwrap();
        assert!(ds.is_open());
        assert_ne!(ds.connection_id(), 0);
        assert_eq!(driver.opens(), 1);
    }

    #[test]
    fn test_exec_starts_transaction() {
        let driver = MockDriver::new();
        let mut ds = datasource(&driver);
        ds.exec("insert into t values (1)", &[]).unwrap();
        assert!(ds.is_in_transaction());
        assert_eq!(driver.begins(), 1);
        assert!(ds.set_autocommit(true).is_err());
        ds.commit().unwrap();
        assert!(!ds.is_in_transaction());
        assert_eq!(driver.commits(), 1);
    }

    #[test]
    fn test_autocommit_exec_commits() {
        let driver = MockDriver::new();
        let mut ds = datasource(&driver);
        ds.set_autocommit(true).unwrap();
        ds.exec("delete from t", &[]).unwrap();
        assert!(!ds.is_in_transaction());
        assert_eq!(driver.begins(), 0);
        assert_eq!(driver.commits(), 1);
    }

    #[test]
    fn test_abort_discards_connection() {
        let driver = MockDriver::new();
        let mut ds = datasource(&driver);
        ds.exec("insert into t values (1)", &[]).unwrap();
        let first = ds.connection_id();
        driver.abort_next_action();
        let err = ds.exec("insert into t values (2)", &[]).unwrap_err();
        assert!(matches!(err, QoreError::ConnectionAborted { connection, .. } if connection == first));
        assert!(ds.was_connection_aborted());
        assert!(!ds.is_in_transaction());
        assert!(!ds.is_open());
        ds.select("select 1", &[]).unwrap();
        assert_ne!(ds.connection_id(), first);
        assert!(!ds.was_connection_aborted());
    }

    #[test]
    fn test_close_rolls_back() {
        let driver = MockDriver::new();
        let mut ds = datasource(&driver);
        ds.exec("update t set x = 1", &[]).unwrap();
        ds.close().unwrap();
        assert_eq!(driver.rollbacks(), 1);
        assert_eq!(driver.live_connections(), 0);
    }
}
