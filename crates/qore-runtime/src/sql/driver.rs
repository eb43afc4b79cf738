//! Driver interface
//!
//! A driver opens physical connections; a connection runs SQL and hands out
//! prepared statements. Driver failures surface as [`QoreError`] values, and
//! a connection reports through [`DriverConnection::is_aborted`] when the
//! server dropped it so the owning layers can release their locks.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use super::config::DatasourceConfig;
use crate::error::{QoreError, Result};
use crate::value::{Value, ValueHash, ValueList};

/// Factory for connections of one database type
pub trait Driver: Send + Sync + fmt::Debug {
    /// Driver name as used in datasource strings
    fn name(&self) -> &str;

    /// Open a new physical connection
    fn open(&self, config: &DatasourceConfig) -> Result<Box<dyn DriverConnection>>;
}

/// One open physical connection
pub trait DriverConnection: Send {
    /// Run a query and return a hash of column lists
    fn select(&mut self, sql: &str, args: &[Value]) -> Result<Value>;

    /// Run a query and return a list of row hashes
    fn select_rows(&mut self, sql: &str, args: &[Value]) -> Result<Value>;

    /// Run a statement with bind arguments
    fn exec(&mut self, sql: &str, args: &[Value]) -> Result<Value>;

    /// Run a statement without argument processing
    fn exec_raw(&mut self, sql: &str) -> Result<Value>;

    /// Start a transaction
    fn begin_transaction(&mut self) -> Result<()>;

    /// Commit the current transaction
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction
    fn rollback(&mut self) -> Result<()>;

    /// Prepare a statement; `raw` disables placeholder processing
    fn prepare(&mut self, sql: &str, args: &[Value], raw: bool) -> Result<Box<dyn DriverStatement>>;

    /// True once the server has dropped the connection
    fn is_aborted(&self) -> bool;

    /// Server version information
    fn server_version(&mut self) -> Result<Value>;

    /// Close the connection
    fn close(&mut self) -> Result<()>;
}

/// Driver-private state of a prepared statement
pub trait DriverStatement: Send {
    /// Replace the bind arguments
    fn bind(&mut self, args: &[Value]) -> Result<()>;

    /// Execute with the current arguments
    fn exec(&mut self) -> Result<()>;

    /// Bind output buffers for fetching
    fn define(&mut self) -> Result<()>;

    /// Describe the result columns
    fn describe(&mut self) -> Result<Value>;

    /// Advance to the next row; false when exhausted
    fn next(&mut self) -> Result<bool>;

    /// Current row as a hash
    fn current_row(&self) -> Result<Value>;

    /// Rows affected by the last execution
    fn affected_rows(&self) -> Result<i64>;

    /// Release the driver handle
    fn close(&mut self) -> Result<()>;

    /// Fetch up to `max` rows as a list of hashes
    fn fetch_rows(&mut self, max: Option<usize>) -> Result<Value> {
        let mut rows = ValueList::new();
        while max.map_or(true, |m| rows.len() < m) && self.next()? {
            rows.push(self.current_row()?)?;
        }
        Ok(Value::list(rows))
    }

    /// Fetch up to `max` rows as a hash of column lists
    fn fetch_columns(&mut self, max: Option<usize>) -> Result<Value> {
        let mut columns = ValueHash::new();
        let mut fetched = 0usize;
        while max.map_or(true, |m| fetched < m) && self.next()? {
            let row = self.current_row()?;
            let row = row
                .as_hash()
                .ok_or_else(|| QoreError::type_error("hash", &row))?;
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
            fetched += 1;
        }
        Ok(Value::hash(columns))
    }
}

/// Drivers known to the process, looked up by name
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: DashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its own name, replacing any previous one
    pub fn register(&self, driver: Arc<dyn Driver>) {
        tracing::debug!(driver = driver.name(), "driver registered");
        self.drivers.insert(driver.name().to_string(), driver);
    }

    /// Look up a driver
    pub fn get(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.drivers
            .get(name)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| QoreError::Configuration(format!("no driver named '{}' is loaded", name)))
    }

    /// Registered driver names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::testing::MockDriver;

    #[test]
    fn test_registry_lookup() {
        let registry = DriverRegistry::new();
        registry.register(MockDriver::new());
        assert_eq!(registry.names(), vec!["mock".to_string()]);
        assert_eq!(registry.get("mock").unwrap().name(), "mock");
        let err = registry.get("oracle").unwrap_err();
        assert_eq!(err.code(), "DATASOURCE-PARSE-ERROR");
    }
}
