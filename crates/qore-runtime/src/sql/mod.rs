//! Database access layer
//!
//! - [`Datasource`]: one physical connection opened through a [`Driver`]
//! - [`ManagedDatasource`]: a datasource guarded by a re-entrant transaction lock
//! - [`DatasourcePool`]: a bounded set of datasources with per-thread affinity
//! - [`SqlStatement`]: a prepared statement that borrows a connection per action
//!
//! Drivers themselves live outside this crate; [`testing::MockDriver`] is an
//! in-memory driver used by the test suite.

use std::sync::Arc;

use parking_lot::Mutex;

pub mod config;
pub mod datasource;
pub mod driver;
pub mod helper;
pub mod managed;
pub mod pool;
pub mod statement;
pub mod testing;

pub use config::{DatasourceConfig, PoolConfig, DEFAULT_LOCK_TIMEOUT_MS};
pub use datasource::Datasource;
pub use driver::{Driver, DriverConnection, DriverRegistry, DriverStatement};
pub use helper::{DatasourceStatementHelper, HelperAction, HelperCommand};
pub use managed::{ActionCommand, ManagedDatasource};
pub use pool::{Checkout, DatasourcePool, PoolStats, PoolUsage};
pub use statement::{SqlStatement, StatementStatus};

/// Shared handle to a datasource; the mutex serializes every driver call.
pub type DsHandle = Arc<Mutex<Datasource>>;
