//! Datasource guarded by a re-entrant transaction lock
//!
//! The lock is taken by the first action of a thread and kept for as long as
//! that thread has a transaction open, so a transaction is never interleaved
//! with statements of another thread. Other threads wait on a condition
//! variable, up to the configured lock timeout.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::config::DatasourceConfig;
use super::datasource::Datasource;
use super::driver::{Driver, DriverRegistry};
use super::helper::{DatasourceStatementHelper, HelperAction, HelperCommand};
use super::DsHandle;
use crate::error::{ExceptionSink, QoreError, Result};
use crate::thread_resources::{self, ThreadResource};
use crate::value::Value;

/// Lock disposition requested at the end of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCommand {
    /// Release only if no transaction remains open
    NoChange,
    /// The transaction was closed; release unless a statement holds the lock
    Release,
    /// Release unconditionally
    ForceRelease,
}

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    waiting: usize,
    statement_holds: usize,
}

/// A [`Datasource`] shared between threads through a transaction lock.
pub struct ManagedDatasource {
    resource_id: u64,
    self_ref: Weak<ManagedDatasource>,
    ds: DsHandle,
    state: Mutex<LockState>,
    cond: Condvar,
    timeout_ms: AtomicU64,
    description: String,
}

impl ManagedDatasource {
    /// Create a managed datasource; the connection opens on first use
    pub fn new(driver: Arc<dyn Driver>, config: DatasourceConfig) -> Arc<Self> {
        let timeout_ms = config.lock_timeout_ms;
        let description = config.to_string();
        let ds = Datasource::new(driver, config);
        Arc::new_cyclic(|weak| Self {
            resource_id: thread_resources::next_resource_id(),
            self_ref: weak.clone(),
            ds: Arc::new(Mutex::new(ds)),
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
            timeout_ms: AtomicU64::new(timeout_ms),
            description,
        })
    }

    /// Create a managed datasource whose driver is looked up by name
    pub fn from_registry(registry: &DriverRegistry, config: DatasourceConfig) -> Result<Arc<Self>> {
        let driver = registry.get(&config.driver)?;
        Ok(Self::new(driver, config))
    }

    /// Connection description, without the password
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Transaction lock timeout; 0 waits forever
    pub fn lock_timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::Relaxed)
    }

    /// Change the transaction lock timeout
    pub fn set_lock_timeout_ms(&self, ms: u64) {
        self.timeout_ms.store(ms, Ordering::Relaxed);
    }

    /// Thread currently holding the transaction lock
    pub fn lock_owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }

    /// Threads blocked waiting for the transaction lock
    pub fn waiting_threads(&self) -> usize {
        self.state.lock().waiting
    }

    /// True if a transaction is open on the connection
    pub fn is_in_transaction(&self) -> bool {
        self.ds.lock().is_in_transaction()
    }

    /// Autocommit flag of the connection
    pub fn autocommit(&self) -> bool {
        self.ds.lock().autocommit()
    }

    /// Acquire the transaction lock for the calling thread.
    ///
    /// Returns true if the lock was newly acquired and false if the thread
    /// already held it. Fails with [`QoreError::LockTimeout`] when another
    /// thread keeps the lock past the timeout.
    pub fn acquire_lock(&self) -> Result<bool> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        if st.owner == Some(me) {
            return Ok(false);
        }
        if st.owner.is_some() {
            let timeout_ms = self.lock_timeout_ms();
            let deadline = (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));
            st.waiting += 1;
            while let Some(holder) = st.owner {
                match deadline {
                    Some(deadline) => {
                        if self.cond.wait_until(&mut st, deadline).timed_out() && st.owner.is_some() {
                            st.waiting -= 1;
                            tracing::debug!(datasource = %self.description, timeout_ms, "transaction lock timeout");
                            return Err(QoreError::LockTimeout {
                                datasource: self.description.clone(),
                                timeout_ms,
                                holder: format!("{:?}", holder),
                            });
                        }
                    }
                    None => self.cond.wait(&mut st),
                }
            }
            st.waiting -= 1;
        }
        st.owner = Some(me);
        drop(st);
        let resource: Weak<dyn ThreadResource> = self.self_ref.clone();
        thread_resources::register(self.resource_id, resource);
        tracing::trace!(datasource = %self.description, "transaction lock acquired");
        Ok(true)
    }

    /// Release the transaction lock if the calling thread holds it
    pub fn release_lock(&self) {
        if self.release_for(thread::current().id()) {
            thread_resources::unregister(self.resource_id);
        }
    }

    fn release_for(&self, thread: ThreadId) -> bool {
        let mut st = self.state.lock();
        if st.owner != Some(thread) {
            return false;
        }
        st.owner = None;
        st.statement_holds = 0;
        let waiting = st.waiting;
        drop(st);
        if waiting > 0 {
            self.cond.notify_one();
        }
        tracing::trace!(datasource = %self.description, "transaction lock released");
        true
    }

    /// Begin one database action; returns true if it opens a new transaction
    pub fn start_db_action(&self) -> Result<bool> {
        let acquired = self.acquire_lock()?;
        let ds = self.ds.lock();
        Ok(acquired && !ds.autocommit() && !ds.is_in_transaction())
    }

    /// Finish one database action, releasing the lock as `command` asks.
    ///
    /// An aborted connection always releases the lock.
    pub fn end_db_action(&self, command: ActionCommand, new_transaction: bool) {
        let (in_transaction, aborted) = {
            let ds = self.ds.lock();
            (ds.is_in_transaction(), ds.was_connection_aborted())
        };
        let holds = self.state.lock().statement_holds;
        let release = aborted
            || match command {
                ActionCommand::ForceRelease => true,
                ActionCommand::Release => holds == 0,
                ActionCommand::NoChange => !in_transaction && holds == 0,
            };
        if release {
            tracing::trace!(datasource = %self.description, ?command, new_transaction, aborted, "ending action");
            self.release_lock();
        }
    }

    fn action<T>(&self, command: ActionCommand, f: impl FnOnce(&mut Datasource) -> Result<T>) -> Result<T> {
        let new_transaction = self.start_db_action()?;
        let result = {
            let mut ds = self.ds.lock();
            let result = f(&mut ds);
            if result.is_err() && new_transaction && ds.is_in_transaction() {
                if let Err(e) = ds.rollback() {
                    tracing::warn!(datasource = %self.description, error = %e, "rollback after failed action");
                }
            }
            result
        };
        self.end_db_action(command, new_transaction);
        result
    }

    /// Run a query returning a hash of column lists
    pub fn select(&self, sql: &str, args: &[Value]) -> Result<Value> {
        self.action(ActionCommand::NoChange, |ds| ds.select(sql, args))
    }

    /// Run a query returning a list of row hashes
    pub fn select_rows(&self, sql: &str, args: &[Value]) -> Result<Value> {
        self.action(ActionCommand::NoChange, |ds| ds.select_rows(sql, args))
    }

    /// Run a statement; without autocommit the lock stays with this thread
    /// until [`commit`](Self::commit) or [`rollback`](Self::rollback)
    pub fn exec(&self, sql: &str, args: &[Value]) -> Result<Value> {
        self.action(ActionCommand::NoChange, |ds| ds.exec(sql, args))
    }

    /// Run a statement without argument processing
    pub fn exec_raw(&self, sql: &str) -> Result<Value> {
        self.action(ActionCommand::NoChange, |ds| ds.exec_raw(sql))
    }

    /// Start a transaction and keep the lock
    pub fn begin_transaction(&self) -> Result<()> {
        self.action(ActionCommand::NoChange, |ds| ds.begin_transaction())
    }

    /// Commit and release the lock
    pub fn commit(&self) -> Result<()> {
        self.action(ActionCommand::Release, |ds| ds.commit())
    }

    /// Roll back and release the lock
    pub fn rollback(&self) -> Result<()> {
        self.action(ActionCommand::Release, |ds| ds.rollback())
    }

    /// Open the connection now
    pub fn open(&self) -> Result<()> {
        self.action(ActionCommand::NoChange, |ds| ds.open())
    }

    /// Close the connection; an open transaction is rolled back
    pub fn close(&self) -> Result<()> {
        self.action(ActionCommand::ForceRelease, |ds| ds.close())
    }

    /// Close and reopen the connection
    pub fn reset(&self) -> Result<()> {
        self.action(ActionCommand::ForceRelease, |ds| ds.reset())
    }

    /// Change autocommit; rejected while a transaction is open
    pub fn set_autocommit(&self, autocommit: bool) -> Result<()> {
        self.action(ActionCommand::NoChange, |ds| ds.set_autocommit(autocommit))
    }

    /// Server version information
    pub fn server_version(&self) -> Result<Value> {
        self.action(ActionCommand::NoChange, |ds| ds.server_version())
    }
}

impl DatasourceStatementHelper for ManagedDatasource {
    fn helper_start_action(&self) -> Result<HelperAction> {
        let new_transaction = self.start_db_action()?;
        Ok(HelperAction {
            datasource: Arc::clone(&self.ds),
            new_transaction,
        })
    }

    fn helper_end_action(&self, command: HelperCommand, new_transaction: bool) -> Result<()> {
        {
            let mut st = self.state.lock();
            match command {
                HelperCommand::Acquire => st.statement_holds += 1,
                HelperCommand::Release => st.statement_holds = st.statement_holds.saturating_sub(1),
                HelperCommand::NoChange => {}
            }
        }
        self.end_db_action(ActionCommand::NoChange, new_transaction);
        Ok(())
    }

    fn helper_destructor(&self, statement: u64, _sink: &mut ExceptionSink) {
        tracing::trace!(datasource = %self.description, statement, "statement detached");
    }

    fn helper_ref_self(&self) -> Option<Arc<dyn DatasourceStatementHelper>> {
        self.self_ref
            .upgrade()
            .map(|s| s as Arc<dyn DatasourceStatementHelper>)
    }

    fn helper_description(&self) -> String {
        self.description.clone()
    }
}

impl ThreadResource for ManagedDatasource {
    fn cleanup(&self, thread: ThreadId, sink: &mut ExceptionSink) {
        if self.state.lock().owner != Some(thread) {
            return;
        }
        {
            let mut ds = self.ds.lock();
            if ds.is_in_transaction() {
                sink.raise(QoreError::TransactionLeaked {
                    datasource: self.description.clone(),
                    thread: format!("{:?}", thread),
                });
                if let Err(e) = ds.rollback() {
                    sink.raise(e);
                }
            }
        }
        self.release_for(thread);
    }

    fn resource_name(&self) -> String {
        format!("transaction lock on {}", self.description)
    }
}

impl fmt::Display for ManagedDatasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl fmt::Debug for ManagedDatasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("ManagedDatasource")
            .field("description", &self.description)
            .field("owner", &st.owner)
            .field("waiting", &st.waiting)
            .finish()
    }
}
