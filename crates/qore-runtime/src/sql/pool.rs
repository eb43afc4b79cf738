//! Connection pool with per-thread affinity
//!
//! A thread checks a connection out on its first action and keeps it for as
//! long as it has a transaction open (or a statement holding it), so every
//! action of one transaction runs on the same connection. At most `max`
//! connections exist; further threads wait until one is returned.
//!
//! The pool state lock and a datasource lock are never held together.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use super::config::PoolConfig;
use super::datasource::Datasource;
use super::driver::{Driver, DriverRegistry};
use super::helper::{DatasourceStatementHelper, HelperAction, HelperCommand};
use super::DsHandle;
use crate::error::{ExceptionSink, QoreError, Result};
use crate::thread_resources::{self, ThreadResource};
use crate::value::Value;

/// A connection checked out to the calling thread
#[derive(Debug, Clone)]
pub struct Checkout {
    /// Slot index of the connection
    pub index: usize,
    /// The connection
    pub datasource: DsHandle,
    /// True if the thread did not hold a connection before this checkout
    pub new_transaction: bool,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolUsage {
    /// Configured minimum
    pub min: usize,
    /// Configured maximum
    pub max: usize,
    /// Connections created
    pub current: usize,
    /// Idle connections
    pub free: usize,
    /// Connections checked out to threads
    pub in_use: usize,
    /// Threads waiting for a connection
    pub waiting: usize,
}

/// Cumulative pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections created
    pub connections_created: u64,
    /// Checkouts handed to threads
    pub acquisitions: u64,
    /// Times a thread had to wait for a connection
    pub waits: u64,
}

#[derive(Debug, Default)]
struct AtomicPoolStats {
    connections_created: AtomicU64,
    acquisitions: AtomicU64,
    waits: AtomicU64,
}

impl AtomicPoolStats {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct PoolState {
    connections: Vec<DsHandle>,
    free: VecDeque<usize>,
    thread_map: HashMap<ThreadId, usize>,
    statement_holds: HashMap<ThreadId, usize>,
    waiting: usize,
}

/// Bounded set of connections shared by many threads.
pub struct DatasourcePool {
    resource_id: u64,
    self_ref: Weak<DatasourcePool>,
    driver: Arc<dyn Driver>,
    config: PoolConfig,
    description: String,
    state: Mutex<PoolState>,
    cond: Condvar,
    stats: AtomicPoolStats,
}

impl DatasourcePool {
    /// Create a pool and open `min` connections.
    ///
    /// Fails if the configuration is invalid or the first connection cannot
    /// be opened; later eager opens are best effort.
    pub fn new(driver: Arc<dyn Driver>, config: PoolConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let pool = Arc::new_cyclic(|weak| Self {
            resource_id: thread_resources::next_resource_id(),
            self_ref: weak.clone(),
            description: config.datasource.to_string(),
            driver,
            config,
            state: Mutex::new(PoolState::default()),
            cond: Condvar::new(),
            stats: AtomicPoolStats::default(),
        });
        for i in 0..pool.config.min {
            let mut ds = Datasource::new(Arc::clone(&pool.driver), pool.config.datasource.clone());
            if let Err(e) = ds.open() {
                if i == 0 {
                    return Err(e);
                }
                tracing::warn!(pool = %pool.description, error = %e, "cannot open minimum connection");
                break;
            }
            pool.stats.connections_created.fetch_add(1, Ordering::Relaxed);
            let mut st = pool.state.lock();
            st.connections.push(Arc::new(Mutex::new(ds)));
            st.free.push_back(i);
        }
        tracing::debug!(pool = %pool.description, min = pool.config.min, max = pool.config.max, "pool created");
        Ok(pool)
    }

    /// Create a pool whose driver is looked up by name
    pub fn from_registry(registry: &DriverRegistry, config: PoolConfig) -> Result<Arc<Self>> {
        let driver = registry.get(&config.datasource.driver)?;
        Self::new(driver, config)
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the calling thread's connection, checking one out if needed.
    ///
    /// Blocks while all `max` connections are checked out to other threads.
    pub fn get_ds(&self) -> Result<Checkout> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        if let Some(&index) = st.thread_map.get(&me) {
            return Ok(Checkout {
                index,
                datasource: Arc::clone(&st.connections[index]),
                new_transaction: false,
            });
        }
        loop {
            let index = match st.free.pop_front() {
                Some(index) => Some(index),
                None if st.connections.len() < self.config.max => {
                    let ds = Datasource::new(Arc::clone(&self.driver), self.config.datasource.clone());
                    st.connections.push(Arc::new(Mutex::new(ds)));
                    self.stats.connections_created.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(pool = %self.description, index = st.connections.len() - 1, "pool connection created");
                    Some(st.connections.len() - 1)
                }
                None => None,
            };
            if let Some(index) = index {
                st.thread_map.insert(me, index);
                let datasource = Arc::clone(&st.connections[index]);
                drop(st);
                self.stats.acquisitions.fetch_add(1, Ordering::Relaxed);
                let resource: Weak<dyn ThreadResource> = self.self_ref.clone();
                thread_resources::register(self.resource_id, resource);
                tracing::trace!(pool = %self.description, index, "connection checked out");
                return Ok(Checkout {
                    index,
                    datasource,
                    new_transaction: true,
                });
            }
            st.waiting += 1;
            self.stats.waits.fetch_add(1, Ordering::Relaxed);
            self.cond.wait(&mut st);
            st.waiting -= 1;
        }
    }

    /// Return the calling thread's connection to the free list
    pub fn free_ds(&self) {
        if self.free_for(thread::current().id()) {
            thread_resources::unregister(self.resource_id);
        }
    }

    fn free_for(&self, thread: ThreadId) -> bool {
        let mut st = self.state.lock();
        let Some(index) = st.thread_map.remove(&thread) else {
            return false;
        };
        st.statement_holds.remove(&thread);
        st.free.push_back(index);
        let waiting = st.waiting;
        drop(st);
        if waiting > 0 {
            self.cond.notify_one();
        }
        tracing::trace!(pool = %self.description, index, "connection returned");
        true
    }

    /// True if the calling thread has a connection checked out
    pub fn has_connection(&self) -> bool {
        self.state.lock().thread_map.contains_key(&thread::current().id())
    }

    fn current_checkout(&self) -> Option<(DsHandle, usize)> {
        let me = thread::current().id();
        let st = self.state.lock();
        let index = *st.thread_map.get(&me)?;
        let holds = st.statement_holds.get(&me).copied().unwrap_or(0);
        Some((Arc::clone(&st.connections[index]), holds))
    }

    // Keep the connection only while a transaction or a statement needs it.
    fn finish_action(&self) {
        let Some((datasource, holds)) = self.current_checkout() else {
            return;
        };
        let (in_transaction, aborted) = {
            let ds = datasource.lock();
            (ds.is_in_transaction(), ds.was_connection_aborted())
        };
        if aborted || (!in_transaction && holds == 0) {
            self.free_ds();
        }
    }

    fn action<T>(&self, f: impl FnOnce(&mut Datasource) -> Result<T>) -> Result<T> {
        let checkout = self.get_ds()?;
        let result = {
            let mut ds = checkout.datasource.lock();
            let result = f(&mut ds);
            if result.is_err() && checkout.new_transaction && ds.is_in_transaction() {
                if let Err(e) = ds.rollback() {
                    tracing::warn!(pool = %self.description, error = %e, "rollback after failed action");
                }
            }
            result
        };
        self.finish_action();
        result
    }

    /// Run a query returning a hash of column lists
    pub fn select(&self, sql: &str, args: &[Value]) -> Result<Value> {
        self.action(|ds| ds.select(sql, args))
    }

    /// Run a query returning a list of row hashes
    pub fn select_rows(&self, sql: &str, args: &[Value]) -> Result<Value> {
        self.action(|ds| ds.select_rows(sql, args))
    }

    /// Run a statement; without autocommit the connection stays checked out
    /// until the transaction ends
    pub fn exec(&self, sql: &str, args: &[Value]) -> Result<Value> {
        self.action(|ds| ds.exec(sql, args))
    }

    /// Run a statement without argument processing
    pub fn exec_raw(&self, sql: &str) -> Result<Value> {
        self.action(|ds| ds.exec_raw(sql))
    }

    /// Start a transaction on the calling thread's connection
    pub fn begin_transaction(&self) -> Result<()> {
        self.action(|ds| ds.begin_transaction())
    }

    /// Commit; a thread without a connection has nothing to commit
    pub fn commit(&self) -> Result<()> {
        if !self.has_connection() {
            return Ok(());
        }
        self.action(|ds| ds.commit())
    }

    /// Roll back; a thread without a connection has nothing to roll back
    pub fn rollback(&self) -> Result<()> {
        if !self.has_connection() {
            return Ok(());
        }
        self.action(|ds| ds.rollback())
    }

    /// Server version information
    pub fn server_version(&self) -> Result<Value> {
        self.action(|ds| ds.server_version())
    }

    /// Current usage
    pub fn usage(&self) -> PoolUsage {
        let st = self.state.lock();
        PoolUsage {
            min: self.config.min,
            max: self.config.max,
            current: st.connections.len(),
            free: st.free.len(),
            in_use: st.thread_map.len(),
            waiting: st.waiting,
        }
    }

    /// Cumulative statistics
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Close every idle connection; they reopen on demand.
    ///
    /// Connections checked out to threads are left alone.
    pub fn close(&self) -> Result<()> {
        // idle slots are taken off the free list while they are closed
        let idle: Vec<(usize, DsHandle)> = {
            let mut st = self.state.lock();
            let indexes: Vec<usize> = st.free.drain(..).collect();
            indexes
                .into_iter()
                .map(|i| (i, Arc::clone(&st.connections[i])))
                .collect()
        };
        let mut sink = ExceptionSink::new();
        for (_, ds) in &idle {
            sink.check(ds.lock().close());
        }
        {
            let mut st = self.state.lock();
            st.free.extend(idle.iter().map(|(i, _)| *i));
            if st.waiting > 0 {
                self.cond.notify_all();
            }
        }
        tracing::debug!(pool = %self.description, closed = idle.len(), "idle pool connections closed");
        sink.into_result()
    }
}

impl DatasourceStatementHelper for DatasourcePool {
    fn helper_start_action(&self) -> Result<HelperAction> {
        let checkout = self.get_ds()?;
        Ok(HelperAction {
            datasource: checkout.datasource,
            new_transaction: checkout.new_transaction,
        })
    }

    fn helper_end_action(&self, command: HelperCommand, _new_transaction: bool) -> Result<()> {
        let me = thread::current().id();
        {
            let mut st = self.state.lock();
            if st.thread_map.contains_key(&me) {
                match command {
                    HelperCommand::Acquire => *st.statement_holds.entry(me).or_insert(0) += 1,
                    HelperCommand::Release => {
                        if let Some(holds) = st.statement_holds.get_mut(&me) {
                            *holds = holds.saturating_sub(1);
                        }
                    }
                    HelperCommand::NoChange => {}
                }
            }
        }
        self.finish_action();
        Ok(())
    }

    fn helper_destructor(&self, statement: u64, _sink: &mut ExceptionSink) {
        tracing::trace!(pool = %self.description, statement, "statement detached");
    }

    fn helper_ref_self(&self) -> Option<Arc<dyn DatasourceStatementHelper>> {
        self.self_ref
            .upgrade()
            .map(|s| s as Arc<dyn DatasourceStatementHelper>)
    }

    fn helper_description(&self) -> String {
        format!("pool {}", self.description)
    }
}

impl ThreadResource for DatasourcePool {
    fn cleanup(&self, thread: ThreadId, sink: &mut ExceptionSink) {
        let datasource = {
            let st = self.state.lock();
            match st.thread_map.get(&thread) {
                Some(&index) => Arc::clone(&st.connections[index]),
                None => return,
            }
        };
        {
            let mut ds = datasource.lock();
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
        self.free_for(thread);
    }

    fn resource_name(&self) -> String {
        format!("pooled connection of {}", self.description)
    }
}

impl fmt::Display for DatasourcePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let usage = self.usage();
        write!(
            f,
            "{}: min {}, max {}, {} open, {} free, {} in use, {} waiting",
            self.description, usage.min, usage.max, usage.current, usage.free, usage.in_use, usage.waiting
        )
    }
}

impl fmt::Debug for DatasourcePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasourcePool")
            .field("description", &self.description)
            .field("usage", &self.usage())
            .finish()
    }
}
