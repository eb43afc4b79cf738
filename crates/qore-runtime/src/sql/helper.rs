//! Connection provider for prepared statements
//!
//! A [`SqlStatement`](super::SqlStatement) does not own a connection. For
//! every action it asks its helper for one and afterwards tells the helper
//! whether the connection must stay with the statement.

use std::sync::Arc;

use super::statement::SqlStatement;
use super::DsHandle;
use crate::error::{ExceptionSink, QoreError, Result};

/// What happens to the connection after a statement action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperCommand {
    /// Keep whatever disposition the connection had
    NoChange,
    /// The statement now spans several calls and holds the connection
    Acquire,
    /// The statement no longer needs the connection
    Release,
}

/// Connection handed out for one statement action
#[derive(Debug, Clone)]
pub struct HelperAction {
    /// Datasource to run the action on
    pub datasource: DsHandle,
    /// True if this action opened a new transaction context
    pub new_transaction: bool,
}

/// Supplies connections to statements.
///
/// Implemented by [`ManagedDatasource`](super::ManagedDatasource) and
/// [`DatasourcePool`](super::DatasourcePool).
pub trait DatasourceStatementHelper: Send + Sync {
    /// Get the connection for one action
    fn helper_start_action(&self) -> Result<HelperAction>;

    /// Finish an action started with [`helper_start_action`](Self::helper_start_action)
    fn helper_end_action(&self, command: HelperCommand, new_transaction: bool) -> Result<()>;

    /// Called once when a statement detaches from this helper
    fn helper_destructor(&self, statement: u64, sink: &mut ExceptionSink);

    /// Strong handle to this helper, if it is still alive
    fn helper_ref_self(&self) -> Option<Arc<dyn DatasourceStatementHelper>>;

    /// Description for diagnostics
    fn helper_description(&self) -> String;

    /// Create a statement bound to this helper
    fn statement(&self) -> Result<SqlStatement> {
        let helper = self.helper_ref_self().ok_or_else(|| {
            QoreError::ValueError(format!("{} is being destroyed", self.helper_description()))
        })?;
        Ok(SqlStatement::new(helper))
    }
}
