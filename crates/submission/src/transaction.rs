//! Unit of work with commit and rollback hooks.
//!
//! Work that must only become visible once the enclosing transaction is
//! durable (dispatching a job that reads the record) is registered with
//! [`Transaction::after_commit`]. Compensations for writes already made are
//! registered with [`Transaction::on_rollback`]. Dropping an uncommitted
//! transaction rolls it back.

use tracing::debug;

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Open,
    Committed,
    RolledBack,
}

/// Enclosing transaction of a request.
pub struct Transaction {
    state: TxState,
    after_commit: Vec<Hook>,
    on_rollback: Vec<Hook>,
}

impl core::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("after_commit", &self.after_commit.len())
            .field("on_rollback", &self.on_rollback.len())
            .finish()
    }
}

impl Transaction {
    pub fn begin() -> Self {
        Self {
            state: TxState::Open,
            after_commit: Vec::new(),
            on_rollback: Vec::new(),
        }
    }

    /// Run `hook` once the transaction commits; never if it rolls back.
    pub fn after_commit<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.after_commit.push(Box::new(hook));
    }

    /// Run `hook` if the transaction rolls back. Hooks run in reverse order.
    pub fn on_rollback<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_rollback.push(Box::new(hook));
    }

    /// Commit and run the commit hooks in registration order.
    pub fn commit(mut self) {
        self.state = TxState::Committed;
        self.on_rollback.clear();
        let hooks = std::mem::take(&mut self.after_commit);
        debug!(hooks = hooks.len(), "transaction committed");
        for hook in hooks {
            hook();
        }
    }

    /// Abort and run the compensations.
    pub fn rollback(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        self.state = TxState::RolledBack;
        self.after_commit.clear();
        let hooks = std::mem::take(&mut self.on_rollback);
        debug!(hooks = hooks.len(), "transaction rolled back");
        for hook in hooks.into_iter().rev() {
            hook();
        }
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::begin()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Open {
            self.abort();
        }
    }
}
