//! Execution context for source response callbacks.
//!
//! Callbacks always run as tasks spawned on a tokio runtime, never inline on
//! the thread that issued the request. A callback may close the very source
//! whose request it completes.

use std::future::Future;

use tokio::runtime::Handle;

use super::error::ConfigError;

/// Cross-task executor for exchange response handling.
#[derive(Clone, Debug)]
pub struct CallbackExecutor {
    handle: Handle,
}

impl CallbackExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on.
    pub fn current() -> Result<Self, ConfigError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| ConfigError::NoRuntime)
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
