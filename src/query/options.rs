//! Per-call execution options.

use crate::connection::CancelHandle;
use crate::transport::messages::Attributes;
use std::fmt;

/// Receives the cancel handle of a command right before it is sent.
pub type CancelHook = Box<dyn FnOnce(CancelHandle) + Send>;

/// Options for a single query, execute, batch or prepare call.
///
/// # Example
///
/// ```no_run
/// # use exadriver::{Driver, QueryOptions};
/// # use exadriver::transport::Attributes;
/// # async fn example(driver: &Driver) -> Result<(), Box<dyn std::error::Error>> {
/// let (tx, rx) = tokio::sync::oneshot::channel();
/// let options = QueryOptions::new()
///     .with_attributes(Attributes {
///         query_timeout: Some(60),
///         ..Default::default()
///     })
///     .with_cancel_hook(move |cancel| {
///         let _ = tx.send(cancel);
///     });
///
/// tokio::spawn(async move {
///     if let Ok(cancel) = rx.await {
///         let _ = cancel.cancel().await;
///     }
/// });
/// let result = driver.query_with("SELECT * FROM BIG_TABLE", options).await;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct QueryOptions {
    /// Attributes sent with the command
    pub attributes: Option<Attributes>,
    cancel_hook: Option<CancelHook>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Register a hook that receives a [`CancelHandle`] for the command.
    pub fn with_cancel_hook(mut self, hook: impl FnOnce(CancelHandle) + Send + 'static) -> Self {
        self.cancel_hook = Some(Box::new(hook));
        self
    }

    pub(crate) fn take_cancel_hook(&mut self) -> Option<CancelHook> {
        self.cancel_hook.take()
    }
}

impl From<Attributes> for QueryOptions {
    fn from(attributes: Attributes) -> Self {
        Self::new().with_attributes(attributes)
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("attributes", &self.attributes)
            .field("cancel_hook", &self.cancel_hook.is_some())
            .finish()
    }
}
