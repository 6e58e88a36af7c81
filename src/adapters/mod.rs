//! Line-oriented transport adapters
//!
//! The jet controller and both sensor bridges speak a simple text protocol: one
//! command line out, at most one response line back. [`LineAdapter`] is the I/O
//! abstraction the instrument drivers in [`crate::instrument`] are written against,
//! so the same driver runs over a real serial port or a scripted mock.

use crate::error::AppResult;
use async_trait::async_trait;

pub mod mock;
pub mod serial_adapter;

pub use mock::MockAdapter;
pub use serial_adapter::SerialAdapter;

/// Low-level I/O for one device link.
#[async_trait]
pub trait LineAdapter: Send {
    /// Short name used in logs and error messages (e.g. the port path).
    fn name(&self) -> &str;

    /// Open the link.
    async fn connect(&mut self) -> AppResult<()>;

    /// Close the link. Closing an already closed link is a no-op.
    async fn disconnect(&mut self) -> AppResult<()>;

    /// Write one command line without waiting for a response.
    async fn send(&mut self, command: &str) -> AppResult<()>;

    /// Write one command line and return the trimmed response line.
    async fn query(&mut self, query: &str) -> AppResult<String>;
}

#[async_trait]
impl LineAdapter for Box<dyn LineAdapter> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn connect(&mut self) -> AppResult<()> {
        (**self).connect().await
    }

    async fn disconnect(&mut self) -> AppResult<()> {
        (**self).disconnect().await
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        (**self).send(command).await
    }

    async fn query(&mut self, query: &str) -> AppResult<String> {
        (**self).query(query).await
    }
}
