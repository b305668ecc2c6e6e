pub mod replay;

use anyhow::Result;
use async_trait::async_trait;

pub use replay::ReplaySource;

/// Producer of raw feed messages.
///
/// `Ok(None)` means the transport closed. Implementations must be cancel safe:
/// the collector drops an in-flight `next_message` future when the run is cancelled.
#[async_trait]
pub trait TickSource: Send {
    async fn next_message(&mut self) -> Result<Option<String>>;
}

#[async_trait]
impl TickSource for Box<dyn TickSource> {
    async fn next_message(&mut self) -> Result<Option<String>> {
        (**self).next_message().await
    }
}
