//! Polling stream over the message log.

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use tracing::warn;

use super::{ChannelError, Envelope, SharedChannel};

/// Stream every record of `channel`, starting at the beginning of the log,
/// then keep polling every `poll` for new ones.
///
/// The stream ends after yielding the first read error.
pub fn follow(
    channel: SharedChannel,
    poll: Duration,
) -> Pin<Box<dyn Stream<Item = Result<Envelope, ChannelError>> + Send>> {
    let stream = async_stream::stream! {
        let mut offset = 0;
        loop {
            match channel.with_blocking(move |c| c.read_since(offset)).await {
                Ok((records, total)) => {
                    offset = total;
                    for record in records {
                        yield Ok(record);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "stopping message follow");
                    yield Err(e);
                    break;
                }
            }
            tokio::time::sleep(poll).await;
        }
    };

    Box::pin(stream)
}
