//! Fan-in of message streams.

use crate::message::{self, MessageSource, MessageStream};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Merge `inputs` into one stream.
///
/// Each input is turned into its stream and gets a relay task. Order within an input is preserved; there is
/// no ordering across inputs. The output closes once every input has closed.
pub fn merge<S>(inputs: impl IntoIterator<Item = S>) -> MessageStream
where
    S: MessageSource,
{
    let (tx, rx) = message::channel();

    let mut relays = JoinSet::new();
    for source in inputs {
        let mut input = source.into_stream();
        let tx = tx.clone();
        relays.spawn(async move {
            while let Some(message) = input.recv().await {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
        });
    }
    // Only the relays may keep the output open.
    drop(tx);

    let count = relays.len();
    tokio::spawn(async move {
        while let Some(result) = relays.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "relay task failed");
            }
        }
        debug!(inputs = count, "all merged inputs closed");
    });

    rx
}
