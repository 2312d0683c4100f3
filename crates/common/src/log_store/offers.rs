use futures::stream::{self, BoxStream, StreamExt};

use super::{LogStore, LogStoreError};
use crate::crypto::DiscoveryKey;
use crate::envelope::LogPosition;

/// Stream every position held for `project`.
///
/// The log heads are read once, on first poll; positions are then
///  produced on demand without touching the store again. Envelopes
///  appended after that read are not included.
pub fn list_offers<L: LogStore>(
    store: L,
    project: DiscoveryKey,
) -> BoxStream<'static, Result<LogPosition, LogStoreError<L::Error>>> {
    stream::once(async move { store.list_logs(&project).await })
        .map(|logs| match logs {
            Ok(logs) => stream::iter(logs.into_iter().flat_map(|(log, head)| {
                (0..=head).map(move |index| Ok::<_, LogStoreError<L::Error>>(LogPosition::new(log, index)))
            }))
            .left_stream(),
            Err(e) => stream::iter(std::iter::once(Err(e))).right_stream(),
        })
        .flatten()
        .boxed()
}
