//! Time limits around blob store calls.

use std::future::Future;
use std::time::Duration;

use creditshare_blob::{BlobError, BlobReader, BlobResult};
use futures::stream::{self, StreamExt};

use crate::error::ShareError;

/// Runs a blob operation, failing with `Timeout` if it exceeds `limit`.
pub(crate) async fn with_timeout<T, F>(
    limit: Duration,
    op: &'static str,
    fut: F,
) -> Result<T, ShareError>
where
    F: Future<Output = BlobResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(ShareError::from),
        Err(_) => {
            tracing::warn!(op, limit_ms = limit.as_millis() as u64, "blob operation timed out");
            Err(ShareError::Timeout { op, after: limit })
        }
    }
}

/// Wraps a read stream so that each chunk must arrive within `limit`.
///
/// A stalled chunk ends the stream with a `TimedOut` I/O error.
pub(crate) fn bound_stream(reader: BlobReader, limit: Duration) -> BlobReader {
    let meta = reader.meta().clone();
    let chunks = stream::unfold(Some(reader), move |state| async move {
        let mut reader = match state {
            Some(reader) => reader,
            None => return None,
        };
        match tokio::time::timeout(limit, reader.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(reader))),
            Ok(Some(Err(e))) => Some((Err(e), None)),
            Ok(None) => None,
            Err(_) => Some((
                Err(BlobError::IoError(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no data for {:?}", limit),
                ))),
                None,
            )),
        }
    });
    BlobReader::new(meta, chunks.boxed())
}
