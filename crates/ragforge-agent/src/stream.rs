use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use ragforge_core::{Fragment, RagError, RagResult};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// An ordered stream of message fragments.
///
/// The stream ends after the last fragment; an `Err` item means the producer
/// failed and no further items follow.
pub type FragmentStream = Pin<Box<dyn Stream<Item = RagResult<Fragment>> + Send>>;

/// Fans one fragment stream out to independent cursors.
///
/// A background pump reads the source once and hands every item to each live
/// cursor. Cursors buffer independently, so a slow reader never stalls the
/// others, and dropping a cursor only detaches that cursor. The source is
/// dropped once every cursor is gone or it is exhausted.
pub struct StreamTee;

impl StreamTee {
    /// Splits `source` into `n` cursors. Must be called inside a Tokio runtime.
    pub fn split(source: FragmentStream, n: usize) -> Vec<FragmentStream> {
        let mut senders = Vec::with_capacity(n);
        let mut cursors = Vec::with_capacity(n);
        for _ in 0..n {
            let (tx, rx) = mpsc::unbounded_channel::<RagResult<Fragment>>();
            senders.push(tx);
            cursors.push(Box::pin(UnboundedReceiverStream::new(rx)) as FragmentStream);
        }
        tokio::spawn(pump(source, senders));
        cursors
    }
}

async fn pump(
    mut source: FragmentStream,
    mut senders: Vec<mpsc::UnboundedSender<RagResult<Fragment>>>,
) {
    let mut forwarded = 0usize;
    loop {
        let next = tokio::select! {
            item = source.next() => Some(item),
            _ = join_all(senders.iter().map(mpsc::UnboundedSender::closed)) => None,
        };
        let Some(item) = next else {
            debug!(forwarded, "Every stream cursor closed; dropping source");
            return;
        };
        let Some(item) = item else {
            debug!(forwarded, "Stream source exhausted");
            return;
        };

        let failed = item.is_err();
        match item {
            Ok(fragment) => senders.retain(|tx| tx.send(Ok(fragment.clone())).is_ok()),
            Err(e) => {
                let message = e.to_string();
                senders.retain(|tx| tx.send(Err(RagError::Stream(message.clone()))).is_ok());
            }
        }
        forwarded += 1;
        if failed || senders.is_empty() {
            return;
        }
    }
}
