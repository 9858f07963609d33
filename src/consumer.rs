//! Drives a [`Source`] into something that consumes its messages (in
//! practice, a [`Store`](crate::store::Store)), with reconnect-with-
//! backoff and startup readiness signaling.

use crate::{message::Message, source::Source};
use futures::{future::BoxFuture, Future, FutureExt, StreamExt};
use rand::Rng;
use std::{error::Error as StdError, fmt, sync::Arc, time::Duration};
use tokio::{sync::watch, task};
use tracing::warn;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, thiserror::Error)]
pub enum ReadError<E>
where
    E: Clone + fmt::Debug + StdError + 'static,
{
    #[error("Background task stopped before sending result")]
    TaskDropped,

    #[error(transparent)]
    Inner(#[from] E),
}

/// Represents the state of a [Consumer]
/// after consuming a message
pub enum InitState {
    Pending,
    Done,
}

/// Exponential backoff with full jitter, matching the documented
/// reconnect policy: base 1s, doubling per consecutive failure,
/// capped at 30s.
fn backoff_delay(failures: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1 << failures.min(5));
    let capped = exp.min(BACKOFF_CAP);
    let jittered_millis = rand::thread_rng().gen_range(0..=capped.as_millis() as u64);
    Duration::from_millis(jittered_millis)
}

/// A Consumer reads messages from a source and persists them
///
/// Should be implemented for any [Store](crate::store::Store)
/// when intended for prod
pub trait Consumer<S> {
    type Error;
    type Future: Future<Output = Result<InitState, Self::Error>> + Send;

    /// Process a single message coming from a [Source]
    ///
    /// Receives a unique reference only, so it stays portable and
    /// queries on stores can be made concurrently.
    /// Use atomic updates or an inner mutex to mutate.
    fn consume(&self, msg: Message) -> Self::Future;

    /// Start reading messages from a stream and provide readiness signaling
    /// and retries.
    ///
    /// Usually just wraps [`consume`] in a background task.
    ///
    /// Reconnects indefinitely on transport failures with jittered
    /// exponential backoff, the way a production streaming client
    /// keeps retrying in the background long after its own `start()`
    /// caller has stopped waiting. Only an error surfacing from
    /// [`consume`] itself (e.g. a misconfigured consumer) ends the
    /// loop.
    ///
    /// When not interested in readiness, just drop the returned future. This has no
    /// bad consequences.
    fn read_from(
        self: Arc<Self>,
        source: S,
    ) -> BoxFuture<'static, Result<(), ReadError<Self::Error>>>
    where
        Self: Send + Sync + 'static,
        Self::Error: fmt::Debug + StdError + Clone + Sync + Send,
        S: Source + Send + 'static,
        S::Stream: Unpin + Send,
        S::Error: fmt::Display + Send,
    {
        let (init_tx, mut init_rx) =
            watch::channel::<Option<Result<(), ReadError<Self::Error>>>>(None);

        task::spawn(async move {
            let mut stream = source.stream();
            let mut failures: u32 = 0;
            loop {
                let msg = match stream.next().await {
                    Some(Ok(msg)) => msg,
                    Some(Err(error)) => {
                        let delay = backoff_delay(failures);
                        failures += 1;
                        warn!(%error, failures, delay_ms = delay.as_millis() as u64, "failed reading from source, reconnecting");
                        tokio::time::sleep(delay).await;
                        stream = source.stream();
                        continue;
                    }
                    None => return,
                };
                // reset failure counter after a single successful read
                failures = 0;

                match self.consume(msg).await {
                    Err(e) => {
                        let _ = init_tx.send(Some(Err(e.into())));
                        return;
                    }
                    Ok(InitState::Done) => {
                        let _ = init_tx.send(Some(Ok(())));
                    }
                    Ok(InitState::Pending) => {}
                };
            }
        });

        // future to wait for readiness
        async move {
            if init_rx.borrow().is_none() {
                init_rx
                    .changed()
                    .await
                    .map_err(|_| ReadError::TaskDropped)?;
            }
            // safe to unwrap: if it's still None at this point, it's a bug
            let res = init_rx.borrow().as_ref().cloned().unwrap();
            res
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped_and_never_exceeds_bound() {
        for failures in 0..10 {
            let delay = backoff_delay(failures);
            assert!(delay <= BACKOFF_CAP);
        }
    }
}
