use std::future::IntoFuture;
use std::time::Duration;

use flume::RecvTimeoutError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::ClientError;

/// Sending half of a [`Notice`], held by the event loop
pub type Reply<T> = flume::Sender<Result<T, ClientError>>;

/// Resolves a notice. The caller may have dropped it already.
pub(crate) fn resolve<T>(reply: &Reply<T>, result: Result<T, ClientError>) {
    if reply.try_send(result).is_err() {
        log::trace!("Notice dropped before it was resolved");
    }
}

/// Completion of a request made through a [`Client`](crate::Client).
///
/// Resolves exactly once. Can be awaited or blocked on with [`Notice::wait`].
/// When the event loop goes away before answering, the notice resolves with
/// [`ClientError::ConnectionClosed`].
#[derive(Debug)]
#[must_use = "a notice does nothing unless waited on or awaited"]
pub struct Notice<T> {
    rx: flume::Receiver<Result<T, ClientError>>,
}

impl<T> Notice<T> {
    pub(crate) fn new() -> (Reply<T>, Self) {
        let (tx, rx) = flume::bounded(1);
        (tx, Self { rx })
    }

    /// Notice that already failed, for requests rejected before reaching the event loop
    pub(crate) fn failed(error: ClientError) -> Self {
        let (tx, notice) = Self::new();
        resolve(&tx, Err(error));
        notice
    }

    /// Blocks until the request completes
    pub fn wait(self) -> Result<T, ClientError> {
        self.rx
            .recv()
            .unwrap_or(Err(ClientError::ConnectionClosed))
    }

    /// Blocks until the request completes or `timeout` elapses.
    ///
    /// Timing out leaves the request running, the notice can be waited on again.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, ClientError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ClientError::WaitTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::ConnectionClosed),
        }
    }
}

impl<T: Send + 'static> IntoFuture for Notice<T> {
    type Output = Result<T, ClientError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        async move {
            self.rx
                .recv_async()
                .await
                .unwrap_or(Err(ClientError::ConnectionClosed))
        }
        .boxed()
    }
}
