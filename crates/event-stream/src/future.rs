//! Bridges from streams to futures and `futures::Stream`.

use crate::stream::EventStream;
use futures::channel::{mpsc, oneshot};
use futures::Stream;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Future resolving once with the settled outcome of a stream.
///
/// If every handle to the stream is dropped before it settles the future
/// stays pending, the same as for a stream that never terminates.
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct Settled<R> {
    receiver: oneshot::Receiver<R>,
}

impl<R> Future for Settled<R> {
    type Output = R;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<R> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) | Poll::Pending => Poll::Pending,
        }
    }
}

/// Resolves a [`Settled`] at most once, from whichever callback gets there
/// first.
struct Resolver<R> {
    sender: Mutex<Option<oneshot::Sender<R>>>,
}

impl<R> Resolver<R> {
    fn pair() -> (Arc<Self>, Settled<R>) {
        let (sender, receiver) = oneshot::channel();
        let resolver = Arc::new(Self {
            sender: Mutex::new(Some(sender)),
        });
        (resolver, Settled { receiver })
    }

    fn resolve(&self, outcome: R) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(outcome);
        }
    }
}

impl<T, E> EventStream<T, E>
where
    T: Send + 'static,
    E: Clone + Send + 'static,
{
    /// Collect every value until the stream ends, or resolve with its error.
    ///
    /// Subscribes immediately, so values emitted before the future is first
    /// polled are kept.
    pub fn accumulate(&self) -> Settled<Result<Vec<T>, E>>
    where
        T: Clone,
    {
        let (resolver, settled) = Resolver::pair();
        let buffer = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&buffer);
        self.subscribe_value(move |value: &T| sink.lock().push(value.clone()));

        let on_end = Arc::clone(&resolver);
        let on_error = resolver;
        self.on_settle(
            move || on_end.resolve(Ok(std::mem::take(&mut *buffer.lock()))),
            move |error| on_error.resolve(Err(error.clone())),
        );
        settled
    }

    /// Resolve with `Ok(())` on end or `Err` on failure.
    pub fn settled(&self) -> Settled<Result<(), E>> {
        let (resolver, settled) = Resolver::pair();
        let on_end = Arc::clone(&resolver);
        let on_error = resolver;
        self.on_settle(
            move || on_end.resolve(Ok(())),
            move |error| on_error.resolve(Err(error.clone())),
        );
        settled
    }

    /// Resolve with the first value, `None` if the stream ends empty, or the
    /// error if it fails first.
    pub fn first(&self) -> Settled<Result<Option<T>, E>>
    where
        T: Clone,
    {
        let (resolver, settled) = Resolver::pair();

        let on_value = Arc::clone(&resolver);
        self.subscribe_value(move |value: &T| on_value.resolve(Ok(Some(value.clone()))));

        let on_end = Arc::clone(&resolver);
        let on_error = resolver;
        self.on_settle(
            move || on_end.resolve(Ok(None)),
            move |error| on_error.resolve(Err(error.clone())),
        );
        settled
    }

    /// Adapt into a `futures::Stream`. A failure is yielded as the last item.
    pub fn into_stream(&self) -> impl Stream<Item = Result<T, E>> + Send + Unpin + 'static
    where
        T: Clone,
    {
        let (sender, receiver) = mpsc::unbounded();

        let values = sender.clone();
        self.subscribe_value(move |value: &T| {
            let _ = values.unbounded_send(Ok(value.clone()));
        });

        let on_end = sender.clone();
        let on_error = sender;
        self.on_settle(
            move || on_end.close_channel(),
            move |error| {
                let _ = on_error.unbounded_send(Err(error.clone()));
                on_error.close_channel();
            },
        );
        receiver
    }
}
