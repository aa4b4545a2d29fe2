//! The stream handle, its state machine and raw subscriptions.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

type ValueCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type EndCallback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Lifecycle of a stream.
///
/// `Open` may move to `Ended` or `Failed`; both are terminal and never
/// change again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState<E> {
    /// Values can still be emitted.
    Open,
    /// Finished successfully.
    Ended,
    /// Finished with an error.
    Failed(E),
}

impl<E> StreamState<E> {
    /// Whether the stream still accepts values.
    pub fn is_open(&self) -> bool {
        matches!(self, StreamState::Open)
    }

    /// Whether the stream has ended or failed.
    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Value,
    End,
    Error,
}

struct Inner<T, E> {
    state: StreamState<E>,
    next_id: u64,
    values: Vec<(u64, ValueCallback<T>)>,
    ends: Vec<(u64, EndCallback)>,
    errors: Vec<(u64, ErrorCallback<E>)>,
}

impl<T, E> Inner<T, E> {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A hot, push-based stream of `T` values with a terminal `E` error.
///
/// `EventStream` is a handle: clones share the same state and subscribers.
/// Subscriber callbacks run synchronously on the thread that calls
/// [`emit`](Self::emit), [`end`](Self::end) or [`fail`](Self::fail) and must
/// not block.
pub struct EventStream<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for EventStream<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for EventStream<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        let state = match inner.state {
            StreamState::Open => "open",
            StreamState::Ended => "ended",
            StreamState::Failed(_) => "failed",
        };
        f.debug_struct("EventStream")
            .field("state", &state)
            .field("value_subscribers", &inner.values.len())
            .finish()
    }
}

impl<T, E> Default for EventStream<T, E>
where
    T: Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by the `subscribe_*` methods.
///
/// Dropping it keeps the callback attached; call
/// [`unsubscribe`](Self::unsubscribe) to detach.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn inert() -> Self {
        Self { detach: None }
    }

    /// Detach the callback. Has no effect on a terminal stream.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }

    /// Whether the callback was attached to an open stream.
    pub fn is_attached(&self) -> bool {
        self.detach.is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl<T, E> EventStream<T, E>
where
    T: Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create an open stream with no subscribers.
    pub fn new() -> Self {
        Self::with_state(StreamState::Open)
    }

    /// Create a stream that has already ended.
    pub fn ended() -> Self {
        Self::with_state(StreamState::Ended)
    }

    /// Create a stream that has already failed with `error`.
    pub fn failed(error: E) -> Self {
        Self::with_state(StreamState::Failed(error))
    }

    fn with_state(state: StreamState<E>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                next_id: 0,
                values: Vec::new(),
                ends: Vec::new(),
                errors: Vec::new(),
            })),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> StreamState<E> {
        self.inner.lock().state.clone()
    }

    /// Whether values can still be emitted.
    pub fn is_open(&self) -> bool {
        self.inner.lock().state.is_open()
    }

    /// The stored error of a failed stream.
    pub fn error(&self) -> Option<E> {
        match &self.inner.lock().state {
            StreamState::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Whether both handles point at the same stream.
    pub fn same_stream(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Deliver `value` to every value subscriber, in subscription order.
    ///
    /// Does nothing once the stream is terminal. If a subscriber settles the
    /// stream mid-delivery, the remaining subscribers are skipped.
    pub fn emit(&self, value: T) {
        let callbacks: Vec<ValueCallback<T>> = {
            let inner = self.inner.lock();
            if !inner.state.is_open() {
                return;
            }
            inner.values.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        for callback in callbacks {
            if !self.is_open() {
                break;
            }
            callback(&value);
        }
    }

    /// Settle the stream successfully. Idempotent.
    pub fn end(&self) {
        let (ends, released) = {
            let mut inner = self.inner.lock();
            if !inner.state.is_open() {
                return;
            }
            inner.state = StreamState::Ended;
            let values = std::mem::take(&mut inner.values);
            let errors = std::mem::take(&mut inner.errors);
            (std::mem::take(&mut inner.ends), (values, errors))
        };
        drop(released);

        for (_, callback) in ends {
            callback();
        }
    }

    /// Settle the stream with `error`. Idempotent; ignored once terminal.
    ///
    /// Every error subscriber is called exactly once. Value and end
    /// subscribers are released without being called.
    pub fn fail(&self, error: E) {
        let (errors, released) = {
            let mut inner = self.inner.lock();
            if !inner.state.is_open() {
                return;
            }
            inner.state = StreamState::Failed(error.clone());
            let values = std::mem::take(&mut inner.values);
            let ends = std::mem::take(&mut inner.ends);
            (std::mem::take(&mut inner.errors), (values, ends))
        };
        drop(released);

        for (_, callback) in errors {
            callback(&error);
        }
    }

    /// Observe values. Inert on a terminal stream.
    pub fn subscribe_value<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        if !inner.state.is_open() {
            return Subscription::inert();
        }
        let id = inner.next_id();
        inner.values.push((id, Arc::new(callback)));
        drop(inner);
        self.detacher(id, Channel::Value)
    }

    /// Observe successful termination. Inert on a terminal stream.
    pub fn subscribe_end<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        if !inner.state.is_open() {
            return Subscription::inert();
        }
        let id = inner.next_id();
        inner.ends.push((id, Arc::new(callback)));
        drop(inner);
        self.detacher(id, Channel::End)
    }

    /// Observe failure.
    ///
    /// On an already failed stream the callback still runs, once, on the
    /// next scheduler tick with the stored error. Inert on an ended stream.
    pub fn subscribe_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        match inner.state.clone() {
            StreamState::Open => {
                let id = inner.next_id();
                inner.errors.push((id, Arc::new(callback)));
                drop(inner);
                self.detacher(id, Channel::Error)
            }
            StreamState::Failed(error) => {
                drop(inner);
                deliver_later(move || callback(&error));
                Subscription::inert()
            }
            StreamState::Ended => Subscription::inert(),
        }
    }

    /// Attach to both terminal channels atomically, or run the matching
    /// callback right away if the stream is already terminal.
    pub(crate) fn on_settle<FE, FF>(&self, on_end: FE, on_error: FF)
    where
        FE: Fn() + Send + Sync + 'static,
        FF: Fn(&E) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        match inner.state.clone() {
            StreamState::Open => {
                let id = inner.next_id();
                inner.ends.push((id, Arc::new(on_end)));
                let id = inner.next_id();
                inner.errors.push((id, Arc::new(on_error)));
            }
            StreamState::Ended => {
                drop(inner);
                on_end();
            }
            StreamState::Failed(error) => {
                drop(inner);
                on_error(&error);
            }
        }
    }

    /// Side-effecting observation of values; returns the same stream.
    pub fn tap<F>(&self, callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_value(callback);
        self.clone()
    }

    /// Side-effecting observation of the end; returns the same stream.
    pub fn tap_end<F>(&self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe_end(callback);
        self.clone()
    }

    /// Side-effecting observation of the error; returns the same stream.
    pub fn tap_error<F>(&self, callback: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_error(callback);
        self.clone()
    }

    fn detacher(&self, id: u64, channel: Channel) -> Subscription {
        let weak: Weak<Mutex<Inner<T, E>>> = Arc::downgrade(&self.inner);
        Subscription {
            detach: Some(Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let released = {
                    let mut inner = inner.lock();
                    match channel {
                        Channel::Value => take_by_id(&mut inner.values, id).map(drop),
                        Channel::End => take_by_id(&mut inner.ends, id).map(drop),
                        Channel::Error => take_by_id(&mut inner.errors, id).map(drop),
                    }
                };
                if released.is_none() {
                    tracing::trace!(id, ?channel, "subscription already released");
                }
            })),
        }
    }
}

fn take_by_id<C>(callbacks: &mut Vec<(u64, C)>, id: u64) -> Option<C> {
    let position = callbacks.iter().position(|(candidate, _)| *candidate == id)?;
    Some(callbacks.remove(position).1)
}

/// Run `task` on the next scheduler tick, or inline without a runtime.
fn deliver_later(task: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { task() });
        }
        Err(_) => task(),
    }
}
