//! Derived streams.
//!
//! Every combinator wires its subscriptions at construction time. A source
//! that is already terminal when the combinator is built settles the derived
//! stream right away.

use crate::stream::{EventStream, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;

impl<T, E> EventStream<T, E>
where
    T: Send + 'static,
    E: Clone + Send + 'static,
{
    /// Transform every value with `f`. End and error pass through unchanged.
    pub fn map<U, F>(&self, f: F) -> EventStream<U, E>
    where
        U: Send + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let out = EventStream::new();
        let sink = out.clone();
        self.subscribe_value(move |value| sink.emit(f(value)));
        self.forward_settle(&out);
        out
    }

    /// Like [`map`](Self::map), but an `Err` from `f` fails the derived
    /// stream.
    pub fn try_map<U, F>(&self, f: F) -> EventStream<U, E>
    where
        U: Send + 'static,
        F: Fn(&T) -> Result<U, E> + Send + Sync + 'static,
    {
        let out = EventStream::new();
        let sink = out.clone();
        self.subscribe_value(move |value| match f(value) {
            Ok(mapped) => sink.emit(mapped),
            Err(error) => sink.fail(error),
        });
        self.forward_settle(&out);
        out
    }

    /// Keep only the values for which `predicate` holds.
    pub fn filter<F>(&self, predicate: F) -> EventStream<T, E>
    where
        T: Clone,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let out = EventStream::new();
        let sink = out.clone();
        self.subscribe_value(move |value| {
            if predicate(value) {
                sink.emit(value.clone());
            }
        });
        self.forward_settle(&out);
        out
    }

    /// Map every value to an inner stream and follow only the latest one.
    pub fn switch_map<U, F>(&self, f: F) -> EventStream<U, E>
    where
        U: Clone + Send + 'static,
        F: Fn(&T) -> EventStream<U, E> + Send + Sync + 'static,
    {
        self.map(f).switch_latest()
    }

    pub(crate) fn forward_settle<U>(&self, out: &EventStream<U, E>)
    where
        U: Send + 'static,
    {
        let on_end = out.clone();
        let on_error = out.clone();
        self.on_settle(move || on_end.end(), move |error| on_error.fail(error.clone()));
    }
}

struct Latest<A, B> {
    left: Option<A>,
    right: Option<B>,
    ended: u8,
}

impl<A: Clone, B: Clone> Latest<A, B> {
    fn pair(&self) -> Option<(A, B)> {
        Some((self.left.clone()?, self.right.clone()?))
    }
}

/// Emit `(a, b)` pairs of the most recent values once both sides have
/// emitted, and again on every later emission of either.
///
/// The result ends after both sources end and fails on the first failure of
/// either.
pub fn combine_latest<A, B, E>(a: &EventStream<A, E>, b: &EventStream<B, E>) -> EventStream<(A, B), E>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let out = EventStream::new();
    let latest = Arc::new(Mutex::new(Latest {
        left: None,
        right: None,
        ended: 0,
    }));

    {
        let latest = Arc::clone(&latest);
        let sink = out.clone();
        a.subscribe_value(move |value| {
            let pair = {
                let mut latest = latest.lock();
                latest.left = Some(value.clone());
                latest.pair()
            };
            if let Some(pair) = pair {
                sink.emit(pair);
            }
        });
    }
    {
        let latest = Arc::clone(&latest);
        let sink = out.clone();
        b.subscribe_value(move |value| {
            let pair = {
                let mut latest = latest.lock();
                latest.right = Some(value.clone());
                latest.pair()
            };
            if let Some(pair) = pair {
                sink.emit(pair);
            }
        });
    }

    let settle_one = {
        let latest = Arc::clone(&latest);
        let sink = out.clone();
        Arc::new(move || {
            let both = {
                let mut latest = latest.lock();
                latest.ended += 1;
                latest.ended == 2
            };
            if both {
                sink.end();
            }
        })
    };

    let on_end = Arc::clone(&settle_one);
    let on_error = out.clone();
    a.on_settle(move || on_end(), move |error| on_error.fail(error.clone()));

    let on_end = settle_one;
    let on_error = out.clone();
    b.on_settle(move || on_end(), move |error| on_error.fail(error.clone()));

    out
}

/// The inner stream currently followed by a switch, with the subscriptions
/// that forward it.
struct Attached<T, E> {
    stream: EventStream<T, E>,
    subscriptions: Vec<Subscription>,
}

impl<T, E> Attached<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn new(stream: EventStream<T, E>, sink: &EventStream<T, E>) -> Self {
        let values = sink.clone();
        let ends = sink.clone();
        let errors = sink.clone();
        let subscriptions = vec![
            stream.subscribe_value(move |value| values.emit(value.clone())),
            stream.subscribe_end(move || ends.end()),
            stream.subscribe_error(move |error| errors.fail(error.clone())),
        ];
        Self { stream, subscriptions }
    }

    /// Stop forwarding, then force the inner stream to end.
    fn release(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
        self.stream.end();
    }
}

impl<T, E> EventStream<EventStream<T, E>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Flatten a stream of streams by following the most recent inner
    /// stream.
    ///
    /// A new inner stream detaches and ends the previous one. Ending the
    /// outer stream ends the current inner stream and then the result; a
    /// failing outer stream fails the result.
    ///
    /// An inner stream that has already ended when it arrives forwards
    /// nothing, not even its end. The result stays open until the outer
    /// stream settles or a later inner stream ends.
    pub fn switch_latest(&self) -> EventStream<T, E> {
        let out = EventStream::new();
        let current: Arc<Mutex<Option<Attached<T, E>>>> = Arc::new(Mutex::new(None));

        {
            let current = Arc::clone(&current);
            let sink = out.clone();
            self.subscribe_value(move |inner: &EventStream<T, E>| {
                let previous = current.lock().take();
                if let Some(previous) = previous {
                    previous.release();
                }
                let attached = Attached::new(inner.clone(), &sink);
                *current.lock() = Some(attached);
            });
        }

        let on_end = {
            let current = Arc::clone(&current);
            let sink = out.clone();
            move || {
                let previous = current.lock().take();
                if let Some(previous) = previous {
                    previous.release();
                }
                sink.end();
            }
        };
        let on_error = {
            let sink = out.clone();
            move |error: &E| sink.fail(error.clone())
        };
        self.on_settle(on_end, on_error);

        out
    }
}
