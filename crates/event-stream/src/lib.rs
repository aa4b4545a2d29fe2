//! Hot push streams with a first-class error channel.
//!
//! An [`EventStream<T, E>`] carries zero or more values of `T` and then
//! settles exactly once: either it ends successfully or it fails with a
//! single `E`. Once settled, the state never changes again and no further
//! deliveries are observable.
//!
//! Streams are *hot*: subscribers only see what is emitted after they
//! attach. Producers that run on their own (readers, futures, watchers) are
//! therefore written as drivers in [`source`] that feed a stream created and
//! wired by the caller.
//!
//! # Example
//!
//! ```
//! use event_stream::EventStream;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let numbers: EventStream<u32, String> = EventStream::new();
//! let doubled = numbers.map(|n| n * 2).filter(|n| *n > 2).accumulate();
//!
//! numbers.emit(1);
//! numbers.emit(2);
//! numbers.emit(3);
//! numbers.end();
//!
//! assert_eq!(doubled.await, Ok(vec![4, 6]));
//! # }
//! ```

pub mod combinators;
pub mod future;
pub mod source;
pub mod stream;

pub use future::Settled;
pub use stream::{EventStream, StreamState, Subscription};
