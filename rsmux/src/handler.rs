//! The contract between the multiplexer and user code.
//!
//! A responder is an [`RSocket`]: one method per interaction model, each
//! returning a future or stream in the `futures` vocabulary. Streams carry
//! `Result<Payload, Error>` so a handler can fail an interaction mid-way;
//! the multiplexer translates terminal signals into wire frames.

use std::sync::Arc;

use futures::{FutureExt, StreamExt, future::BoxFuture, stream::BoxStream};
use rsbase::{Error, Payload};

/// An ordered sequence of payloads ending in completion or an error.
pub type PayloadStream = BoxStream<'static, Result<Payload, Error>>;

/// The user-supplied responder, one method per interaction model.
///
/// Every method has a rejecting default so a handler only implements the
/// interactions it serves. Errors returned here surface as ERROR frames
/// for the replied interactions and go to the connection's error consumer
/// for the unreplied ones.
pub trait RSocket: Send + Sync + 'static {
    /// A single one-way message. Never replied to, whatever happens.
    fn fire_and_forget(&self, payload: Payload) -> BoxFuture<'static, Result<(), Error>> {
        let _ = payload;
        unsupported("fire_and_forget").boxed()
    }

    /// At most one payload, or empty completion.
    fn request_response(
        &self,
        payload: Payload,
    ) -> BoxFuture<'static, Result<Option<Payload>, Error>> {
        let _ = payload;
        unsupported("request_response").boxed()
    }

    /// A credit-gated sequence of payloads.
    fn request_stream(&self, payload: Payload) -> PayloadStream {
        let _ = payload;
        futures::stream::once(unsupported("request_stream")).boxed()
    }

    /// A credit-gated sequence in both directions. `payload` is the
    /// bootstrap payload of the interaction; it is also the first item of
    /// `payloads`.
    fn request_channel(&self, payload: Payload, payloads: PayloadStream) -> PayloadStream {
        let _ = (payload, payloads);
        futures::stream::once(unsupported("request_channel")).boxed()
    }

    /// Connection-level metadata. Never replied to.
    fn metadata_push(&self, payload: Payload) -> BoxFuture<'static, Result<(), Error>> {
        let _ = payload;
        unsupported("metadata_push").boxed()
    }
}

async fn unsupported<T>(interaction: &'static str) -> Result<T, Error> {
    Err(Error::rejected(format!("{interaction} is not supported")))
}

/// Sink for errors with no natural subscriber: fire-and-forget and
/// metadata-push failures, and cleanup faults.
pub type ErrorConsumer = Arc<dyn Fn(Error) + Send + Sync>;

/// The default error consumer just logs.
pub fn log_errors() -> ErrorConsumer {
    Arc::new(|error| tracing::error!(%error, "unhandled responder error"))
}
