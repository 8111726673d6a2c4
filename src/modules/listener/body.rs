//! Response bodies.

use crate::modules::target_group::InFlightGuard;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Body type of every response a listener sends.
pub type ResponseBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// A complete in-memory body.
#[must_use]
pub fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// A target's response body that keeps the target's in-flight slot until
/// the body ends, fails, or is dropped.
#[derive(Debug)]
pub struct GuardedBody<B> {
    inner: B,
    guard: Option<InFlightGuard>,
}

impl<B> GuardedBody<B> {
    /// Wrap a body.
    pub fn new(inner: B, guard: InFlightGuard) -> Self {
        Self {
            inner,
            guard: Some(guard),
        }
    }

    /// Check if the slot is still held.
    #[must_use]
    pub fn holds_slot(&self) -> bool {
        self.guard.is_some()
    }
}

impl<B> Body for GuardedBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        if matches!(frame, None | Some(Err(_))) {
            this.guard = None;
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
