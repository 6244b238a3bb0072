use crate::error::BoxError;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Response body type produced by the proxy.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

pub fn full(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed_unsync()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

pub fn boxed<B>(body: B) -> ProxyBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// Body fed chunk by chunk from a rewriting task.
///
/// Dropping it closes the channel, which the task takes as a signal to stop
/// and release the upstream body.
pub struct ChannelBody {
    rx: mpsc::Receiver<Result<Bytes, BoxError>>,
}

impl ChannelBody {
    pub fn new(rx: mpsc::Receiver<Result<Bytes, BoxError>>) -> Self {
        Self { rx }
    }
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_body_yields_chunks_in_order() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"<p>"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"hi</p>"))).await.unwrap();
        drop(tx);

        let collected = ChannelBody::new(rx).collect().await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"<p>hi</p>");
    }

    #[tokio::test]
    async fn test_channel_body_surfaces_errors() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"partial"))).await.unwrap();
        tx.send(Err("upstream reset".into())).await.unwrap();
        drop(tx);

        let err = ChannelBody::new(rx).collect().await.unwrap_err();
        assert_eq!(err.to_string(), "upstream reset");
    }

    #[tokio::test]
    async fn test_full_and_empty() {
        assert_eq!(full("abc").collect().await.unwrap().to_bytes(), Bytes::from_static(b"abc"));
        assert!(empty().collect().await.unwrap().to_bytes().is_empty());
    }
}
