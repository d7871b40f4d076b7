//! Response body wrapper that accounts bytes and ships the record.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use pin_project_lite::pin_project;

use crate::access_log::record::{AccessLogger, SharedRecord};

pin_project! {
    /// Counts response bytes as they stream to the client and delivers the
    /// access log record exactly once, when the stream ends or the client
    /// disconnects mid-response.
    pub struct CountingBody {
        #[pin]
        inner: Body,
        record: SharedRecord,
        logger: Arc<dyn AccessLogger>,
        shipped: bool,
    }

    impl PinnedDrop for CountingBody {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            ship(this.record, this.logger, this.shipped);
        }
    }
}

impl CountingBody {
    pub fn new(inner: Body, record: SharedRecord, logger: Arc<dyn AccessLogger>) -> Self {
        Self { inner, record, logger, shipped: false }
    }
}

fn ship(record: &SharedRecord, logger: &Arc<dyn AccessLogger>, shipped: &mut bool) {
    if *shipped {
        return;
    }
    *shipped = true;
    let mut record = record.lock().unwrap();
    record.finish();
    logger.log(&record);
}

impl http_body::Body for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.record.lock().unwrap().bytes_sent += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                ship(this.record, this.logger, this.shipped);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                ship(this.record, this.logger, this.shipped);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
