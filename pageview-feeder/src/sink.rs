//! Interception for hosts that write responses imperatively instead of returning
//! them from a tower service.
use std::io;

use http::StatusCode;
use thiserror::Error;

use crate::feeder::PageviewFeeder;
use crate::filter::decode_path;
use crate::identity::RequestInfo;

/// An optional capability a response sink does not have.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    #[error("response sink does not support flushing")]
    Flush,
    #[error("response sink does not support hijacking the connection")]
    Hijack,
}

/// The optional capabilities of a response sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub flush: bool,
    pub hijack: bool,
}

/// Where a host writes a response to.
///
/// Only `write_status` and `write_body` are required. Sinks that can flush
/// buffered output or hand over the underlying connection (for protocol upgrades)
/// override the corresponding methods and report them in `capabilities`.
pub trait ResponseSink {
    /// The connection handed over by `hijack`.
    type Connection;

    /// Commit the status code of the response.
    fn write_status(&mut self, status: StatusCode);

    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn flush(&mut self) -> Result<(), Unsupported> {
        Err(Unsupported::Flush)
    }

    fn hijack(&mut self) -> Result<Self::Connection, Unsupported> {
        Err(Unsupported::Hijack)
    }
}

/// A response sink that reports the request once its status code is committed.
/// Everything is forwarded to the wrapped sink as is.
///
/// The status is committed by the first [`ResponseSink::write_status`], or by the
/// first [`ResponseSink::write_body`] if no status was written. The latter is
/// reported as `200 OK`, the status the host answers with in that case, even
/// though no status was ever written to the sink.
pub struct InterceptingSink<S> {
    inner: S,
    feeder: PageviewFeeder,
    request: RequestInfo,
    committed: bool,
}

impl<S: ResponseSink> InterceptingSink<S> {
    pub fn new(inner: S, feeder: PageviewFeeder, request: RequestInfo) -> Self {
        Self {
            inner,
            feeder,
            request,
            committed: false,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn commit(&mut self, status: StatusCode) {
        if !self.committed {
            self.committed = true;
            self.feeder.observe(&self.request, status);
        }
    }
}

impl<S: ResponseSink> ResponseSink for InterceptingSink<S> {
    type Connection = S::Connection;

    fn write_status(&mut self, status: StatusCode) {
        self.commit(status);
        self.inner.write_status(status);
    }

    /// Writing the body without a status commits an implicit `200 OK`.
    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.commit(StatusCode::OK);
        self.inner.write_body(buf)
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn flush(&mut self) -> Result<(), Unsupported> {
        self.inner.flush()
    }

    fn hijack(&mut self) -> Result<Self::Connection, Unsupported> {
        self.inner.hijack()
    }
}

impl PageviewFeeder {
    /// Wrap `sink` if a response to `request` could be reported, or hand it back
    /// untouched otherwise.
    pub fn intercept<S: ResponseSink>(
        &self,
        sink: S,
        request: RequestInfo,
    ) -> Result<InterceptingSink<S>, S> {
        let path = request.url.split('?').next().unwrap_or_default();
        if self.should_intercept(&request.host, &decode_path(path)) {
            Ok(InterceptingSink::new(sink, self.clone(), request))
        } else {
            Err(sink)
        }
    }
}
