//! Bounded upstream connection pool
//!
//! One shared `reqwest::Client` carries all upstream traffic. A semaphore caps
//! the number of calls in flight; a request that cannot get a slot within the
//! acquire timeout fails with [`Backpressure`] instead of waiting forever.
//!
//! Slots are RAII guards. Dropping a [`PoolSlot`] (or the [`LeasedStream`]
//! that owns one) returns it, so every exit path releases capacity: normal
//! completion, errors, and callers that stop polling mid-stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::Config;
use crate::streaming::{ByteStream, StreamError};

/// No upstream slot became free within the acquire timeout.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("upstream connection pool saturated: no slot free after {waited_ms} ms")]
pub struct Backpressure {
    pub waited_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_idle_per_host: usize,
    pub max_concurrent: usize,
    pub acquire_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            max_concurrent: 256,
            acquire_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for PoolSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_idle_per_host: config.pool_max_idle_per_host,
            max_concurrent: config.pool_max_concurrent.max(1),
            acquire_timeout: config.pool_acquire_timeout,
            connect_timeout: config.upstream_connect_timeout,
        }
    }
}

pub struct ConnectionPool {
    http: reqwest::Client,
    slots: Arc<Semaphore>,
    settings: PoolSettings,
}

impl ConnectionPool {
    pub fn new(settings: PoolSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .connect_timeout(settings.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            slots: Arc::new(Semaphore::new(settings.max_concurrent)),
            settings,
        })
    }

    /// The shared pooled transport
    pub fn session(&self) -> &reqwest::Client {
        &self.http
    }

    /// Reserve capacity for one upstream call, waiting at most the acquire timeout.
    pub async fn acquire(&self) -> Result<PoolSlot, Backpressure> {
        let waited_ms = self.settings.acquire_timeout.as_millis() as u64;

        match tokio::time::timeout(
            self.settings.acquire_timeout,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(PoolSlot { _permit: permit }),
            Ok(Err(_closed)) => Err(Backpressure { waited_ms: 0 }),
            Err(_elapsed) => {
                warn!(
                    max_concurrent = self.settings.max_concurrent,
                    waited_ms, "Upstream pool saturated"
                );
                metrics::counter!("switchyard_pool_saturated_total").increment(1);
                Err(Backpressure { waited_ms })
            }
        }
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.settings.max_concurrent
    }
}

/// Reserved capacity for one upstream call
#[derive(Debug)]
pub struct PoolSlot {
    _permit: OwnedSemaphorePermit,
}

/// An upstream body stream that owns its pool slot.
///
/// The slot is released as soon as the body ends, or when the lease is
/// dropped before that (caller disconnected, relay aborted).
pub struct LeasedStream {
    inner: ByteStream,
    slot: Option<PoolSlot>,
    request_id: String,
}

impl LeasedStream {
    pub fn new(inner: ByteStream, slot: PoolSlot, request_id: impl Into<String>) -> Self {
        Self {
            inner,
            slot: Some(slot),
            request_id: request_id.into(),
        }
    }

    /// Whether the upstream body has been read to the end
    pub fn is_finished(&self) -> bool {
        self.slot.is_none()
    }
}

impl Stream for LeasedStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.slot.is_none() {
            return Poll::Ready(None);
        }

        let polled = this.inner.as_mut().poll_next(cx);
        if let Poll::Ready(None) = polled {
            this.slot = None;
        }
        polled
    }
}

impl Drop for LeasedStream {
    fn drop(&mut self) {
        if self.slot.is_some() {
            debug!(
                request_id = %self.request_id,
                "Upstream stream released before completion"
            );
        }
    }
}
