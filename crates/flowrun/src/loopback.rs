//! In-process transport that hands requests straight to a `CompleterService`.
//!
//! Lets the remote client run against the in-memory engine without a socket,
//! exercising the full wire encoding.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::service::CompleterService;
use crate::transport;
use crate::transport::Request;
use crate::transport::Response;
use crate::transport::Transport;
use crate::transport::TransportError;

pub struct LoopbackTransport {
    service: CompleterService,
    sent: AtomicUsize,
    disconnected: AtomicBool,
}

impl LoopbackTransport {
    pub fn new(service: CompleterService) -> Self {
        Self { service, sent: AtomicUsize::new(0), disconnected: AtomicBool::new(false) }
    }

    pub fn service(&self) -> &CompleterService {
        &self.service
    }

    /// Number of requests sent so far.
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Makes every later request fail as if the completer were unreachable.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, request: Request) -> transport::Result<Response> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost("loopback disconnected".into()));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(self.service.handle(request).await)
    }
}
