//! Request-per-HTTP-call transport.
//!
//! Framing: one JSON-RPC message per `POST /mcp` body. A request is answered
//! in the body of the same exchange; a notification gets `202 Accepted` with
//! an empty body. Undecodable bodies are rejected by the HTTP front with
//! `400` before they reach the dispatcher.
//!
//! The axum side ([`HttpFront`]) parks each request on a oneshot keyed by an
//! exchange id of its own; [`Transport::write`] completes it. Client ids are
//! only unique per client, so they are swapped out on the way in and restored
//! on the way out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch, Mutex};

use super::mcp_transport::{Transport, TransportError};
use crate::core::mcp::{Incoming, RequestId, RpcRequest, RpcResponse};

type Pending = Arc<StdMutex<HashMap<RequestId, oneshot::Sender<RpcResponse>>>>;

const DEFAULT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrontError {
    #[error("transport is closed")]
    Closed,
}

pub struct HttpTransport {
    inbound: Mutex<mpsc::Receiver<Incoming>>,
    pending: Pending,
    closed_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

/// Cloneable handle held by the axum router state.
#[derive(Clone)]
pub struct HttpFront {
    inbound: mpsc::Sender<Incoming>,
    pending: Pending,
    next_exchange: Arc<AtomicU64>,
    closed: watch::Receiver<bool>,
}

impl HttpTransport {
    pub fn new() -> (Self, HttpFront) {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(depth: usize) -> (Self, HttpFront) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let (closed_tx, closed_rx) = watch::channel(false);
        let pending: Pending = Arc::default();
        let transport = Self {
            inbound: Mutex::new(rx),
            pending: Arc::clone(&pending),
            closed_tx,
            closed: AtomicBool::new(false),
        };
        let front = HttpFront { inbound: tx, pending, next_exchange: Arc::default(), closed: closed_rx };
        (transport, front)
    }

    fn take_pending(&self, id: &RequestId) -> Option<oneshot::Sender<RpcResponse>> {
        self.pending.lock().ok()?.remove(id)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn read(&self) -> Result<Option<Incoming>, TransportError> {
        let mut closed = self.closed_tx.subscribe();
        if *closed.borrow() {
            return Ok(None);
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            msg = inbound.recv() => Ok(msg),
            _ = async { let _ = closed.wait_for(|c| *c).await; } => Ok(None),
        }
    }

    async fn write(&self, response: &RpcResponse) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let Some(id) = response.id.as_ref() else {
            tracing::warn!("dropping response without id; no HTTP exchange to answer");
            return Ok(());
        };
        match self.take_pending(id) {
            Some(slot) => {
                if slot.send(response.clone()).is_err() {
                    tracing::debug!(%id, "HTTP client went away before its response");
                }
            }
            None => tracing::warn!(%id, "no pending HTTP exchange for response"),
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closed_tx.send_replace(true);
        if let Ok(mut pending) = self.pending.lock() {
            // Dropping the senders fails every parked exchange with 503.
            pending.clear();
        }
        self.inbound.lock().await.close();
        Ok(())
    }
}

impl HttpFront {
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the transport has been closed.
    pub async fn closed(mut self) {
        let _ = self.closed.wait_for(|c| *c).await;
    }

    /// Park a fresh exchange and get its id plus the slot its response will
    /// arrive on.
    fn begin(&self) -> Result<(RequestId, oneshot::Receiver<RpcResponse>), FrontError> {
        if self.is_closed() {
            return Err(FrontError::Closed);
        }
        let n = self.next_exchange.fetch_add(1, Ordering::Relaxed);
        let id = RequestId::String(format!("http-{n}"));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().map_err(|_| FrontError::Closed)?.insert(id.clone(), tx);
        Ok((id, rx))
    }

    fn abandon(&self, id: &RequestId) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(id);
        }
    }

    /// Hand a request to the dispatcher and wait for its response, which
    /// carries the caller's own id.
    pub async fn call(&self, mut request: RpcRequest) -> Result<RpcResponse, FrontError> {
        let (exchange, slot) = self.begin()?;
        let client_id = std::mem::replace(&mut request.id, exchange.clone());
        tracing::trace!(%client_id, %exchange, "HTTP exchange");

        if let Err(e) = self.submit(Incoming::Request(request)).await {
            self.abandon(&exchange);
            return Err(e);
        }
        // A dropped slot means the transport closed before the dispatcher answered.
        let mut response = slot.await.map_err(|_| FrontError::Closed)?;
        response.id = Some(client_id);
        Ok(response)
    }

    pub async fn submit(&self, message: Incoming) -> Result<(), FrontError> {
        if self.is_closed() {
            return Err(FrontError::Closed);
        }
        self.inbound.send(message).await.map_err(|_| FrontError::Closed)
    }
}
