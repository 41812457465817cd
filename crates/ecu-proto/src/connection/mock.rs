//! Mock connection for testing

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use super::{Connection, ConnectionError, IncomingFrame};

/// Computes the ECU's reply to one request
pub type MockHandler = Box<dyn FnMut(&[u8]) -> Result<Vec<u8>, ConnectionError> + Send>;

/// Scriptable in-memory ECU
pub struct MockConnection {
    handler: Mutex<MockHandler>,
    requests: RwLock<Vec<Vec<u8>>>,
    open: AtomicBool,
    streaming: AtomicBool,
    incoming_tx: broadcast::Sender<IncomingFrame>,
    baud_rates: RwLock<Vec<u32>>,
    breaks: AtomicUsize,
    latency: Duration,
}

impl MockConnection {
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(&[u8]) -> Result<Vec<u8>, ConnectionError> + Send + 'static,
    {
        let (incoming_tx, _) = broadcast::channel(256);
        Self {
            handler: Mutex::new(Box::new(handler)),
            requests: RwLock::new(Vec::new()),
            open: AtomicBool::new(true),
            streaming: AtomicBool::new(false),
            incoming_tx,
            baud_rates: RwLock::new(Vec::new()),
            breaks: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Answer from a fixed request -> response table.
    ///
    /// Exact matches win over prefix matches; anything else gets no response.
    pub fn with_responses(responses: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self::new(move |request| {
            responses
                .iter()
                .find(|(req, _)| req.as_slice() == request)
                .or_else(|| responses.iter().find(|(req, _)| request.starts_with(req)))
                .map(|(_, resp)| resp.clone())
                .ok_or_else(|| {
                    ConnectionError::NoResponse(format!(
                        "no mock response for {}",
                        hex::encode(request)
                    ))
                })
        })
    }

    /// Delay every response by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.read().clone()
    }

    /// Number of requests starting with `prefix`
    pub fn count_requests(&self, prefix: &[u8]) -> usize {
        self.requests
            .read()
            .iter()
            .filter(|req| req.starts_with(prefix))
            .count()
    }

    /// Simulate the ECU sending unsolicited data
    pub fn inject_incoming(&self, data: Vec<u8>) {
        if self.streaming.load(Ordering::SeqCst) {
            let _ = self.incoming_tx.send(IncomingFrame {
                timestamp: Instant::now(),
                data,
            });
        }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn baud_rates(&self) -> Vec<u32> {
        self.baud_rates.read().clone()
    }

    pub fn breaks_sent(&self) -> usize {
        self.breaks.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectionError::Closed)
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn send_frame(&self, request: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        self.ensure_open()?;
        self.requests.write().push(request.to_vec());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let response = {
            let mut handler = self.handler.lock();
            (*handler)(request)
        };
        debug!(request = %hex::encode(request), ok = response.is_ok(), "Mock connection: exchange");
        response
    }

    async fn start_stream(&self) -> Result<broadcast::Receiver<IncomingFrame>, ConnectionError> {
        self.ensure_open()?;
        if self.streaming.swap(true, Ordering::SeqCst) {
            return Err(ConnectionError::StreamActive);
        }
        Ok(self.incoming_tx.subscribe())
    }

    async fn stop_stream(&self) -> Result<(), ConnectionError> {
        self.streaming.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.streaming.store(false, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_break(&self, _duration: Duration) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.breaks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_baud_rate(&self, baud_rate: u32) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.baud_rates.write().push(baud_rate);
        Ok(())
    }
}
