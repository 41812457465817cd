//! ISO 14230 framing over a raw byte link

use std::time::Duration;

use async_trait::async_trait;
use ecu_codec::frame::{self, Frame};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use super::flow_control::{FlowControlError, FlowControlManager, RetryDecision};
use crate::config::{FlowControlConfig, KLineConfig};
use crate::connection::{Connection, ConnectionError, IncomingFrame};

/// Payload of the ECU's clear-to-send frame
pub const CTS: u8 = 0x30;

/// Raw `bytes out -> bytes in` primitive provided by the serial driver
#[async_trait]
pub trait RawLink: Send + Sync {
    /// Write `bytes` and return everything the ECU sent back
    async fn exchange(&self, bytes: &[u8]) -> Result<Vec<u8>, ConnectionError>;

    async fn send_break(&self, _duration: Duration) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unsupported("break".to_string()))
    }

    async fn set_baud_rate(&self, _baud_rate: u32) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unsupported("baud rate switching".to_string()))
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

fn is_cts(reply: &[u8]) -> bool {
    let decoded = frame::decode(reply);
    decoded.is_valid && decoded.payload == [CTS]
}

enum Failure {
    NoCts,
    Corrupted,
}

enum Attempt {
    Complete(Vec<u8>),
    Failed(Failure),
}

/// [`Connection`] that splits requests into ISO 14230 frames and waits for the
/// ECU's CTS between them.
///
/// Each request gets its own [`FlowControlManager`]. CTS timeouts and response
/// frames with a bad checksum restart the request from its first frame until
/// the manager gives up. Errors from the raw link are returned unchanged.
pub struct KLineConnection<L> {
    link: L,
    flow: FlowControlConfig,
    response_timeout: Duration,
    baud_rate: parking_lot::RwLock<u32>,
    busy: Mutex<()>,
}

impl<L: RawLink> KLineConnection<L> {
    pub fn new(link: L, config: &KLineConfig, flow: FlowControlConfig) -> Self {
        Self {
            link,
            flow,
            response_timeout: Duration::from_millis(config.response_timeout_ms),
            baud_rate: parking_lot::RwLock::new(config.baud_rate),
            busy: Mutex::new(()),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn baud_rate(&self) -> u32 {
        *self.baud_rate.read()
    }

    async fn attempt(
        &self,
        fc: &mut FlowControlManager,
        frames: &[Frame],
    ) -> Result<Attempt, ConnectionError> {
        let last = frames.len().saturating_sub(1);
        for (index, frame) in frames.iter().enumerate() {
            let bytes = frame.to_bytes();
            let timeout = if index == last {
                self.response_timeout
            } else {
                fc.cts_timeout()
            };

            let reply = match fc.await_cts_within(timeout, self.link.exchange(&bytes)).await {
                Ok(reply) => reply?,
                Err(FlowControlError::CtsTimeout { timeout_ms }) => {
                    debug!(frame = index, timeout_ms, "No reply from ECU");
                    return Ok(Attempt::Failed(Failure::NoCts));
                }
                Err(e) => return Err(ConnectionError::SendFailed(e.to_string())),
            };

            if index < last {
                if !is_cts(&reply) {
                    debug!(frame = index, reply = %hex::encode(&reply), "Expected CTS");
                    return Ok(Attempt::Failed(Failure::NoCts));
                }
                continue;
            }

            let decoded = frame::parse_frames(&reply);
            if decoded.is_empty() || decoded.iter().any(|f| !f.is_valid) {
                debug!(reply = %hex::encode(&reply), "Response failed frame checksum");
                return Ok(Attempt::Failed(Failure::Corrupted));
            }
            return Ok(Attempt::Complete(
                decoded.into_iter().flat_map(|f| f.payload).collect(),
            ));
        }
        Err(ConnectionError::SendFailed("empty request".to_string()))
    }
}

#[async_trait]
impl<L: RawLink> Connection for KLineConnection<L> {
    async fn send_frame(&self, request: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        let frames = frame::encode_message(request)
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;

        let _guard = self.busy.lock().await;
        let mut fc = FlowControlManager::new(&self.flow);

        loop {
            let failure = match self.attempt(&mut fc, &frames).await? {
                Attempt::Complete(payload) => return Ok(payload),
                Attempt::Failed(failure) => failure,
            };

            if fc.handle_timeout() == RetryDecision::GiveUp {
                let attempts = fc.retry_count();
                warn!(attempts, request = %hex::encode(request), "K-line request failed");
                return Err(match failure {
                    Failure::NoCts => {
                        ConnectionError::Timeout(format!("no CTS after {attempts} attempts"))
                    }
                    Failure::Corrupted => ConnectionError::Corrupted(format!(
                        "bad frame checksum after {attempts} attempts"
                    )),
                });
            }
            fc.retry()
                .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;
        }
    }

    async fn start_stream(&self) -> Result<broadcast::Receiver<IncomingFrame>, ConnectionError> {
        Err(ConnectionError::Unsupported(
            "K-line is request/response only".to_string(),
        ))
    }

    async fn stop_stream(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.link.close().await
    }

    async fn send_break(&self, duration: Duration) -> Result<(), ConnectionError> {
        let _guard = self.busy.lock().await;
        self.link.send_break(duration).await
    }

    async fn set_baud_rate(&self, baud_rate: u32) -> Result<(), ConnectionError> {
        let _guard = self.busy.lock().await;
        self.link.set_baud_rate(baud_rate).await?;
        *self.baud_rate.write() = baud_rate;
        debug!(baud_rate, "K-line baud rate changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use pretty_assertions::assert_eq;

    enum Reply {
        Bytes(Vec<u8>),
        Silent,
        Fail(ConnectionError),
    }

    struct ScriptedLink {
        script: parking_lot::Mutex<Box<dyn FnMut(usize, &[u8]) -> Reply + Send>>,
        sent: parking_lot::Mutex<Vec<Vec<u8>>>,
        calls: AtomicUsize,
    }

    impl ScriptedLink {
        fn new(script: impl FnMut(usize, &[u8]) -> Reply + Send + 'static) -> Self {
            Self {
                script: parking_lot::Mutex::new(Box::new(script)),
                sent: parking_lot::Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RawLink for ScriptedLink {
        async fn exchange(&self, bytes: &[u8]) -> Result<Vec<u8>, ConnectionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().push(bytes.to_vec());
            let reply = {
                let mut script = self.script.lock();
                (*script)(call, bytes)
            };
            match reply {
                Reply::Bytes(b) => Ok(b),
                Reply::Fail(e) => Err(e),
                Reply::Silent => std::future::pending().await,
            }
        }
    }

    fn response_stream(payload: &[u8]) -> Vec<u8> {
        frame::encode_message(payload)
            .unwrap()
            .iter()
            .flat_map(|f| f.to_bytes())
            .collect()
    }

    fn cts() -> Vec<u8> {
        frame::encode(&[CTS]).unwrap()
    }

    fn connection(link: ScriptedLink) -> KLineConnection<ScriptedLink> {
        KLineConnection::new(link, &KLineConfig::default(), FlowControlConfig::default())
    }

    #[tokio::test]
    async fn test_single_frame_request_multi_frame_response() {
        let response = vec![0x61, 0x05, 1, 2, 3, 4, 5, 6, 7];
        let expected = response.clone();
        let conn = connection(ScriptedLink::new(move |_, _| {
            Reply::Bytes(response_stream(&response))
        }));

        assert_eq!(conn.send_frame(&[0x21, 0x05]).await.unwrap(), expected);
        assert_eq!(conn.link().sent.lock().clone(), vec![vec![0x02, 0x21, 0x05, 0x28]]);
    }

    #[tokio::test]
    async fn test_waits_for_cts_between_frames() {
        let request: Vec<u8> = (1..=10).collect();
        let conn = connection(ScriptedLink::new(|call, _| match call {
            0 => Reply::Bytes(cts()),
            _ => Reply::Bytes(response_stream(&[0x7E])),
        }));

        assert_eq!(conn.send_frame(&request).await.unwrap(), vec![0x7E]);
        let sent = conn.link().sent.lock().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0][0], 0x07);
        assert_eq!(sent[1][0], 0x03);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cts_timeout_restarts_request() {
        let request: Vec<u8> = (1..=10).collect();
        let conn = connection(ScriptedLink::new(|call, _| match call {
            0 => Reply::Silent,
            1 => Reply::Bytes(cts()),
            _ => Reply::Bytes(response_stream(&[0x7E])),
        }));

        assert_eq!(conn.send_frame(&request).await.unwrap(), vec![0x7E]);
        let sent = conn.link().sent.lock().clone();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], sent[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retry_budget() {
        let conn = connection(ScriptedLink::new(|_, _| Reply::Silent));
        let err = conn.send_frame(&[0x3E]).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout(_)));
        // first attempt plus three retries
        assert_eq!(conn.link().calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_bad_checksum_is_retried() {
        let conn = connection(ScriptedLink::new(|call, _| {
            let mut reply = response_stream(&[0x7E, 0x00]);
            if call == 0 {
                reply[3] ^= 0xFF;
            }
            Reply::Bytes(reply)
        }));
        assert_eq!(conn.send_frame(&[0x3E, 0x00]).await.unwrap(), vec![0x7E, 0x00]);
        assert_eq!(conn.link().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_corruption_is_reported() {
        let conn = connection(ScriptedLink::new(|_, _| Reply::Bytes(vec![0x01, 0x7E, 0x00])));
        assert!(matches!(
            conn.send_frame(&[0x3E]).await,
            Err(ConnectionError::Corrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_link_errors_are_not_retried() {
        let conn = connection(ScriptedLink::new(|_, _| Reply::Fail(ConnectionError::Closed)));
        assert_eq!(conn.send_frame(&[0x3E]).await, Err(ConnectionError::Closed));
        assert_eq!(conn.link().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_streaming_is_unsupported() {
        let conn = connection(ScriptedLink::new(|_, _| Reply::Silent));
        assert!(matches!(
            conn.start_stream().await,
            Err(ConnectionError::Unsupported(_))
        ));
        assert!(matches!(
            conn.set_baud_rate(62_500).await,
            Err(ConnectionError::Unsupported(_))
        ));
        assert_eq!(conn.baud_rate(), 10_400);
    }
}
