//! UDS service layer

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::{
    reset_type, routine_sub_function, service_id, NegativeResponseCode, ServiceIds, UdsError,
    DOWNLOAD_FORMAT, POSITIVE_RESPONSE_OFFSET, READ_MEMORY_FORMAT,
};
use crate::connection::Connection;

const PENDING_WAIT_LIMIT: Duration = Duration::from_secs(30);
const PENDING_POLL: Duration = Duration::from_millis(100);

fn require_len(response: &[u8], min: usize, what: &str) -> Result<(), UdsError> {
    if response.len() < min {
        return Err(UdsError::InvalidResponse(format!(
            "{what}: {} bytes, need at least {min}",
            response.len()
        )));
    }
    Ok(())
}

/// UDS requests over a borrowed connection
#[derive(Clone, Copy)]
pub struct UdsService<'a> {
    conn: &'a dyn Connection,
    /// Service IDs to use (may include vendor overrides)
    svc: ServiceIds,
    pending_timeout: Duration,
}

impl<'a> UdsService<'a> {
    pub fn new(conn: &'a dyn Connection) -> Self {
        Self::with_service_ids(conn, ServiceIds::default())
    }

    pub fn with_service_ids(conn: &'a dyn Connection, service_ids: ServiceIds) -> Self {
        Self {
            conn,
            svc: service_ids,
            pending_timeout: PENDING_WAIT_LIMIT,
        }
    }

    /// Limit how long "response pending" answers are waited out
    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = timeout;
        self
    }

    pub fn service_ids(&self) -> &ServiceIds {
        &self.svc
    }

    /// One request/reply exchange. NRC 0x78 replies are polled until
    /// `pending_timeout`; any other negative reply becomes an error.
    async fn send_request(&self, request: &[u8]) -> Result<Vec<u8>, UdsError> {
        let sid = *request
            .first()
            .ok_or_else(|| UdsError::InvalidResponse("empty request".to_string()))?;
        let positive = sid.wrapping_add(POSITIVE_RESPONSE_OFFSET);
        let start = Instant::now();

        loop {
            let response = self.conn.send_frame(request).await?;

            match response.first().copied() {
                None => {
                    return Err(UdsError::InvalidResponse(format!(
                        "empty response to service 0x{sid:02X}"
                    )))
                }
                Some(service_id::NEGATIVE_RESPONSE) => {
                    require_len(&response, 3, "negative response")?;
                    if response[1] != sid {
                        return Err(UdsError::InvalidResponse(format!(
                            "negative response names service 0x{:02X}, sent 0x{sid:02X}",
                            response[1]
                        )));
                    }
                    let nrc = NegativeResponseCode::from(response[2]);

                    if nrc == NegativeResponseCode::ResponsePending {
                        if start.elapsed() > self.pending_timeout {
                            return Err(UdsError::Timeout);
                        }
                        debug!(service = sid, "Response pending");
                        tokio::time::sleep(PENDING_POLL).await;
                        continue;
                    }

                    return Err(UdsError::NegativeResponse {
                        service_id: sid,
                        nrc,
                    });
                }
                Some(first) if first == positive => return Ok(response),
                Some(actual) => {
                    return Err(UdsError::UnexpectedResponse {
                        service_id: sid,
                        expected: positive,
                        actual,
                    })
                }
            }
        }
    }

    /// Switch diagnostic session (0x10)
    pub async fn diagnostic_session_control(&self, session: u8) -> Result<Vec<u8>, UdsError> {
        let request = [self.svc.diagnostic_session_control, session];
        self.send_request(&request).await
    }

    /// Ask for the seed of `level` (0x27, odd sub-function)
    pub async fn security_access_request_seed(&self, level: u8) -> Result<Vec<u8>, UdsError> {
        let sub_function = level.wrapping_mul(2).wrapping_sub(1);
        let request = [self.svc.security_access, sub_function];
        let response = self.send_request(&request).await?;

        // 0x67 [sub_function] [seed...]
        require_len(&response, 2, "seed reply")?;

        Ok(response[2..].to_vec())
    }

    /// Answer the seed of `level` (0x27, even sub-function)
    pub async fn security_access_send_key(&self, level: u8, key: &[u8]) -> Result<(), UdsError> {
        let mut request = vec![self.svc.security_access, level.wrapping_mul(2)];
        request.extend_from_slice(key);

        self.send_request(&request).await?;
        Ok(())
    }

    /// Single-DID read (0x22)
    pub async fn read_data_by_id(&self, did: u16) -> Result<Vec<u8>, UdsError> {
        let [hi, lo] = did.to_be_bytes();
        let response = self
            .send_request(&[self.svc.read_data_by_id, hi, lo])
            .await?;

        // Response: 0x62 [didHi] [didLo] [data...]
        if response.len() < 3 || response[1..3] != [hi, lo] {
            return Err(UdsError::InvalidResponse(format!(
                "ReadDataByIdentifier response does not echo DID 0x{did:04X}"
            )));
        }
        Ok(response[3..].to_vec())
    }

    /// Read Memory By Address (0x23) with a 4-byte address and 2-byte size
    pub async fn read_memory_by_address(&self, address: u32, size: u16) -> Result<Vec<u8>, UdsError> {
        let mut request = vec![self.svc.read_memory_by_address, READ_MEMORY_FORMAT];
        request.extend_from_slice(&address.to_be_bytes());
        request.extend_from_slice(&size.to_be_bytes());

        let response = self.send_request(&request).await?;
        Ok(response[1..].to_vec())
    }

    /// Start routine `routine_id` (0x31 01); returns the status record
    pub async fn routine_control_start(
        &self,
        routine_id: u16,
        params: &[u8],
    ) -> Result<Vec<u8>, UdsError> {
        let mut request = vec![
            self.svc.routine_control,
            routine_sub_function::START_ROUTINE,
        ];
        request.extend_from_slice(&routine_id.to_be_bytes());
        request.extend_from_slice(params);

        let response = self.send_request(&request).await?;

        // 0x71 [sub-function] [id hi] [id lo] [status...]
        require_len(&response, 4, "routine reply")?;

        Ok(response[4..].to_vec())
    }

    /// Request Download (0x34). Returns the usable data length per TransferData.
    pub async fn request_download(&self, address: u32, size: u32) -> Result<u32, UdsError> {
        let mut request = vec![self.svc.request_download, 0x00, DOWNLOAD_FORMAT];
        request.extend_from_slice(&address.to_be_bytes());
        request.extend_from_slice(&size.to_be_bytes());

        let response = self.send_request(&request).await?;

        require_len(&response, 2, "download reply")?;
        let num_bytes = (response[1] >> 4) as usize;
        require_len(&response, 2 + num_bytes, "download block length")?;

        let max_block_length = response[2..2 + num_bytes]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));

        // maxNumberOfBlockLength includes the SID and sequence counter
        Ok(max_block_length.saturating_sub(2))
    }

    /// Transfer Data (0x36). The ECU must echo `block_counter`.
    pub async fn transfer_data(&self, block_counter: u8, data: &[u8]) -> Result<(), UdsError> {
        let mut request = Vec::with_capacity(data.len() + 2);
        request.push(self.svc.transfer_data);
        request.push(block_counter);
        request.extend_from_slice(data);

        let response = self.send_request(&request).await?;

        match response.get(1) {
            Some(&echo) if echo == block_counter => Ok(()),
            Some(&echo) => Err(UdsError::InvalidResponse(format!(
                "TransferData echoed block 0x{echo:02X}, sent 0x{block_counter:02X}"
            ))),
            None => Err(UdsError::InvalidResponse(
                "TransferData reply carries no block counter".to_string(),
            )),
        }
    }

    /// Close the download (0x37)
    pub async fn request_transfer_exit(&self) -> Result<Vec<u8>, UdsError> {
        let response = self.send_request(&[self.svc.request_transfer_exit]).await?;
        Ok(response[1..].to_vec())
    }

    /// ECU Reset (0x11). Returns the power-down time if the ECU reports one.
    pub async fn ecu_reset(&self, reset: u8) -> Result<Option<u8>, UdsError> {
        let response = self.send_request(&[self.svc.ecu_reset, reset]).await?;

        require_len(&response, 2, "reset reply")?;

        Ok(response.get(2).copied())
    }

    pub async fn hard_reset(&self) -> Result<Option<u8>, UdsError> {
        self.ecu_reset(reset_type::HARD_RESET).await
    }
}
