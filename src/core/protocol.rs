// src/core/protocol.rs

//! The worker wire protocol (§6): a little-endian 32-bit length prefix,
//! a length-prefixed `WorkerCommandH` header, and a command-specific JSON
//! body. Framing follows the same `tokio_util::codec::{Encoder, Decoder}`
//! shape the teacher uses for its own wire protocol; the format itself is
//! new (this is not a RESP-compatible wire).

use crate::core::errors::ControlPlaneError;
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::codec::{Decoder, Encoder};

/// Commands enumerated in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerCommand {
    SetChunkList,
    UpdateChunkList,
    GetChunkList,
    GetStatus,
    TestEcho,
    FindAllReplicas,
    DeleteReplica,
    ReplicateChunk,
    ServiceDrain,
    ServiceReconfig,
    StopRequest,
    Sql,
}

/// Response status, symmetric with the request side (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Success,
    Invalid,
    InUse,
    Error,
}

/// The fixed header preceding every command/response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCommandH {
    pub command: WorkerCommand,
    pub request_id: uuid::Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponseH {
    pub status: WorkerStatus,
    pub request_id: uuid::Uuid,
    pub error: String,
}

/// One framed message: header + an opaque, command-specific JSON body.
#[derive(Debug, Clone)]
pub struct WorkerFrame {
    pub header: WorkerCommandH,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct WorkerResponseFrame {
    pub header: WorkerResponseH,
    pub body: serde_json::Value,
}

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Encodes/decodes [`WorkerFrame`]s on the connection the controller holds
/// open to each worker. Mirrors the teacher's length-prefixed codec idiom
/// (`tokio_util::codec`), but the payload here is header-then-JSON rather
/// than a RESP value tree.
#[derive(Debug, Default)]
pub struct WorkerFrameCodec;

impl Encoder<WorkerFrame> for WorkerFrameCodec {
    type Error = ControlPlaneError;

    fn encode(&mut self, frame: WorkerFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header_bytes = serde_json::to_vec(&frame.header)?;
        let body_bytes = serde_json::to_vec(&frame.body)?;
        let total_len = 4 + header_bytes.len() + body_bytes.len();
        if total_len as u64 > MAX_FRAME_LEN as u64 {
            return Err(ControlPlaneError::internal("worker frame exceeds maximum length"));
        }
        dst.reserve(4 + total_len);
        dst.put_u32_le(total_len as u32);
        dst.put_u32_le(header_bytes.len() as u32);
        dst.put_slice(&header_bytes);
        dst.put_slice(&body_bytes);
        Ok(())
    }
}

impl Decoder for WorkerFrameCodec {
    type Item = WorkerFrame;
    type Error = ControlPlaneError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let total_len = u32::from_le_bytes(src[0..4].try_into().unwrap()) as usize;
        if total_len > MAX_FRAME_LEN as usize {
            return Err(ControlPlaneError::internal("worker frame exceeds maximum length"));
        }
        if src.len() < 4 + total_len {
            src.reserve(4 + total_len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let header_len = u32::from_le_bytes(src[0..4].try_into().unwrap()) as usize;
        src.advance(4);
        let header_bytes = src.split_to(header_len);
        let body_bytes = src.split_to(total_len - 4 - header_len);
        let header: WorkerCommandH = serde_json::from_slice(&header_bytes)?;
        let body: serde_json::Value = serde_json::from_slice(&body_bytes)?;
        Ok(Some(WorkerFrame { header, body }))
    }
}

/// The abstract *Request* interface the spec names in §1's out-of-scope
/// list: the core dispatches against this trait and never touches a raw
/// socket directly, so tests substitute a fake transport.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn send(
        &self,
        worker_svc_host: &str,
        worker_svc_port: u16,
        command: WorkerCommand,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<WorkerResponseFrame, ControlPlaneError>;
}

/// A real TCP transport, one short-lived connection per request (matches
/// the spec's stated "abstract Request interface"; connection pooling is
/// an implementation-defined optimization left for a later pass).
#[derive(Debug, Default)]
pub struct TcpWorkerTransport;

#[async_trait]
impl WorkerTransport for TcpWorkerTransport {
    async fn send(
        &self,
        worker_svc_host: &str,
        worker_svc_port: u16,
        command: WorkerCommand,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<WorkerResponseFrame, ControlPlaneError> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        let fut = async {
            let mut stream = TcpStream::connect((worker_svc_host, worker_svc_port))
                .await
                .map_err(ControlPlaneError::from)?;
            let mut codec = WorkerFrameCodec;
            let mut buf = BytesMut::new();
            let header = WorkerCommandH {
                command,
                request_id: uuid::Uuid::new_v4(),
            };
            codec.encode(WorkerFrame { header, body }, &mut buf)?;
            stream.write_all(&buf).await.map_err(ControlPlaneError::from)?;

            let mut read_buf = BytesMut::with_capacity(4096);
            loop {
                let n = stream
                    .read_buf(&mut read_buf)
                    .await
                    .map_err(ControlPlaneError::from)?;
                if n == 0 {
                    return Err(ControlPlaneError::internal("worker closed connection"));
                }
                if read_buf.len() < 4 {
                    continue;
                }
                let total_len = u32::from_le_bytes(read_buf[0..4].try_into().unwrap()) as usize;
                if read_buf.len() >= 4 + total_len {
                    break;
                }
            }
            let header_len = u32::from_le_bytes(read_buf[4..8].try_into().unwrap()) as usize;
            let header_bytes = &read_buf[8..8 + header_len];
            let body_start = 8 + header_len;
            let total_len = u32::from_le_bytes(read_buf[0..4].try_into().unwrap()) as usize;
            let body_bytes = &read_buf[body_start..4 + total_len];
            let header: WorkerResponseH = serde_json::from_slice(header_bytes)?;
            let body: serde_json::Value = serde_json::from_slice(body_bytes)?;
            Ok(WorkerResponseFrame { header, body })
        };

        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ControlPlaneError::Timeout(timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame_through_the_codec() {
        let mut codec = WorkerFrameCodec;
        let mut buf = BytesMut::new();
        let frame = WorkerFrame {
            header: WorkerCommandH {
                command: WorkerCommand::GetStatus,
                request_id: uuid::Uuid::new_v4(),
            },
            body: serde_json::json!({"hello": "world"}),
        };
        let request_id = frame.header.request_id;
        codec.encode(frame, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().expect("one complete frame");
        assert_eq!(decoded.header.request_id, request_id);
        assert_eq!(decoded.body["hello"], "world");
    }

    #[test]
    fn partial_frame_yields_none() {
        let mut codec = WorkerFrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_le(100);
        buf.put_u8(0);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
