//! Supervisor → worker control protocol.
//!
//! Messages travel over the worker's stdin as length-prefixed rkyv frames.
//! The envelope carries a free-form command so that a worker built from an
//! older release still decodes commands it does not understand, and logs
//! them instead of failing.

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Wire command for [`ControlMessage::Shutdown`].
pub const SHUTDOWN_COMMAND: &str = "shutdown";

/// Control frames are tiny; anything larger is a corrupted stream.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Wire envelope for a control message
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub struct ControlEnvelope {
    pub command: String,
}

/// Message from the supervisor to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Stop all listeners and the dispatcher, then exit
    Shutdown,
    /// Anything else; logged by the worker and otherwise ignored
    Unknown(String),
}

impl ControlMessage {
    pub fn from_command(command: &str) -> Self {
        if command == SHUTDOWN_COMMAND {
            Self::Shutdown
        } else {
            Self::Unknown(command.to_string())
        }
    }

    pub fn command(&self) -> &str {
        match self {
            Self::Shutdown => SHUTDOWN_COMMAND,
            Self::Unknown(command) => command,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("control channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode control frame: {0}")]
    Encode(String),

    #[error("control frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
}

/// Message frame for the control channel
///
/// Format: [4-byte length (little-endian)][rkyv bytes]
pub struct MessageFrame;

impl MessageFrame {
    /// Encode a control message to bytes with length prefix
    pub fn encode(message: &ControlMessage) -> Result<Vec<u8>, ProtocolError> {
        let envelope = ControlEnvelope {
            command: message.command().to_string(),
        };
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&envelope)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(bytes.len()));
        }
        let len = bytes.len() as u32;
        let mut result = Vec::with_capacity(4 + bytes.len());
        result.extend_from_slice(&len.to_le_bytes());
        result.extend_from_slice(&bytes);
        Ok(result)
    }

    /// Decode a frame body. Bodies that fail validation become
    /// [`ControlMessage::Unknown`] rather than an error.
    pub fn decode(body: &[u8]) -> ControlMessage {
        // rkyv needs the archive aligned; the read buffer is not.
        let mut aligned = AlignedVec::<16>::with_capacity(body.len());
        aligned.extend_from_slice(body);

        match rkyv::access::<ArchivedControlEnvelope, rkyv::rancor::Error>(&aligned) {
            Ok(archived) => ControlMessage::from_command(archived.command.as_str()),
            Err(e) => ControlMessage::Unknown(format!("<undecodable frame: {}>", e)),
        }
    }

    /// Read length prefix from buffer
    pub fn read_length(buf: &[u8; 4]) -> usize {
        u32::from_le_bytes(*buf) as usize
    }

    pub async fn write<W>(writer: &mut W, message: &ControlMessage) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = Self::encode(message)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read the next message. `Ok(None)` means the channel closed cleanly
    /// between frames.
    pub async fn read<R>(reader: &mut R) -> Result<Option<ControlMessage>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = Self::read_length(&len_buf);
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(len));
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        Ok(Some(Self::decode(&body)))
    }
}
