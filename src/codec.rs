//! Wire Protocol Codec
//!
//! Binary framing for the transaction protocol:
//! - fixed 8-byte header, multi-byte fields big-endian
//! - XOR-of-body checksum (catches accidental corruption, nothing more)
//! - 1 MiB body cap against memory exhaustion
//!
//! # Header Layout (8 bytes)
//!
//! ```text
//! ┌───────────┬───────────┬────────────────────────────────────┐
//! │ magic     │ 1 byte    │ Always 0x90                        │
//! │ opcode    │ 1 byte    │ LOGIN / BALANCE / TRANSFER         │
//! │ checksum  │ 2 bytes   │ XOR of body bytes (big-endian)     │
//! │ body_len  │ 4 bytes   │ Body size (big-endian, ≤ 1 MiB)    │
//! └───────────┴───────────┴────────────────────────────────────┘
//! ```
//!
//! The checksum covers body bytes only; header fields are not included.
//!
//! Frame-level rejections (bad magic, oversized body, checksum mismatch,
//! short read) mean the peer cannot be trusted to have sent a well-formed
//! request; the caller closes the connection without a response. A frame
//! that passes those checks but carries an unknown opcode, or the wrong
//! body size for its opcode, is answered with the internal-error status.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ============================================================
// CONSTANTS
// ============================================================

/// First byte of every frame
pub const FRAME_MAGIC: u8 = 0x90;

/// Fixed header size in bytes
pub const FRAME_HEADER_SIZE: usize = 8;

/// Bodies above this are rejected before allocation
pub const MAX_BODY_LEN: usize = 1024 * 1024;

/// Responses always carry one big-endian i32
pub const RESPONSE_BODY_SIZE: usize = 4;

// ============================================================
// ERRORS
// ============================================================

/// Frame could not be trusted; the connection must be closed silently
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Bad magic byte: 0x{0:02x}")]
    BadMagic(u8),

    #[error("Body length {0} exceeds the 1 MiB cap")]
    Oversized(u32),

    #[error("Checksum mismatch: header 0x{expected:04x}, body 0x{actual:04x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Frame was intact but the request inside it is unusable; answered with
/// the internal-error status rather than a dropped connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("Opcode 0x{opcode:02x} body must be {expected} bytes, got {actual}")]
    BadBodyLen {
        opcode: u8,
        expected: usize,
        actual: usize,
    },
}

impl RequestError {
    /// All request-level failures surface as the internal status code
    pub fn wire_code(&self) -> i32 {
        -1
    }
}

// ============================================================
// OPERATION CODES
// ============================================================

/// Request operation codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Login = 0x10,
    Balance = 0x20,
    Transfer = 0x30,
}

impl TryFrom<u8> for OpCode {
    type Error = RequestError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Self::Login),
            0x20 => Ok(Self::Balance),
            0x30 => Ok(Self::Transfer),
            _ => Err(RequestError::UnknownOpcode(value)),
        }
    }
}

// ============================================================
// CHECKSUM
// ============================================================

/// XOR of all body bytes.
///
/// Order-independent by construction: any permutation of the same bytes
/// produces the same sum.
#[inline]
pub fn xor_checksum(body: &[u8]) -> u16 {
    let mut sum: u16 = 0;
    for &byte in body {
        sum ^= u16::from(byte);
    }
    sum
}

// ============================================================
// FRAME HEADER (8 bytes)
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u8,
    pub opcode: u8,
    pub checksum: u16,
    pub body_len: u32,
}

impl FrameHeader {
    /// Build a header for `body`, computing its checksum
    pub fn new(opcode: u8, body: &[u8]) -> Self {
        Self {
            magic: FRAME_MAGIC,
            opcode,
            checksum: xor_checksum(body),
            body_len: body.len() as u32,
        }
    }

    /// Serialize header to bytes (8 bytes)
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0] = self.magic;
        buf[1] = self.opcode;
        buf[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        buf[4..8].copy_from_slice(&self.body_len.to_be_bytes());
        buf
    }

    /// Deserialize header from bytes
    pub fn from_bytes(buf: &[u8; FRAME_HEADER_SIZE]) -> Self {
        Self {
            magic: buf[0],
            opcode: buf[1],
            checksum: u16::from_be_bytes([buf[2], buf[3]]),
            body_len: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// One validated frame: header plus exactly `body_len` body bytes
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Vec<u8>,
}

// ============================================================
// READ / WRITE
// ============================================================

/// Read and validate one frame from the stream.
///
/// # Errors
/// Any error here means the connection is unusable: bad magic, body over
/// the cap, checksum mismatch, or a short read.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;
    let header = FrameHeader::from_bytes(&header_buf);

    if header.magic != FRAME_MAGIC {
        return Err(FrameError::BadMagic(header.magic));
    }
    // Cap check before the body allocation, not after
    if header.body_len as usize > MAX_BODY_LEN {
        return Err(FrameError::Oversized(header.body_len));
    }

    let mut body = vec![0u8; header.body_len as usize];
    reader.read_exact(&mut body).await?;

    let actual = xor_checksum(&body);
    if header.checksum != actual {
        return Err(FrameError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    Ok(Frame { header, body })
}

/// Write a response frame: the echoed request opcode plus one i32 status.
pub async fn write_response<W>(writer: &mut W, opcode: u8, status: i32) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = status.to_be_bytes();
    let header = FrameHeader::new(opcode, &body);

    let mut out = [0u8; FRAME_HEADER_SIZE + RESPONSE_BODY_SIZE];
    out[..FRAME_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    out[FRAME_HEADER_SIZE..].copy_from_slice(&body);
    writer.write_all(&out).await?;
    writer.flush().await
}

/// Read a response frame and return `(opcode, status)`.
pub async fn read_response<R>(reader: &mut R) -> Result<(u8, i32), FrameError>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(reader).await?;
    if frame.body.len() != RESPONSE_BODY_SIZE {
        return Err(FrameError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "response body must be {} bytes, got {}",
                RESPONSE_BODY_SIZE,
                frame.body.len()
            ),
        )));
    }
    let status = i32::from_be_bytes([frame.body[0], frame.body[1], frame.body[2], frame.body[3]]);
    Ok((frame.header.opcode, status))
}

// ============================================================
// REQUESTS
// ============================================================

/// Decoded client request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Login { account_id: i32 },
    Balance { account_id: i32 },
    Transfer { src_id: i32, dst_id: i32, amount: i32 },
}

impl Request {
    /// Interpret a validated frame's opcode and body.
    pub fn decode(frame: &Frame) -> Result<Self, RequestError> {
        let opcode = OpCode::try_from(frame.header.opcode)?;
        let body = &frame.body;
        match opcode {
            OpCode::Login => {
                expect_body_len(opcode, body, 4)?;
                Ok(Request::Login {
                    account_id: read_i32_be(body, 0),
                })
            }
            OpCode::Balance => {
                expect_body_len(opcode, body, 4)?;
                Ok(Request::Balance {
                    account_id: read_i32_be(body, 0),
                })
            }
            OpCode::Transfer => {
                expect_body_len(opcode, body, 12)?;
                Ok(Request::Transfer {
                    src_id: read_i32_be(body, 0),
                    dst_id: read_i32_be(body, 4),
                    amount: read_i32_be(body, 8),
                })
            }
        }
    }

    pub fn opcode(&self) -> OpCode {
        match self {
            Request::Login { .. } => OpCode::Login,
            Request::Balance { .. } => OpCode::Balance,
            Request::Transfer { .. } => OpCode::Transfer,
        }
    }

    /// Request body in wire byte order
    pub fn body_bytes(&self) -> Vec<u8> {
        match *self {
            Request::Login { account_id } | Request::Balance { account_id } => {
                account_id.to_be_bytes().to_vec()
            }
            Request::Transfer {
                src_id,
                dst_id,
                amount,
            } => {
                let mut body = Vec::with_capacity(12);
                body.extend_from_slice(&src_id.to_be_bytes());
                body.extend_from_slice(&dst_id.to_be_bytes());
                body.extend_from_slice(&amount.to_be_bytes());
                body
            }
        }
    }

    /// Full frame bytes for this request (header + body)
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body_bytes();
        let header = FrameHeader::new(self.opcode() as u8, &body);
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&body);
        out
    }
}

fn expect_body_len(opcode: OpCode, body: &[u8], expected: usize) -> Result<(), RequestError> {
    if body.len() != expected {
        return Err(RequestError::BadBodyLen {
            opcode: opcode as u8,
            expected,
            actual: body.len(),
        });
    }
    Ok(())
}

fn read_i32_be(body: &[u8], offset: usize) -> i32 {
    i32::from_be_bytes([
        body[offset],
        body[offset + 1],
        body[offset + 2],
        body[offset + 3],
    ])
}

// ============================================================
// TESTS
// ============================================================
