use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Duration};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::instructions::{calc_crc, unstuff, Instruction, HEADER, STATUS};
use crate::registers::ProtocolVersion;

/// Communication failure below the device: the request never produced a
/// valid status packet.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    #[error("port is not open")]
    PortNotOpen,
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection timeout")]
    Timeout,
    #[error("serial stream closed")]
    Disconnected,
    #[error("checksum error on arriving packet")]
    Checksum,
    #[error("arriving packet is not a status packet")]
    Header,
    #[error("status from id {actual} while waiting for id {expected}")]
    UnexpectedId { expected: u8, actual: u8 },
    #[error("expected {expected} data bytes but status carried {actual}")]
    UnexpectedLength { expected: usize, actual: usize },
    #[error("{0} is not supported by the serial bus")]
    UnsupportedProtocol(ProtocolVersion),
}

#[derive(PartialEq, Debug)]
pub(crate) struct Status {
    id: u8,
    error: u8,
    params: Vec<u8>,
}

impl Status {
    pub(crate) fn new(id: u8, error: u8, params: Vec<u8>) -> Status {
        Status { id, error, params }
    }

    pub(crate) fn id(&self) -> u8 {
        self.id
    }

    pub(crate) fn error(&self) -> u8 {
        self.error
    }

    pub(crate) fn params(&self) -> &[u8] {
        &self.params
    }
}

/// A corrupt packet is yielded as an `Err` item rather than a decoder error,
/// which would end the framed stream.
pub(crate) struct DynamixelProtocol;

impl Decoder for DynamixelProtocol {
    type Item = Result<Status, TransportError>;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, TransportError> {
        // drop line noise in front of the header
        match src.windows(HEADER.len()).position(|window| window == HEADER) {
            Some(start) => src.advance(start),
            None => {
                let keep = src.len().min(HEADER.len() - 1);
                src.advance(src.len() - keep);
                return Ok(None);
            }
        }
        if src.len() < 7 {
            return Ok(None);
        }
        let id = src[4];
        let len = u16::from_le_bytes([src[5], src[6]]) as usize;
        if src.len() < 7 + len {
            return Ok(None);
        }
        let message = src.split_to(7 + len);
        // instruction, error and crc at least
        if len < 4 {
            return Ok(Some(Err(TransportError::Header)));
        }
        let crc_start = message.len() - 2;
        let checksum = calc_crc(&message[..crc_start]);
        if checksum != u16::from_le_bytes([message[crc_start], message[crc_start + 1]]) {
            return Ok(Some(Err(TransportError::Checksum)));
        }
        let body = unstuff(&message[7..crc_start]);
        if body[0] != STATUS {
            return Ok(Some(Err(TransportError::Header)));
        }

        Ok(Some(Ok(Status::new(id, body[1], body[2..].to_vec()))))
    }
}

impl Encoder<Instruction> for DynamixelProtocol {
    type Error = TransportError;

    fn encode(&mut self, data: Instruction, buf: &mut BytesMut) -> Result<(), TransportError> {
        let msg = data.serialize();
        buf.reserve(msg.len());
        buf.put(msg.as_ref());
        Ok(())
    }
}

#[async_trait]
pub(crate) trait FramedDriver: Send {
    async fn send(&mut self, instruction: Instruction) -> Result<(), TransportError>;
    async fn receive(&mut self) -> Result<Status, TransportError>;
}

pub(crate) const TIMEOUT: u64 = 100;

async fn receive_status<T>(
    framed_port: &mut Framed<T, DynamixelProtocol>,
) -> Result<Status, TransportError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    timeout(Duration::from_millis(TIMEOUT), framed_port.next())
        .await
        .map_err(|_| TransportError::Timeout)?
        .ok_or(TransportError::Disconnected)??
}
/// Factory default baud rate of XM-series actuators.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

pub struct FramedSerialDriver {
    framed_port: Framed<SerialStream, DynamixelProtocol>,
}

impl FramedSerialDriver {
    pub fn new(port: &str) -> Result<FramedSerialDriver, TransportError> {
        FramedSerialDriver::with_baud_rate(port, DEFAULT_BAUD_RATE)
    }

    pub fn with_baud_rate(port: &str, baud_rate: u32) -> Result<FramedSerialDriver, TransportError> {
        let serial_port = tokio_serial::new(port, baud_rate)
            .timeout(std::time::Duration::from_millis(TIMEOUT))
            .open_native_async()?;
        Ok(FramedSerialDriver {
            framed_port: Framed::new(serial_port, DynamixelProtocol),
        })
    }

    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        self.framed_port.get_mut().set_baud_rate(baud_rate)?;
        Ok(())
    }
}

#[async_trait]
impl FramedDriver for FramedSerialDriver {
    async fn send(&mut self, instruction: Instruction) -> Result<(), TransportError> {
        // a late reply to an earlier request must not answer this one
        self.framed_port.read_buffer_mut().clear();
        self.framed_port.send(instruction).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Status, TransportError> {
        receive_status(&mut self.framed_port).await
    }
}
