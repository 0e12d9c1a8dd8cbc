use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::instructions::{DeviceError, Instruction};
use crate::registers::ProtocolVersion;
use crate::serial_driver::{FramedDriver, FramedSerialDriver, Status, TransportError};

#[derive(Error, Debug)]
pub enum CommError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

pub type CommResult<T = ()> = Result<T, CommError>;

/// Register access to actuators on one serial bus.
///
/// Every read and write is a single request/response round trip. A device
/// that answers with a non-zero error byte yields [`CommError::Device`].
#[async_trait]
pub trait MotorBus: Send {
    async fn open(&mut self) -> Result<(), TransportError>;
    async fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError>;
    async fn read_u8(&mut self, id: u8, addr: u16) -> CommResult<u8>;
    async fn read_u16(&mut self, id: u8, addr: u16) -> CommResult<u16>;
    async fn read_u32(&mut self, id: u8, addr: u16) -> CommResult<u32>;
    async fn write_u8(&mut self, id: u8, addr: u16, value: u8) -> CommResult<()>;
    async fn write_u16(&mut self, id: u8, addr: u16, value: u16) -> CommResult<()>;
    async fn write_u32(&mut self, id: u8, addr: u16, value: u32) -> CommResult<()>;
    async fn close(&mut self);
}

async fn transact<D: FramedDriver + ?Sized>(
    driver: &mut D,
    instruction: Instruction,
) -> CommResult<Status> {
    let id = instruction.id();
    driver.send(instruction).await?;
    let status = driver.receive().await?;
    if status.id() != id {
        return Err(TransportError::UnexpectedId {
            expected: id,
            actual: status.id(),
        }
        .into());
    }
    DeviceError::check_error(status.error())?;
    Ok(status)
}

async fn read_register<D: FramedDriver + ?Sized, const N: usize>(
    driver: &mut D,
    id: u8,
    addr: u16,
) -> CommResult<[u8; N]> {
    let status = transact(driver, Instruction::read(id, addr, N as u16)).await?;
    let data: [u8; N] =
        status
            .params()
            .try_into()
            .map_err(|_| TransportError::UnexpectedLength {
                expected: N,
                actual: status.params().len(),
            })?;
    Ok(data)
}

async fn write_register<D: FramedDriver + ?Sized>(
    driver: &mut D,
    instruction: Instruction,
) -> CommResult<()> {
    transact(driver, instruction).await?;
    Ok(())
}

/// [`MotorBus`] over a serial port speaking protocol 2.0.
pub struct SerialBus {
    port_name: String,
    driver: Option<FramedSerialDriver>,
}

impl SerialBus {
    /// Resolves the bus for `port_name` without opening the port.
    pub fn new(port_name: &str, protocol: ProtocolVersion) -> Result<SerialBus, TransportError> {
        if protocol != ProtocolVersion::V2 {
            return Err(TransportError::UnsupportedProtocol(protocol));
        }
        Ok(SerialBus {
            port_name: port_name.to_owned(),
            driver: None,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_open(&self) -> bool {
        self.driver.is_some()
    }

    fn driver(&mut self) -> Result<&mut FramedSerialDriver, TransportError> {
        self.driver.as_mut().ok_or(TransportError::PortNotOpen)
    }
}

#[async_trait]
impl MotorBus for SerialBus {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.driver = Some(FramedSerialDriver::new(&self.port_name)?);
        info!(port = %self.port_name, "opened serial port");
        Ok(())
    }

    async fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        self.driver()?.set_baud_rate(baud_rate)?;
        info!(port = %self.port_name, baud_rate, "changed baud rate");
        Ok(())
    }

    async fn read_u8(&mut self, id: u8, addr: u16) -> CommResult<u8> {
        let data = read_register::<_, 1>(self.driver()?, id, addr).await?;
        Ok(data[0])
    }

    async fn read_u16(&mut self, id: u8, addr: u16) -> CommResult<u16> {
        let data = read_register(self.driver()?, id, addr).await?;
        Ok(u16::from_le_bytes(data))
    }

    async fn read_u32(&mut self, id: u8, addr: u16) -> CommResult<u32> {
        let data = read_register(self.driver()?, id, addr).await?;
        Ok(u32::from_le_bytes(data))
    }

    async fn write_u8(&mut self, id: u8, addr: u16, value: u8) -> CommResult<()> {
        write_register(self.driver()?, Instruction::write_u8(id, addr, value)).await
    }

    async fn write_u16(&mut self, id: u8, addr: u16, value: u16) -> CommResult<()> {
        write_register(self.driver()?, Instruction::write_u16(id, addr, value)).await
    }

    async fn write_u32(&mut self, id: u8, addr: u16, value: u32) -> CommResult<()> {
        write_register(self.driver()?, Instruction::write_u32(id, addr, value)).await
    }

    async fn close(&mut self) {
        if self.driver.take().is_some() {
            info!(port = %self.port_name, "closed serial port");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::DeviceErrorKind;
    use std::collections::VecDeque;
    use std::sync::mpsc::{channel, Sender};

    struct MockFramedDriver {
        written_data: Sender<Vec<u8>>,
        mock_read_data: VecDeque<Status>,
    }

    impl MockFramedDriver {
        fn new(mock_read_data: Vec<Status>, written_data: Sender<Vec<u8>>) -> MockFramedDriver {
            MockFramedDriver {
                written_data,
                mock_read_data: mock_read_data.into(),
            }
        }
    }

    #[async_trait]
    impl FramedDriver for MockFramedDriver {
        async fn send(&mut self, instruction: Instruction) -> Result<(), TransportError> {
            self.written_data.send(instruction.serialize()).unwrap();
            Ok(())
        }

        async fn receive(&mut self) -> Result<Status, TransportError> {
            self.mock_read_data
                .pop_front()
                .ok_or(TransportError::Timeout)
        }
    }

    #[tokio::test]
    async fn read_u32_decodes_little_endian() {
        let (tx, rx) = channel();
        let mut driver =
            MockFramedDriver::new(vec![Status::new(1, 0, vec![0xA6, 0x00, 0x00, 0x00])], tx);
        let data = read_register::<_, 4>(&mut driver, 1, 132).await.unwrap();
        assert_eq!(u32::from_le_bytes(data), 166);
        assert_eq!(
            rx.try_recv().unwrap(),
            Instruction::read(1, 132, 4).serialize()
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn negative_position_round_trips_through_u32() {
        let (tx, _rx) = channel();
        let raw = (-4096_i32).to_le_bytes().to_vec();
        let mut driver = MockFramedDriver::new(vec![Status::new(1, 0, raw)], tx);
        let data = read_register::<_, 4>(&mut driver, 1, 132).await.unwrap();
        assert_eq!(u32::from_le_bytes(data) as i32, -4096);
    }

    #[tokio::test]
    async fn write_sends_instruction_and_waits_for_status() {
        let (tx, rx) = channel();
        let mut driver = MockFramedDriver::new(vec![Status::new(1, 0, vec![])], tx);
        write_register(&mut driver, Instruction::write_u8(1, 64, 1))
            .await
            .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            vec![0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x06, 0x00, 0x03, 0x40, 0x00, 0x01, 0xDB, 0x66]
        );
        assert!(driver.mock_read_data.is_empty());
    }

    #[tokio::test]
    async fn device_error_is_reported_as_device() {
        let (tx, _rx) = channel();
        let mut driver = MockFramedDriver::new(vec![Status::new(1, 0x04, vec![])], tx);
        let err = write_register(&mut driver, Instruction::write_u32(1, 116, 1 << 31))
            .await
            .unwrap_err();
        match err {
            CommError::Device(error) => assert_eq!(error.kind(), DeviceErrorKind::DataRange),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_status_is_transport_failure() {
        let (tx, _rx) = channel();
        let mut driver = MockFramedDriver::new(vec![], tx);
        let err = read_register::<_, 4>(&mut driver, 1, 132).await.unwrap_err();
        assert!(matches!(
            err,
            CommError::Transport(TransportError::Timeout)
        ));
    }

    #[tokio::test]
    async fn status_from_other_id_is_rejected() {
        let (tx, _rx) = channel();
        let mut driver = MockFramedDriver::new(vec![Status::new(2, 0, vec![0, 0, 0, 0])], tx);
        let err = read_register::<_, 4>(&mut driver, 1, 132).await.unwrap_err();
        assert!(matches!(
            err,
            CommError::Transport(TransportError::UnexpectedId {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn short_status_is_rejected() {
        let (tx, _rx) = channel();
        let mut driver = MockFramedDriver::new(vec![Status::new(1, 0, vec![0, 0])], tx);
        let err = read_register::<_, 4>(&mut driver, 1, 132).await.unwrap_err();
        assert!(matches!(
            err,
            CommError::Transport(TransportError::UnexpectedLength {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn serial_bus_rejects_protocol_one() {
        let err = SerialBus::new("/dev/ttyUSB0", ProtocolVersion::V1).err().unwrap();
        assert!(matches!(
            err,
            TransportError::UnsupportedProtocol(ProtocolVersion::V1)
        ));
    }

    #[tokio::test]
    async fn closed_serial_bus_reports_port_not_open() {
        let mut bus = SerialBus::new("/dev/ttyUSB0", ProtocolVersion::V2).unwrap();
        assert!(!bus.is_open());
        assert_eq!(bus.port_name(), "/dev/ttyUSB0");
        let err = bus.read_u32(1, 132).await.unwrap_err();
        assert!(matches!(
            err,
            CommError::Transport(TransportError::PortNotOpen)
        ));
        let err = bus.set_baud_rate(1_000_000).await.unwrap_err();
        assert!(matches!(err, TransportError::PortNotOpen));
        bus.close().await;
    }
}
