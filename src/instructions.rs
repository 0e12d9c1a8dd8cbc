use thiserror::Error;

pub(crate) const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

const READ: u8 = 0x02;
const WRITE: u8 = 0x03;
pub(crate) const STATUS: u8 = 0x55;

/// Fault reported by the actuator in the error byte of a status packet.
///
/// Bit 7 is the hardware alert flag, bits 0-6 carry the error number.
/// Any non-zero byte is an error; an alert without an error number is
/// reported as [`DeviceErrorKind::HardwareAlert`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct DeviceError {
    raw: u8,
    alert: bool,
    kind: DeviceErrorKind,
}

#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum DeviceErrorKind {
    #[error("failed to process the instruction packet")]
    ResultFail,
    #[error("undefined instruction or action without reg write")]
    Instruction,
    #[error("crc of the sent packet does not match")]
    Crc,
    #[error("data to write is out of range")]
    DataRange,
    #[error("data length is shorter than the register")]
    DataLength,
    #[error("data is out of the configured limits")]
    DataLimit,
    #[error("register is read only, write only or torque locked")]
    Access,
    #[error("hardware alert, check the hardware error status register")]
    HardwareAlert,
    #[error("unknown device error {0}")]
    Unknown(u8),
}

impl DeviceError {
    pub(crate) fn check_error(flag: u8) -> Result<(), DeviceError> {
        if flag == 0 {
            return Ok(());
        }
        let kind = match flag & 0x7F {
            0 => DeviceErrorKind::HardwareAlert,
            1 => DeviceErrorKind::ResultFail,
            2 => DeviceErrorKind::Instruction,
            3 => DeviceErrorKind::Crc,
            4 => DeviceErrorKind::DataRange,
            5 => DeviceErrorKind::DataLength,
            6 => DeviceErrorKind::DataLimit,
            7 => DeviceErrorKind::Access,
            other => DeviceErrorKind::Unknown(other),
        };
        Err(DeviceError {
            raw: flag,
            alert: flag & (1 << 7) != 0,
            kind,
        })
    }

    pub fn raw(&self) -> u8 {
        self.raw
    }

    pub fn alert(&self) -> bool {
        self.alert
    }

    pub fn kind(&self) -> DeviceErrorKind {
        self.kind
    }
}

impl std::error::Error for DeviceError {}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} (error byte {:#04x})", self.kind, self.raw)?;
        if self.alert && self.kind != DeviceErrorKind::HardwareAlert {
            write!(f, ", hardware alert")?;
        }
        Ok(())
    }
}

/// CRC-16 used by protocol 2.0 (polynomial 0x8005, initial value 0).
pub(crate) fn calc_crc(payload: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for b in payload {
        crc ^= (*b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x8005;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Inserts 0xFD after every `FF FF FD` run so the body never contains a header.
pub(crate) fn stuff(body: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(body.len() + 2);
    for b in body {
        data.push(*b);
        if data.len() >= 3 && data[data.len() - 3..] == [0xFF, 0xFF, 0xFD] {
            data.push(0xFD);
        }
    }
    data
}

pub(crate) fn unstuff(body: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(body.len());
    let mut iter = body.iter().peekable();
    while let Some(b) = iter.next() {
        data.push(*b);
        if data.len() >= 3 && data[data.len() - 3..] == [0xFF, 0xFF, 0xFD] {
            if iter.peek() == Some(&&0xFD) {
                iter.next();
            }
        }
    }
    data
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) struct Instruction {
    id: u8,
    instruction: u8,
    params: Vec<u8>,
}

impl Instruction {
    pub(crate) fn read(id: u8, addr: u16, length: u16) -> Instruction {
        let mut params = addr.to_le_bytes().to_vec();
        params.extend_from_slice(&length.to_le_bytes());
        Instruction {
            id,
            instruction: READ,
            params,
        }
    }

    pub(crate) fn write(id: u8, addr: u16, data: &[u8]) -> Instruction {
        let mut params = addr.to_le_bytes().to_vec();
        params.extend_from_slice(data);
        Instruction {
            id,
            instruction: WRITE,
            params,
        }
    }

    pub(crate) fn write_u8(id: u8, addr: u16, data: u8) -> Instruction {
        Instruction::write(id, addr, &[data])
    }

    pub(crate) fn write_u16(id: u8, addr: u16, data: u16) -> Instruction {
        Instruction::write(id, addr, &data.to_le_bytes())
    }

    pub(crate) fn write_u32(id: u8, addr: u16, data: u32) -> Instruction {
        Instruction::write(id, addr, &data.to_le_bytes())
    }

    pub(crate) fn id(&self) -> u8 {
        self.id
    }

    pub(crate) fn serialize(&self) -> Vec<u8> {
        let mut body = vec![self.instruction];
        body.extend(self.params.iter());
        let body = stuff(&body);
        // instruction + params + crc
        let len = (body.len() + 2) as u16;
        let mut data = HEADER.to_vec();
        data.push(self.id);
        data.extend_from_slice(&len.to_le_bytes());
        data.extend(body);
        let crc = calc_crc(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_instruction_serialization() {
        // present position of XM430, 4 bytes
        let payload = Instruction::read(1, 132, 4).serialize();
        let expected = vec![
            0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x07, 0x00, 0x02, 0x84, 0x00, 0x04, 0x00, 0x1D, 0x15,
        ];
        assert_eq!(payload, expected);
    }

    #[test]
    fn write_instruction_serialization_u32() {
        let payload = Instruction::write_u32(1, 116, 512).serialize();
        let expected = vec![
            0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x09, 0x00, 0x03, 0x74, 0x00, 0x00, 0x02, 0x00, 0x00,
            0xCA, 0x89,
        ];
        assert_eq!(payload, expected);
    }

    #[test]
    fn write_instruction_serialization_u8() {
        let payload = Instruction::write_u8(1, 64, 1).serialize();
        let expected = vec![
            0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x06, 0x00, 0x03, 0x40, 0x00, 0x01, 0xDB, 0x66,
        ];
        assert_eq!(payload, expected);
    }

    #[test]
    fn write_instruction_serialization_u16_negative() {
        let payload = Instruction::write_u16(1, 102, (-1000_i16) as u16).serialize();
        assert_eq!(&payload[7..12], &[0x03, 0x66, 0x00, 0x18, 0xFC]);
        assert_eq!(payload[5], 0x07);
    }

    #[test]
    fn crc_matches_status_packet() {
        let status = [0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x08, 0x00, 0x55, 0x00, 0xA6, 0x00, 0x00, 0x00];
        assert_eq!(calc_crc(&status), 0xC08C);
    }

    #[test]
    fn stuffing_inserts_and_removes_marker() {
        let body = vec![0x03, 0x74, 0x00, 0xFF, 0xFF, 0xFD, 0x00];
        let stuffed = stuff(&body);
        assert_eq!(stuffed, vec![0x03, 0x74, 0x00, 0xFF, 0xFF, 0xFD, 0xFD, 0x00]);
        assert_eq!(unstuff(&stuffed), body);
    }

    #[test]
    fn stuffed_write_length_counts_extra_byte() {
        let payload = Instruction::write_u32(1, 116, 0x00FD_FFFF).serialize();
        // 1 instruction + 2 addr + 4 data + 1 stuffing + 2 crc
        assert_eq!(payload[5], 10);
        assert_eq!(&payload[10..14], &[0xFF, 0xFF, 0xFD, 0xFD]);
    }

    #[test]
    fn no_error_byte_is_ok() {
        assert!(DeviceError::check_error(0).is_ok());
    }

    #[test]
    fn alert_only_is_hardware_alert() {
        let err = DeviceError::check_error(0b1000_0000).unwrap_err();
        assert_eq!(err.kind(), DeviceErrorKind::HardwareAlert);
        assert!(err.alert());
    }

    #[test]
    fn data_range_error() {
        let err = DeviceError::check_error(4).unwrap_err();
        assert_eq!(err.kind(), DeviceErrorKind::DataRange);
        assert!(!err.alert());
    }

    #[test]
    fn access_error_with_alert() {
        let err = DeviceError::check_error(0b1000_0111).unwrap_err();
        assert_eq!(err.kind(), DeviceErrorKind::Access);
        assert!(err.alert());
        assert_eq!(err.raw(), 0x87);
        assert!(format!("{}", err).contains("hardware alert"));
    }

    #[test]
    fn unknown_error_number() {
        let err = DeviceError::check_error(0x12).unwrap_err();
        assert_eq!(err.kind(), DeviceErrorKind::Unknown(0x12));
    }
}
