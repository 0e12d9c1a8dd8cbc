use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => write!(f, "protocol 1.0"),
            ProtocolVersion::V2 => write!(f, "protocol 2.0"),
        }
    }
}

/// Control table addresses the controller needs for one actuator model.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct RegisterMap {
    pub protocol: ProtocolVersion,
    // EEPROM area
    pub operating_mode: u16,
    // RAM area
    pub torque_enable: u16,
    pub goal_current: u16,
    pub goal_position: u16,
    pub present_position: u16,
}

const XM_SERIES: RegisterMap = RegisterMap {
    protocol: ProtocolVersion::V2,
    operating_mode: 11,
    torque_enable: 64,
    goal_current: 102,
    goal_position: 116,
    present_position: 132,
};

/// Supported models, keyed by the number in the model name (XM430 -> 430).
const MODEL_TABLE: &[(u16, RegisterMap)] = &[(430, XM_SERIES), (540, XM_SERIES)];

impl RegisterMap {
    pub fn for_model(model: u16) -> Option<RegisterMap> {
        MODEL_TABLE
            .iter()
            .find(|(id, _)| *id == model)
            .map(|(_, registers)| *registers)
    }
}

pub fn supported_models() -> impl Iterator<Item = u16> {
    MODEL_TABLE.iter().map(|(model, _)| *model)
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OperatingMode {
    Current,
    Position,
    ExtendedPosition,
}

impl OperatingMode {
    pub fn code(self) -> u8 {
        match self {
            OperatingMode::Current => 0,
            OperatingMode::Position => 3,
            OperatingMode::ExtendedPosition => 4,
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OperatingMode::Current => write!(f, "current control"),
            OperatingMode::Position => write!(f, "position control"),
            OperatingMode::ExtendedPosition => write!(f, "extended position control"),
        }
    }
}
