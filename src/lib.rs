//! Control wrapper for a single Dynamixel XM-series actuator.
//!
//! [`ActuatorController`] sequences operating mode changes, torque
//! enable/disable and goal writes over any [`MotorBus`], and waits for goal
//! positions to settle. [`SerialBus`] is the protocol 2.0 serial
//! implementation of the bus.
//!
//! ```no_run
//! # async fn run() -> Result<(), dynamixel_actuator::ControllerError> {
//! use dynamixel_actuator::{ActuatorController, ProtocolVersion};
//!
//! let mut controller =
//!     ActuatorController::new(430, 1, 1_000_000, "/dev/ttyUSB0", ProtocolVersion::V2)?;
//! controller.initialize().await?;
//! controller.set_mode_extended_position().await?;
//! controller.enable_torque().await?;
//! controller.set_goal_position(2048).await?;
//! controller.reset_position().await?;
//! controller.close().await;
//! # Ok(())
//! # }
//! ```

mod bus;
mod instructions;
mod registers;
mod serial_driver;

pub use bus::{CommError, CommResult, MotorBus, SerialBus};
pub use instructions::{DeviceError, DeviceErrorKind};
pub use registers::{supported_models, OperatingMode, ProtocolVersion, RegisterMap};
pub use serial_driver::{TransportError, DEFAULT_BAUD_RATE};

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Position reported before the first successful read at startup.
pub const DEFAULT_START_POSITION: i32 = 0;
/// Distance from the goal, in position units, at which a move counts as done.
pub const MOVING_STATUS_THRESHOLD: u32 = 20;

const TORQUE_ENABLE: u8 = 1;
const TORQUE_DISABLE: u8 = 0;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ControllerError {
    #[error("unsupported actuator model {0}, supported models are XM430 (430) and XM540 (540)")]
    UnsupportedModel(u16),
    #[error("model {model} uses {expected}, not {requested}")]
    ProtocolMismatch {
        model: u16,
        expected: ProtocolVersion,
        requested: ProtocolVersion,
    },
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error("actuator did not reach {goal} within {polls} polls, last position {present:?}")]
    NotSettled {
        goal: i32,
        present: Option<i32>,
        polls: u32,
    },
}

/// How goal position writes wait for the actuator to arrive.
///
/// The default polls back to back with no limit, so a goal the actuator
/// never reaches blocks forever. Set `max_polls` to bound the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleConfig {
    pub threshold: u32,
    pub max_polls: Option<u32>,
    pub poll_interval: Option<Duration>,
}

impl Default for SettleConfig {
    fn default() -> Self {
        SettleConfig {
            threshold: MOVING_STATUS_THRESHOLD,
            max_polls: None,
            poll_interval: None,
        }
    }
}

impl SettleConfig {
    pub fn is_settled(&self, goal: i32, present: i32) -> bool {
        (goal as i64 - present as i64).unsigned_abs() <= self.threshold as u64
    }
}

fn resolve_registers(model: u16, protocol: ProtocolVersion) -> Result<RegisterMap, ControllerError> {
    let registers = RegisterMap::for_model(model).ok_or(ControllerError::UnsupportedModel(model))?;
    if registers.protocol != protocol {
        return Err(ControllerError::ProtocolMismatch {
            model,
            expected: registers.protocol,
            requested: protocol,
        });
    }
    Ok(registers)
}

pub struct ActuatorController<B = SerialBus> {
    bus: B,
    registers: RegisterMap,
    id: u8,
    baud_rate: u32,
    start_position: i32,
    settle: SettleConfig,
}

impl ActuatorController<SerialBus> {
    /// Resolves the register table for `model` and the serial bus for
    /// `port_name`. The port is opened by [`ActuatorController::initialize`].
    pub fn new(
        model: u16,
        id: u8,
        baud_rate: u32,
        port_name: &str,
        protocol: ProtocolVersion,
    ) -> Result<ActuatorController<SerialBus>, ControllerError> {
        let bus = SerialBus::new(port_name, protocol).map_err(CommError::from)?;
        ActuatorController::with_bus(model, id, baud_rate, protocol, bus)
    }
}

impl<B: MotorBus> ActuatorController<B> {
    pub fn with_bus(
        model: u16,
        id: u8,
        baud_rate: u32,
        protocol: ProtocolVersion,
        bus: B,
    ) -> Result<ActuatorController<B>, ControllerError> {
        let registers = resolve_registers(model, protocol).map_err(|err| {
            error!("construction failed: {}", err);
            err
        })?;
        Ok(ActuatorController {
            bus,
            registers,
            id,
            baud_rate,
            start_position: DEFAULT_START_POSITION,
            settle: SettleConfig::default(),
        })
    }

    pub fn with_settle_config(mut self, settle: SettleConfig) -> Self {
        self.settle = settle;
        self
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn registers(&self) -> &RegisterMap {
        &self.registers
    }

    pub fn settle_config(&self) -> &SettleConfig {
        &self.settle
    }

    /// Position recorded by the last [`ActuatorController::initialize`].
    pub fn start_position(&self) -> i32 {
        self.start_position
    }

    fn report<T>(&self, action: &str, result: CommResult<T>) -> CommResult<T> {
        match &result {
            Err(CommError::Transport(err)) => error!(id = self.id, "{} failed: {}", action, err),
            Err(CommError::Device(err)) => warn!(id = self.id, "{} rejected: {}", action, err),
            Ok(_) => {}
        }
        result
    }

    /// Opens the bus and records the present position as start position.
    ///
    /// Failing to read the position is not fatal: the start position keeps
    /// its previous value.
    pub async fn initialize(&mut self) -> Result<(), ControllerError> {
        if let Err(err) = self.bus.open().await {
            error!("failed to open the port: {}", err);
            return Err(CommError::from(err).into());
        }
        if let Err(err) = self.bus.set_baud_rate(self.baud_rate).await {
            error!("failed to change the baud rate to {}: {}", self.baud_rate, err);
            return Err(CommError::from(err).into());
        }
        if let Ok(position) = self.present_position().await {
            self.start_position = position;
            info!(id = self.id, start_position = position, "recorded start position");
        }
        Ok(())
    }

    async fn write_torque(&mut self, value: u8) -> Result<(), ControllerError> {
        let result = self
            .bus
            .write_u8(self.id, self.registers.torque_enable, value)
            .await;
        self.report("torque write", result)?;
        Ok(())
    }

    pub async fn enable_torque(&mut self) -> Result<(), ControllerError> {
        self.write_torque(TORQUE_ENABLE).await
    }

    pub async fn disable_torque(&mut self) -> Result<(), ControllerError> {
        self.write_torque(TORQUE_DISABLE).await
    }

    pub async fn set_mode(&mut self, mode: OperatingMode) -> Result<(), ControllerError> {
        let result = self
            .bus
            .write_u8(self.id, self.registers.operating_mode, mode.code())
            .await;
        self.report("operating mode write", result)?;
        info!(id = self.id, "{} mode successfully engaged", mode);
        Ok(())
    }

    pub async fn set_mode_current(&mut self) -> Result<(), ControllerError> {
        self.set_mode(OperatingMode::Current).await
    }

    pub async fn set_mode_position(&mut self) -> Result<(), ControllerError> {
        self.set_mode(OperatingMode::Position).await
    }

    pub async fn set_mode_extended_position(&mut self) -> Result<(), ControllerError> {
        self.set_mode(OperatingMode::ExtendedPosition).await
    }

    pub async fn set_goal_current(&mut self, current: i16) -> Result<(), ControllerError> {
        let result = self
            .bus
            .write_u16(self.id, self.registers.goal_current, current as u16)
            .await;
        self.report("goal current write", result)?;
        Ok(())
    }

    pub async fn present_position(&mut self) -> Result<i32, ControllerError> {
        let result = self
            .bus
            .read_u32(self.id, self.registers.present_position)
            .await;
        let position = self.report("present position read", result)?;
        Ok(position as i32)
    }

    /// Writes the goal position and returns once the actuator is within the
    /// settle threshold of it.
    pub async fn set_goal_position(&mut self, goal: i32) -> Result<(), ControllerError> {
        let result = self
            .bus
            .write_u32(self.id, self.registers.goal_position, goal as u32)
            .await;
        self.report("goal position write", result)?;
        self.wait_until_settled(goal).await
    }

    /// Moves back to the position recorded at startup.
    pub async fn reset_position(&mut self) -> Result<(), ControllerError> {
        self.set_goal_position(self.start_position).await
    }

    async fn wait_until_settled(&mut self, goal: i32) -> Result<(), ControllerError> {
        let mut polls = 0;
        let mut present = None;
        loop {
            if let Some(max_polls) = self.settle.max_polls {
                if polls >= max_polls {
                    warn!(id = self.id, goal, ?present, polls, "gave up waiting for position");
                    return Err(ControllerError::NotSettled {
                        goal,
                        present,
                        polls,
                    });
                }
            }
            polls += 1;
            // read failures are already logged, keep waiting
            if let Ok(position) = self.present_position().await {
                debug!(id = self.id, goal, present = position, "polling position");
                present = Some(position);
                if self.settle.is_settled(goal, position) {
                    return Ok(());
                }
            }
            if let Some(interval) = self.settle.poll_interval {
                tokio::time::sleep(interval).await;
            }
        }
    }

    /// Disables torque, ignoring failure, and closes the bus.
    pub async fn close(&mut self) {
        let _ = self.disable_torque().await;
        self.bus.close().await;
        info!(id = self.id, "controller closed");
    }
    /// Releases the bus without touching the actuator.
    pub fn into_bus(self) -> B {
        self.bus
    }
}
