use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io;
use std::time::Duration;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

#[derive(StructOpt)]
#[structopt()]
pub struct Args {
    #[structopt(long, default_value = "/dev/ttyUSB0", help = "Serial port to use")]
    pub port: String,
    #[structopt(long, default_value = "1000000", help = "Baud rate of the actuator")]
    pub baud_rate: u32,
    #[structopt(long, default_value = "1", help = "Bus id of the actuator")]
    pub id: u8,
    #[structopt(long, default_value = "430", help = "Actuator model, 430 or 540")]
    pub model: u16,
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Key {
    Escape,
    Other,
}

/// Single keypress input, independent of line buffering.
pub trait KeyInput {
    /// Blocks until a key is pressed.
    fn read_key(&mut self) -> io::Result<Key>;
    /// Returns true if a keypress is waiting, without consuming it.
    fn key_available(&mut self) -> io::Result<bool>;
}

/// Raw mode is only held while waiting for input so log lines keep their
/// normal line endings.
pub struct Terminal;

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<RawModeGuard> {
        enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

impl KeyInput for Terminal {
    fn read_key(&mut self) -> io::Result<Key> {
        let _raw = RawModeGuard::enable()?;
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                return Ok(match key.code {
                    KeyCode::Esc => Key::Escape,
                    _ => Key::Other,
                });
            }
        }
    }

    fn key_available(&mut self) -> io::Result<bool> {
        let _raw = RawModeGuard::enable()?;
        event::poll(Duration::ZERO)
    }
}
