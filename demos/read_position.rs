mod common;

use common::{KeyInput, Terminal};
use dynamixel_actuator::{ActuatorController, MotorBus, ProtocolVersion};
use std::time::Duration;
use structopt::StructOpt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::init_tracing();
    let args = common::Args::from_args();
    let mut terminal = Terminal;

    let mut controller = ActuatorController::new(
        args.model,
        args.id,
        args.baud_rate,
        &args.port,
        ProtocolVersion::V2,
    )?;
    controller.initialize().await?;
    println!("start position {}", controller.start_position());
    println!("Press any key to stop");

    while !terminal.key_available()? {
        if let Ok(position) = controller.present_position().await {
            println!("position {}", position);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    terminal.read_key()?;
    // torque was never enabled here, so only the port is closed
    controller.into_bus().close().await;
    Ok(())
}
