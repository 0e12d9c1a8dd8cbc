mod common;

use common::{Key, KeyInput, Terminal};
use dynamixel_actuator::{ActuatorController, ProtocolVersion};
use structopt::StructOpt;

const GOAL_CURRENT: i16 = 1000;

/// Alternates goal current on every keypress until ESC, then switches to
/// extended position mode and returns to the start position.
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

    // the controller logs failures, the routine carries on regardless
    let _ = controller.set_mode_current().await;
    let _ = controller.enable_torque().await;

    let goal_currents = [-GOAL_CURRENT, GOAL_CURRENT];
    let mut index = 0;
    loop {
        println!("Press any key to continue! (or press ESC to quit!)");
        if terminal.read_key()? == Key::Escape {
            break;
        }
        let _ = controller.set_goal_current(goal_currents[index]).await;
        index = 1 - index;
    }

    let _ = controller.set_goal_current(0).await;
    let _ = controller.disable_torque().await;
    let _ = controller.set_mode_extended_position().await;
    let _ = controller.enable_torque().await;
    if let Err(err) = controller.reset_position().await {
        tracing::error!("failed to return to start position: {}", err);
    }
    controller.close().await;
    Ok(())
}
