use crate::args::{GnssAction, GnssArgs, LeverArmArgs};
use anyhow::{Context, Result};
use log::info;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use vcu_gateway::gnss::{Gnss, UbxTransport};
use vcu_gateway::ubx::messages::{Angles, LeverArm};

// One-shot receiver command: connect, run a single operation, print the outcome.
pub fn run_gnss(args: GnssArgs) -> Result<()> {
    let transport = Arc::new(UbxTransport::new(
        args.endpoint.connector(),
        args.endpoint.to_transport_config(),
    ));
    transport
        .connect()
        .with_context(|| format!("connecting to GNSS receiver failed: {}", transport.target()))?;
    info!("connected to {}", transport.target());

    let mut gnss = Gnss::new(Arc::clone(&transport));
    let output = match args.action {
        GnssAction::Info => info_report(&mut gnss)?,
        GnssAction::SetDynamicModel { model } => gnss.set_dynamic_model(model),
        GnssAction::SetAutoAlign { enable } => gnss.set_auto_align(enable),
        GnssAction::SetImuAngles { roll, pitch, yaw } => {
            gnss.set_imu_cfg_angles(Angles { roll, pitch, yaw })
        }
        GnssAction::SetVrpAnt(arm) => gnss.set_vrp_ant(lever_arm(&arm)),
        GnssAction::SetVrpImu(arm) => gnss.set_vrp_imu(lever_arm(&arm)),
        GnssAction::ColdStart => gnss.cold_start(),
        GnssAction::SaveConfig => gnss.save_config(),
        GnssAction::ResetConfig => gnss.reset_config(),
        GnssAction::SaveState { settle_ms } => {
            let mut gnss = gnss.with_settle_delay(Duration::from_millis(settle_ms));
            gnss.save_state()
        }
        GnssAction::ClearState => gnss.clear_state(),
    };
    println!("{output}");

    transport.disconnect();
    Ok(())
}

fn lever_arm(arm: &LeverArmArgs) -> LeverArm {
    LeverArm {
        x: arm.x,
        y: arm.y,
        z: arm.z,
    }
}

// Everything the receiver reports about itself, as pretty JSON.
fn info_report(gnss: &mut Gnss<UbxTransport>) -> Result<String> {
    let report = json!({
        "version": gnss.version(),
        "uart": gnss.uart_settings(),
        "nmea-protocol": gnss.nmea_protocol(),
        "dynamic-model": gnss.dynamic_model().map(|model| model.to_string()),
        "auto-align": gnss.auto_align(),
        "imu-cfg-angles": gnss.imu_cfg_angles(),
        "auto-align-state": gnss.auto_align_state(),
        "auto-align-angles": gnss.auto_align_angles(),
        "vrp-ant": gnss.vrp_ant(),
        "vrp-imu": gnss.vrp_imu(),
        "esf-status": gnss.esf_status(),
        "sos-state": gnss.sos_state().map(|state| state.to_string()),
    });
    serde_json::to_string_pretty(&report).context("rendering receiver info failed")
}
