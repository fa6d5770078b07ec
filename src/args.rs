use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use vcu_gateway::gnss::transport::GPSD_RAW_WATCH;
use vcu_gateway::gnss::{Connector, SerialConnector, TcpConnector, TransportConfig};
use vcu_gateway::gpsd::ReaderConfig;
use vcu_gateway::telemetry::TelemetryConfig;
use vcu_gateway::ubx::messages::DynamicModel;

// CLI root definition.
#[derive(Parser, Debug)]
#[command(name = "vcu-gateway", version)]
#[command(about = "Vehicle telematics gateway: u-blox ADR receiver, gpsd feed and telemetry queue")]
pub struct Cli {
    #[command(subcommand)]
    pub command: AppCommand,
}

// Subcommands map directly to one module each under src/commands/.
#[derive(Subcommand, Debug)]
pub enum AppCommand {
    /// Run all gateway workers until interrupted
    Run(RunArgs),
    /// Query or configure the GNSS receiver once and exit
    Gnss(GnssArgs),
}

// Where the receiver is reachable. A serial device wins over the TCP address.
#[derive(Args, Debug, Clone)]
pub struct GnssEndpoint {
    #[arg(long, env = "VCU_GNSS_ADDR", default_value = "127.0.0.1:2947")]
    pub gnss_addr: String,
    #[arg(long, env = "VCU_GNSS_SERIAL")]
    pub gnss_serial: Option<String>,
    #[arg(long, env = "VCU_GNSS_BAUD", default_value_t = 115_200)]
    pub gnss_baud: u32,
    /// Do not send the gpsd raw watch command after connecting over TCP
    #[arg(long = "no-gnss-watch", action = ArgAction::SetFalse, default_value_t = true)]
    pub gnss_watch: bool,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = 3_000)]
    pub request_timeout_ms: u64,
}

impl GnssEndpoint {
    pub fn connector(&self) -> Box<dyn Connector> {
        match &self.gnss_serial {
            Some(path) => Box::new(SerialConnector {
                path: path.clone(),
                baud_rate: self.gnss_baud,
            }),
            None => {
                let tcp = TcpConnector::new(self.gnss_addr.clone());
                if self.gnss_watch {
                    Box::new(tcp.with_watch_command(GPSD_RAW_WATCH))
                } else {
                    Box::new(tcp)
                }
            }
        }
    }

    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            request_timeout: Duration::from_millis(self.request_timeout_ms.max(100)),
            ..TransportConfig::default()
        }
    }
}

// Gateway runtime configuration. Every option also reads from the environment.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub gnss: GnssEndpoint,
    #[arg(long, env = "VCU_GPSD_ADDR", default_value = "127.0.0.1:2947")]
    pub gpsd_addr: String,
    #[arg(long, env = "VCU_GPSD_TIMEOUT_SECS", default_value_t = 5)]
    pub gpsd_timeout_secs: u64,
    /// Number of telemetry entries kept while the uplink is unavailable (1..3000)
    #[arg(long, env = "VCU_QUEUE_CAPACITY", default_value_t = 300)]
    pub queue_capacity: usize,
    #[arg(long, env = "VCU_UPLOAD_PERIOD_SECS", default_value_t = 30)]
    pub upload_period_secs: u64,
    #[arg(long, env = "VCU_UPLOAD_BATCH", default_value_t = 100)]
    pub upload_batch: usize,
    #[arg(long, env = "VCU_SPOOL_FILE", default_value = "telemetry.jsonl")]
    pub spool_file: PathBuf,
    #[arg(long, env = "VCU_LOCK_FILE", default_value = "vcu-gateway.lock")]
    pub lock_file: PathBuf,
    #[arg(long, default_value_t = 5)]
    pub shutdown_timeout_secs: u64,
    /// Back up the receiver state to flash before shutting down
    #[arg(long, env = "VCU_SAVE_STATE_ON_EXIT")]
    pub save_state_on_exit: bool,
}

impl RunArgs {
    pub fn to_reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            addr: self.gpsd_addr.clone(),
            report_timeout: Duration::from_secs(self.gpsd_timeout_secs.max(1)),
            ..ReaderConfig::default()
        }
    }

    // Upload offset stays inside the period so short periods still upload.
    pub fn to_telemetry_config(&self) -> TelemetryConfig {
        let upload_every = self.upload_period_secs.max(1);
        let defaults = TelemetryConfig::default();
        TelemetryConfig {
            queue_capacity: self.queue_capacity,
            upload_every,
            upload_offset: defaults.upload_offset.min(upload_every - 1),
            batch_size: self.upload_batch.max(1),
            ..defaults
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct GnssArgs {
    #[command(flatten)]
    pub endpoint: GnssEndpoint,
    #[command(subcommand)]
    pub action: GnssAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum GnssAction {
    /// Print version, port, navigation and sensor fusion state as JSON
    Info,
    /// Set the navigation dynamic model (0, 2..10; 4 = automotive)
    SetDynamicModel {
        #[arg(value_parser = parse_dynamic_model)]
        model: DynamicModel,
    },
    /// Enable or disable automatic IMU mount alignment
    SetAutoAlign {
        #[arg(action = ArgAction::Set)]
        enable: bool,
    },
    /// Set IMU mount angles in degrees
    SetImuAngles {
        #[arg(long, allow_negative_numbers = true)]
        roll: f64,
        #[arg(long, allow_negative_numbers = true)]
        pitch: f64,
        #[arg(long, allow_negative_numbers = true)]
        yaw: f64,
    },
    /// Set the lever arm from vehicle reference point to antenna, in meters
    SetVrpAnt(LeverArmArgs),
    /// Set the lever arm from vehicle reference point to IMU, in meters
    SetVrpImu(LeverArmArgs),
    /// Clear navigation data and restart the receiver
    ColdStart,
    /// Persist navigation and sensor configuration
    SaveConfig,
    /// Restore default navigation and sensor configuration
    ResetConfig,
    /// Stop the receiver, save its state to flash and restart it
    SaveState {
        #[arg(long, default_value_t = 200)]
        settle_ms: u64,
    },
    /// Clear the state saved in flash
    ClearState,
}

#[derive(Args, Debug, Clone)]
pub struct LeverArmArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub x: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub y: f64,
    #[arg(long, allow_negative_numbers = true)]
    pub z: f64,
}

fn parse_dynamic_model(raw: &str) -> Result<DynamicModel, String> {
    let code: u8 = raw
        .parse()
        .map_err(|_| format!("not a model number: {raw}"))?;
    DynamicModel::try_from(code).map_err(|code| format!("unsupported dynamic model {code}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_offset_fits_short_periods() {
        let cli = Cli::parse_from(["vcu-gateway", "run", "--upload-period-secs", "3"]);
        let AppCommand::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.to_telemetry_config();
        assert_eq!(config.upload_every, 3);
        assert_eq!(config.upload_offset, 2);
        assert!(!args.save_state_on_exit);
    }

    #[test]
    fn serial_device_overrides_tcp() {
        let cli = Cli::parse_from([
            "vcu-gateway",
            "gnss",
            "--gnss-serial",
            "/dev/gps0",
            "set-imu-angles",
            "--roll",
            "-1.5",
            "--pitch",
            "0",
            "--yaw",
            "90",
        ]);
        let AppCommand::Gnss(args) = cli.command else {
            panic!("expected gnss");
        };
        assert_eq!(args.endpoint.connector().target(), "/dev/gps0 @ 115200");
        assert!(matches!(
            args.action,
            GnssAction::SetImuAngles { roll, .. } if roll == -1.5
        ));
    }

    #[test]
    fn dynamic_model_codes_are_checked() {
        assert_eq!(parse_dynamic_model("4"), Ok(DynamicModel::Automotive));
        assert!(parse_dynamic_model("1").is_err());
        assert!(parse_dynamic_model("car").is_err());
    }
}
