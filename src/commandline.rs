use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use fujiac_lib::protocol::{AcMode, FanMode};
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

pub fn parse_on_off(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(format!("invalid on/off value '{s}', expected 'on' or 'off'")),
    }
}

pub fn parse_ac_mode(s: &str) -> Result<AcMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "fan" => Ok(AcMode::Fan),
        "dry" => Ok(AcMode::Dry),
        "cool" => Ok(AcMode::Cool),
        "heat" => Ok(AcMode::Heat),
        "auto" => Ok(AcMode::Auto),
        _ => Err(format!(
            "invalid mode '{s}', expected one of: fan, dry, cool, heat, auto"
        )),
    }
}

pub fn parse_fan_mode(s: &str) -> Result<FanMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => Ok(FanMode::Auto),
        "quiet" => Ok(FanMode::Quiet),
        "low" => Ok(FanMode::Low),
        "medium" => Ok(FanMode::Medium),
        "high" => Ok(FanMode::High),
        _ => Err(format!(
            "invalid fan mode '{s}', expected one of: auto, quiet, low, medium, high"
        )),
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Wait until the indoor unit talks to us and show the current settings
    Status,
    /// Continuously print the decoded settings whenever they change
    Monitor,
    /// Stage one or more setting changes and wait until they are written to the unit
    Set {
        /// Power the unit on or off
        #[arg(long, value_parser = parse_on_off)]
        power: Option<bool>,

        /// Target temperature setpoint (raw unit scale)
        #[arg(long)]
        temp: Option<u8>,

        /// Operating mode: fan, dry, cool, heat or auto
        #[arg(long, value_parser = parse_ac_mode)]
        mode: Option<AcMode>,

        /// Fan speed: auto, quiet, low, medium or high
        #[arg(long, value_parser = parse_fan_mode)]
        fan: Option<FanMode>,

        /// Enable or disable economy mode
        #[arg(long, value_parser = parse_on_off)]
        economy: Option<bool>,

        /// Enable or disable louver swing
        #[arg(long, value_parser = parse_on_off)]
        swing: Option<bool>,

        /// Advance the louver one swing step
        #[arg(long, value_parser = parse_on_off)]
        swing_step: Option<bool>,

        /// How long to wait for the change to be written to the bus
        #[clap(long, value_parser = humantime::parse_duration, default_value = "30s")]
        wait: Duration,
    },
    /// Run in daemon mode, polling the bus and publishing the decoded state
    Daemon {
        /// Output destination for state updates
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval between state publications (e.g., "10s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
        interval: Duration,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously print the decoded state to the standard output (console).
    Console,
    /// Publish the decoded state to an MQTT broker and accept set requests.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Simple)]
        format: MqttFormat,
    },
}

const fn about_text() -> &'static str {
    "fujitsu ac wired remote command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    /// Act as the secondary wired remote instead of the primary
    #[arg(long, action)]
    pub secondary: bool,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Bus silence threshold before the session resets (e.g., "2s", "2s 500ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "2s")]
    pub timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_off_values() {
        assert_eq!(parse_on_off("on"), Ok(true));
        assert_eq!(parse_on_off("OFF"), Ok(false));
        assert!(parse_on_off("maybe").is_err());
    }

    #[test]
    fn mode_names() {
        assert_eq!(parse_ac_mode("Heat"), Ok(AcMode::Heat));
        assert_eq!(parse_fan_mode("quiet"), Ok(FanMode::Quiet));
        assert!(parse_ac_mode("turbo").is_err());
        assert!(parse_fan_mode("max").is_err());
    }
}
