use anyhow::{Context, Result};
use fujiac_lib::protocol::{AcMode, FanMode};
use fujiac_lib::serialport::FujitsuAC;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::{commandline, mqtt};

/// A desired setting change received from the MQTT side. Requests cross
/// into the polling thread over a channel so the session only ever sees
/// a single writer.
#[derive(Debug)]
enum SetRequest {
    Power(bool),
    Temperature(u8),
    Mode(AcMode),
    Fan(FanMode),
    Economy(bool),
    Swing(bool),
    SwingStep(bool),
}

fn parse_set_request(field: &str, payload: &str) -> Result<SetRequest, String> {
    match field {
        "power" => commandline::parse_on_off(payload).map(SetRequest::Power),
        "temperature" => payload
            .parse::<u8>()
            .map(SetRequest::Temperature)
            .map_err(|e| format!("invalid temperature '{payload}': {e}")),
        "mode" => commandline::parse_ac_mode(payload).map(SetRequest::Mode),
        "fan" => commandline::parse_fan_mode(payload).map(SetRequest::Fan),
        "economy" => commandline::parse_on_off(payload).map(SetRequest::Economy),
        "swing" => commandline::parse_on_off(payload).map(SetRequest::Swing),
        "swing_step" => commandline::parse_on_off(payload).map(SetRequest::SwingStep),
        _ => Err(format!("unknown settable field '{field}'")),
    }
}

fn apply_set_request(ac: &mut FujitsuAC, request: SetRequest) {
    info!("Applying set request: {request:?}");
    let session = ac.session_mut();
    match request {
        SetRequest::Power(on) => session.set_on_off(on),
        SetRequest::Temperature(t) => session.set_temp(t),
        SetRequest::Mode(m) => session.set_mode(m),
        SetRequest::Fan(f) => session.set_fan_mode(f),
        SetRequest::Economy(e) => session.set_economy_mode(e),
        SetRequest::Swing(s) => session.set_swing_mode(s),
        SetRequest::SwingStep(s) => session.set_swing_step(s),
    }
}

#[derive(Debug, Serialize)]
struct StateSnapshot {
    bound: bool,
    power: bool,
    temperature: u8,
    mode: AcMode,
    fan: FanMode,
    economy: bool,
    swing: bool,
    swing_step: bool,
    controller_temp: u8,
    error: u8,
}

impl StateSnapshot {
    fn of(ac: &FujitsuAC) -> Self {
        let session = ac.session();
        Self {
            bound: ac.is_bound(),
            power: session.get_on_off(),
            temperature: session.get_temp(),
            mode: session.get_mode(),
            fan: session.get_fan_mode(),
            economy: session.get_economy_mode(),
            swing: session.get_swing_mode(),
            swing_step: session.get_swing_step(),
            controller_temp: session.get_controller_temp(),
            error: session.current_state().ac_error,
        }
    }
}

/// Publishes every scalar of the snapshot to its own subtopic, e.g.
/// `fujiac/temperature`.
fn publish_simple_format(publisher: &mqtt::MqttPublisher, value: &serde_json::Value) {
    let base_topic = publisher.topic();
    if let serde_json::Value::Object(map) = value {
        for (key, val) in map {
            let topic = format!("{base_topic}/{key}");
            let payload = match val {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if let Err(e) = publisher.publish(&topic, &payload) {
                error!("Failed to publish message to topic {topic}: {e}");
            }
        }
    }
}

fn publish_json_format(publisher: &mqtt::MqttPublisher, value: &serde_json::Value) {
    let mut payload = match value {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    payload.insert(
        "timestamp".to_string(),
        json!(chrono::Utc::now().to_rfc3339()),
    );

    match serde_json::to_string(&payload) {
        Ok(json_payload) => {
            if let Err(e) = publisher.publish(publisher.topic(), &json_payload) {
                error!("Failed to publish data to MQTT: {e:?}");
            }
        }
        Err(e) => error!("Failed to serialize data to JSON string: {e}"),
    }
}

/// Spawns the thread that drives the MQTT event loop and forwards set
/// requests into the polling loop.
fn spawn_subscriber(
    mut connection: rumqttc::Connection,
    base_topic: String,
    sender: mpsc::Sender<SetRequest>,
) {
    std::thread::spawn(move || {
        let prefix = format!("{base_topic}/set/");
        for notification in connection.iter() {
            match notification {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish))) => {
                    let Some(field) = publish.topic.strip_prefix(&prefix) else {
                        continue;
                    };
                    let payload = String::from_utf8_lossy(&publish.payload);
                    match parse_set_request(field, payload.trim()) {
                        Ok(request) => {
                            if sender.send(request).is_err() {
                                // Polling loop is gone, stop driving the
                                // connection.
                                return;
                            }
                        }
                        Err(e) => warn!("Ignoring MQTT set request: {e}"),
                    }
                }
                Ok(event) => debug!("MQTT event: {event:?}"),
                Err(e) => {
                    error!("MQTT connection error: {e}");
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }
    });
}

pub fn run(mut ac: FujitsuAC, output: commandline::DaemonOutput, interval: Duration) -> Result<()> {
    info!("Starting daemon mode: output={output:?}, interval={interval:?}");

    let mut mqtt_publisher: Option<mqtt::MqttPublisher> = None;
    let (sender, receiver) = mpsc::channel::<SetRequest>();

    if let commandline::DaemonOutput::Mqtt { config_file, .. } = &output {
        let config = mqtt::MqttConfig::load(config_file)
            .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
        info!("Successfully loaded MQTT config from {config_file}: {config:?}");

        let (client, connection) = config.create_client()?;
        client
            .subscribe(config.set_topic_filter(), config.qos())
            .with_context(|| "Failed to subscribe to set request topics")?;
        spawn_subscriber(connection, config.topic().to_string(), sender.clone());

        mqtt_publisher = Some(mqtt::MqttPublisher::new(client, config));
    }
    drop(sender);

    let mut last_publish: Option<Instant> = None;

    loop {
        if let Err(e) = ac.poll() {
            error!("Bus poll failed: {e}");
            std::thread::sleep(Duration::from_millis(100));
            continue;
        }

        while let Ok(request) = receiver.try_recv() {
            apply_set_request(&mut ac, request);
        }

        if last_publish.map_or(true, |t| t.elapsed() >= interval) {
            last_publish = Some(Instant::now());
            let snapshot = StateSnapshot::of(&ac);

            match &output {
                commandline::DaemonOutput::Console => {
                    println!(
                        "--- State at {} ---",
                        chrono::Local::now().to_rfc3339()
                    );
                    println!("{snapshot:?}");
                }
                commandline::DaemonOutput::Mqtt { format, .. } => {
                    if let Some(publisher) = &mqtt_publisher {
                        match serde_json::to_value(&snapshot) {
                            Ok(value) => match format {
                                commandline::MqttFormat::Json => {
                                    publish_json_format(publisher, &value)
                                }
                                commandline::MqttFormat::Simple => {
                                    publish_simple_format(publisher, &value)
                                }
                            },
                            Err(e) => error!("Failed to serialize state: {e}"),
                        }
                    } else {
                        warn!(
                            "MQTT output selected, but publisher is not initialized. Skipping publish."
                        );
                    }
                }
            }
        }

        // The polling is non-blocking; idle briefly so an empty bus does
        // not spin the CPU.
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_requests_parse() {
        assert!(matches!(
            parse_set_request("power", "on"),
            Ok(SetRequest::Power(true))
        ));
        assert!(matches!(
            parse_set_request("temperature", "42"),
            Ok(SetRequest::Temperature(42))
        ));
        assert!(matches!(
            parse_set_request("mode", "cool"),
            Ok(SetRequest::Mode(AcMode::Cool))
        ));
        assert!(matches!(
            parse_set_request("fan", "high"),
            Ok(SetRequest::Fan(FanMode::High))
        ));
        assert!(parse_set_request("brightness", "5").is_err());
        assert!(parse_set_request("temperature", "cold").is_err());
    }
}
