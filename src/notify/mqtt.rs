use std::time::{Duration, Instant};

use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Event, MqttOptions};
use rumqttc::Transport;
use serde::Serialize;

use super::{Notification, NotificationChannel, NotificationKind, SEND_TIMEOUT};
use crate::alert::AlertRecord;
use crate::error::NotificationError;

const NAME: &str = "mqtt";
pub const DEFAULT_TOPIC: &str = "zonewatch/alerts";

/// Publishes the alert JSON with QoS 1 and waits for the broker's PUBACK.
///
/// Each send is one short-lived session so a broker outage never holds a
/// connection thread open behind the alert path.
pub struct MqttChannel {
    endpoint: Option<MqttEndpoint>,
    topic: String,
    client_id: String,
    timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct MqttEndpoint {
    host: String,
    port: u16,
    use_tls: bool,
}

#[derive(Serialize)]
struct AlertPayload<'a> {
    kind: NotificationKind,
    #[serde(flatten)]
    alert: &'a AlertRecord,
}

impl MqttChannel {
    /// `broker` is `host:port`, `mqtt://host:port` or `mqtts://host:port`.
    /// An unparseable address leaves the channel unconfigured.
    pub fn new(broker: Option<&str>, topic: Option<String>) -> Self {
        let endpoint = broker
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .and_then(|b| match parse_mqtt_endpoint(b) {
                Ok(endpoint) => Some(endpoint),
                Err(err) => {
                    log::warn!("mqtt channel disabled: {}", err);
                    None
                }
            });
        Self {
            endpoint,
            topic: topic
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            client_id: format!("zonewatch-{}", std::process::id()),
            timeout: SEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn transport_error(detail: impl ToString) -> NotificationError {
        NotificationError::Transport {
            channel: NAME.to_string(),
            detail: detail.to_string(),
        }
    }
}

impl NotificationChannel for MqttChannel {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(());
        };
        let payload = serde_json::to_vec(&AlertPayload {
            kind: notification.kind,
            alert: &notification.alert,
        })
        .map_err(Self::transport_error)?;

        let mut options = MqttOptions::new(&self.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_start(true);
        options.set_transport(if endpoint.use_tls {
            Transport::tls_with_default_config()
        } else {
            Transport::tcp()
        });

        let (client, mut connection) = Client::new(options, 10);
        client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .map_err(Self::transport_error)?;

        let deadline = Instant::now() + self.timeout;
        let acked = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break false;
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::PubAck(_)))) => break true,
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    return Err(Self::transport_error(format!(
                        "{}:{}: {}",
                        endpoint.host, endpoint.port, err
                    )))
                }
                Err(_) => break false,
            }
        };
        if let Err(err) = client.disconnect() {
            log::debug!("mqtt disconnect: {}", err);
        }

        if acked {
            Ok(())
        } else {
            Err(Self::transport_error(format!(
                "no PUBACK from {}:{} within {:?}",
                endpoint.host, endpoint.port, self.timeout
            )))
        }
    }
}

fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint, String> {
    let mut use_tls = false;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(format!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16), String> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| format!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| format!("missing MQTT port in {}", addr))?;
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid MQTT port in {}", addr))?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("missing MQTT port in {}", addr))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid MQTT port in {}", addr))?;
    if host.is_empty() {
        return Err(format!("missing MQTT host in {}", addr));
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{from_epoch_ms, HUMAN_INTRUSION};
    use crate::detect::BoundingBox;

    #[test]
    fn parses_broker_addresses() {
        assert_eq!(
            parse_mqtt_endpoint("mqtt://broker.local:1883").unwrap(),
            MqttEndpoint {
                host: "broker.local".to_string(),
                port: 1883,
                use_tls: false
            }
        );
        assert!(parse_mqtt_endpoint("mqtts://broker:8883").unwrap().use_tls);
        assert_eq!(parse_mqtt_endpoint("[::1]:1883").unwrap().host, "::1");
        assert!(parse_mqtt_endpoint("ws://broker:80").is_err());
        assert!(parse_mqtt_endpoint("broker").is_err());
        assert!(parse_mqtt_endpoint(":1883").is_err());
    }

    #[test]
    fn missing_or_invalid_broker_leaves_channel_unconfigured() {
        assert!(!MqttChannel::new(None, None).is_configured());
        assert!(!MqttChannel::new(Some("not-an-address"), None).is_configured());
        let channel = MqttChannel::new(Some("127.0.0.1:1883"), None);
        assert!(channel.is_configured());
        assert_eq!(channel.topic(), DEFAULT_TOPIC);
    }

    #[test]
    fn unreachable_broker_fails_within_the_timeout() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let channel = MqttChannel::new(Some(&format!("127.0.0.1:{}", port)), None)
            .with_timeout(Duration::from_secs(2));
        let record = AlertRecord {
            alert_type: HUMAN_INTRUSION.to_string(),
            zone_name: "Main Entrance".to_string(),
            confidence: 0.9,
            coordinates: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            video_path: None,
            triggered_at: from_epoch_ms(0),
        };
        let started = Instant::now();
        let err = channel.send(&Notification::alert(&record)).unwrap_err();
        assert!(matches!(err, NotificationError::Transport { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
