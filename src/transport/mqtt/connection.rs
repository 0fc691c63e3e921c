//! Pure connection configuration for the rumqttc transport
//!
//! This module contains pure functions for building client options, parsing
//! broker URLs and translating rumqttc failures into session errors.

use crate::error::ConnectError;
use crate::protocol::{Endpoint, QoS};
use crate::transport::ConnectParams;
use rumqttc::{ConnectReturnCode, ConnectionError, LastWill, MqttOptions};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MQTT_PORT: u16 = 1883;
const MQTTS_PORT: u16 = 8883;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid broker URL: {0}")]
pub struct InvalidBrokerUrl(pub String);

/// Parse `mqtt://host[:port]` or `mqtts://host[:port]` into an endpoint
pub fn parse_broker_url(broker_url: &str) -> Result<Endpoint, InvalidBrokerUrl> {
    let url = Url::parse(broker_url).map_err(|_| InvalidBrokerUrl(broker_url.to_string()))?;

    let use_tls = match url.scheme() {
        "mqtts" | "ssl" => true,
        "mqtt" | "tcp" => false,
        _ => return Err(InvalidBrokerUrl(broker_url.to_string())),
    };
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url
        .port()
        .unwrap_or(if use_tls { MQTTS_PORT } else { MQTT_PORT });

    Ok(Endpoint::new(host, port, use_tls))
}

pub fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

pub fn from_mqtt_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// rumqttc rejects keepalives below one second other than zero
fn normalize_keepalive(keepalive: Duration) -> Duration {
    if keepalive.is_zero() {
        keepalive
    } else {
        keepalive.max(Duration::from_secs(1))
    }
}

/// Pure function to build client options for one handshake
pub fn configure_mqtt_options(params: &ConnectParams) -> MqttOptions {
    let endpoint = &params.endpoint;
    let mut mqtt_options =
        MqttOptions::new(params.client_id.clone(), endpoint.host(), endpoint.port());

    // Certificate validation against the platform roots; no self-signed acceptance
    if endpoint.use_tls() {
        mqtt_options.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    if !params.credentials.username().is_empty() {
        mqtt_options.set_credentials(
            params.credentials.username(),
            params.credentials.password(),
        );
    }

    mqtt_options.set_keep_alive(normalize_keepalive(params.keepalive));
    // Subscriptions are restored by the session, not by the broker
    mqtt_options.set_clean_session(true);

    if let Some(will) = &params.last_will {
        mqtt_options.set_last_will(LastWill::new(
            will.topic.clone(),
            will.payload.to_vec(),
            to_mqtt_qos(will.qos),
            will.retain,
        ));
    }

    mqtt_options
}

/// Translate a broker refusal code
pub fn map_return_code(code: &ConnectReturnCode) -> ConnectError {
    match code {
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            ConnectError::AuthRejected
        }
        other => ConnectError::Refused(format!("{other:?}")),
    }
}

/// Translate an event loop failure during the handshake
pub fn map_connection_error(error: &ConnectionError) -> ConnectError {
    match error {
        ConnectionError::ConnectionRefused(code) => map_return_code(code),
        ConnectionError::Tls(e) => ConnectError::TlsHandshakeFailed(e.to_string()),
        ConnectionError::Io(e) => ConnectError::NetworkUnreachable(e.to_string()),
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => ConnectError::Timeout,
        other => ConnectError::Refused(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Credentials, Message};

    fn test_params() -> ConnectParams {
        ConnectParams {
            endpoint: Endpoint::tls("broker.example.com"),
            credentials: Credentials::new("user", "secret"),
            keepalive: Duration::from_secs(60),
            client_id: "itemreminder-test".to_string(),
            last_will: Some(Message::new(
                "itemreminder/status",
                "ItemReminder Client Offline",
                QoS::AtMostOnce,
            )),
        }
    }

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("mqtts://broker.example.com").unwrap(),
            Endpoint::new("broker.example.com", 8883, true)
        );
        assert_eq!(
            parse_broker_url("mqtt://localhost:1884").unwrap(),
            Endpoint::new("localhost", 1884, false)
        );
        assert_eq!(
            parse_broker_url("mqtt://localhost").unwrap().port(),
            1883
        );
    }

    #[test]
    fn test_invalid_broker_url() {
        assert!(parse_broker_url("invalid-url").is_err());
        assert!(parse_broker_url("http://broker.example.com").is_err());
        assert_eq!(
            parse_broker_url("ftp://x").unwrap_err(),
            InvalidBrokerUrl("ftp://x".to_string())
        );
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&test_params());
        assert_eq!(
            options.broker_address(),
            ("broker.example.com".to_string(), 8883)
        );
        assert_eq!(options.client_id(), "itemreminder-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.clean_session());
        assert_eq!(
            options.credentials(),
            Some(("user".to_string(), "secret".to_string()))
        );
        let will = options.last_will().expect("last will configured");
        assert_eq!(will.topic, "itemreminder/status");
    }

    #[test]
    fn test_anonymous_connect_sets_no_credentials() {
        let mut params = test_params();
        params.credentials = Credentials::new("", "");
        params.last_will = None;
        let options = configure_mqtt_options(&params);
        assert_eq!(options.credentials(), None);
        assert!(options.last_will().is_none());
    }

    #[test]
    fn test_sub_second_keepalive_is_rounded_up() {
        assert_eq!(
            normalize_keepalive(Duration::from_millis(200)),
            Duration::from_secs(1)
        );
        assert_eq!(normalize_keepalive(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_qos_conversion() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            assert_eq!(from_mqtt_qos(to_mqtt_qos(qos)), qos);
        }
    }

    #[test]
    fn test_map_connection_error() {
        assert_eq!(
            map_connection_error(&ConnectionError::ConnectionRefused(
                ConnectReturnCode::BadUserNamePassword
            )),
            ConnectError::AuthRejected
        );
        assert_eq!(
            map_connection_error(&ConnectionError::ConnectionRefused(
                ConnectReturnCode::NotAuthorized
            )),
            ConnectError::AuthRejected
        );
        assert!(matches!(
            map_connection_error(&ConnectionError::ConnectionRefused(
                ConnectReturnCode::ServiceUnavailable
            )),
            ConnectError::Refused(_)
        ));
        assert!(matches!(
            map_connection_error(&ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused"
            ))),
            ConnectError::NetworkUnreachable(_)
        ));
        assert_eq!(
            map_connection_error(&ConnectionError::NetworkTimeout),
            ConnectError::Timeout
        );
    }
}
