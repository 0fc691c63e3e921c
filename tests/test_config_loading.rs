//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use itemreminder_mqtt::config::{ClientConfig, ConfigError};
use itemreminder_mqtt::protocol::{Endpoint, Priority, QoS};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[broker]
host = "broker.itemreminder.example"
port = 8883
username = "device-42"
password = "hunter2"
keepalive_secs = 30
client_id = "kitchen-display"

[session]
ack_timeout_secs = 5
max_reconnect_attempts = 8
offline_queue_capacity = 16

[topics]
command = "itemreminder/devices/+/command"

[reminders]
interval_secs = 60
priority = "high"
qos = 2
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(
        config.endpoint().unwrap(),
        Endpoint::new("broker.itemreminder.example", 8883, true)
    );
    let credentials = config.credentials().unwrap();
    assert_eq!(credentials.username(), "device-42");
    assert_eq!(credentials.password(), "hunter2");
    assert_eq!(config.keepalive(), Duration::from_secs(30));

    let settings = config.session_settings();
    assert_eq!(settings.client_id, "kitchen-display");
    assert_eq!(settings.ack_timeout, Duration::from_secs(5));
    assert_eq!(settings.reconnect.max_attempts, Some(8));
    assert_eq!(settings.offline_queue_capacity, 16);

    let schedule = config.reminder_schedule().unwrap();
    assert_eq!(schedule.topic, "itemreminder/notification");
    assert_eq!(schedule.interval, Duration::from_secs(60));
    assert_eq!(schedule.priority, Priority::High);
    assert_eq!(schedule.qos, QoS::ExactlyOnce);
}

#[test]
fn test_config_loads_broker_url() {
    let temp_file = write_config(
        r#"
[broker]
broker_url = "mqtt://localhost:1884"
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(
        config.endpoint().unwrap(),
        Endpoint::new("localhost", 1884, false)
    );
    let credentials = config.credentials().unwrap();
    assert_eq!(credentials.username(), "");
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = ClientConfig::load_from_file(Path::new("/nonexistent/itemreminder.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[broker\nhost = ");
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_broker_section_fails() {
    let temp_file = write_config(
        r#"
[session]
ack_timeout_secs = 5
"#,
    );
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_values_are_rejected_at_load() {
    let cases = [
        "[broker]\nhost = \"h\"\nport = 0",
        "[broker]\nhost = \"h\"\n[session]\nack_timeout_secs = 0",
        "[broker]\nhost = \"h\"\n[session]\nreconnect_base_delay_secs = 10\nreconnect_max_delay_secs = 5",
        "[broker]\nhost = \"h\"\n[session]\nmax_reconnect_attempts = 0",
        "[broker]\nhost = \"h\"\n[reminders]\ninterval_secs = 0",
        "[broker]\nhost = \"h\"\n[topics]\nreminder = \"itemreminder/#\"",
        "[broker]\nbroker_url = \"http://h:80\"",
    ];

    for content in cases {
        let temp_file = write_config(content);
        let result = ClientConfig::load_from_file(temp_file.path());
        assert!(
            matches!(result, Err(ConfigError::InvalidConfig(_))),
            "expected InvalidConfig for {content:?}, got {result:?}"
        );
    }
}

#[test]
fn test_env_credentials_resolved_on_demand() {
    let temp_file = write_config(
        r#"
[broker]
host = "broker.itemreminder.example"
username_env = "ITEMREMINDER_TEST_LOADING_USER"
password_env = "ITEMREMINDER_TEST_LOADING_PASS_UNSET"
"#,
    );

    // Loading succeeds; the missing variable only matters when credentials are needed
    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
    std::env::set_var("ITEMREMINDER_TEST_LOADING_USER", "env-device");
    std::env::remove_var("ITEMREMINDER_TEST_LOADING_PASS_UNSET");

    match config.credentials() {
        Err(ConfigError::EnvVarNotFound(name)) => {
            assert_eq!(name, "ITEMREMINDER_TEST_LOADING_PASS_UNSET")
        }
        other => panic!("Expected EnvVarNotFound, got {other:?}"),
    }
}

#[test]
fn test_shown_config_hides_password_and_reloads() {
    let temp_file = write_config(
        r#"
[broker]
host = "broker.itemreminder.example"
username = "device-42"
password = "hunter2"
"#,
    );
    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    let shown = config.redacted().to_toml_string().unwrap();
    assert!(!shown.contains("hunter2"));
    assert!(shown.contains("device-42"));

    let reloaded = ClientConfig::from_toml_str(&shown).unwrap();
    assert_eq!(reloaded.broker.host, config.broker.host);
    assert_eq!(reloaded.reminders, config.reminders);
    assert_eq!(reloaded.session, config.session);
}
