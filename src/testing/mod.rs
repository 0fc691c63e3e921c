//! Testing utilities and mock implementations
//!
//! This module provides an in-memory broker so sessions can be exercised
//! without a real MQTT broker.

pub mod mocks;

pub use mocks::*;
