//! Async client for the Solarman V5 data-logger protocol.
//!
//! V5 is the proprietary envelope that WiFi logging sticks attached to
//! photovoltaic inverters speak on TCP port 8899. It wraps a standard
//! Modbus RTU frame with a fixed header (serial, sequence, timing fields),
//! a single-byte additive checksum, and start/end markers. This crate
//! builds and parses that envelope, streams it off a TCP connection, and
//! drives a serialized request/response engine on top of it so a caller
//! can speak ordinary Modbus register operations to the inverter without
//! touching the stick's cloud-facing side.
//!
//! ```no_run
//! use std::time::Duration;
//! use solarman_v5::{Client, ClientConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::builder("192.168.1.50", 0x1234_5678)
//!     .operation_timeout(Duration::from_secs(10))
//!     .build();
//! let client = Client::new(config);
//! client.connect().await?;
//! let registers = client.read_holding_registers(0, 4).await?;
//! client.close().await;
//! # let _ = registers;
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod gate;
pub mod observability;
pub mod rtu;
pub mod sequence;

pub use client::{with_connection, Client};
pub use config::{ClientConfig, ClientConfigBuilder, ReconnectPolicy};
pub use connection::ClientState;
pub use error::{FrameErrorKind, Result, SolarmanError};
pub use observability::{Observer, TracingObserver};
