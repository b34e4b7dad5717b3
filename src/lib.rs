//! Multi-role BLE bridge core.
//!
//! Relays byte streams between a control app (we are its GATT server), a
//! guitar amplifier and an optional expression pedal (we are their GATT
//! client, or a serial peer for the amplifier). Everything in this crate
//! is hardware independent and tested on the host; the embedded binary
//! (`main.rs`, `embedded` feature) supplies the SoftDevice and UART
//! adapters behind the [`link::Transport`] and [`server::Peripheral`]
//! traits.
//!
//! Usage: `cargo test --lib`
//!
//! Note: The embedded binary uses main.rs with #![no_std] and #![no_main].

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod bridge;
pub mod config;
pub mod discovery;
pub mod error;
pub mod link;
pub mod ring_buffer;
pub mod server;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, BridgeStats, LinkStatus};
pub use config::{BridgeConfig, LinkBuffer};
pub use error::{Error, Result};
pub use link::{Role, SignalStrength, Transport, TransportKind, TransportSession};
pub use ring_buffer::RingBuffer;
pub use server::{LocalServer, Peripheral};
