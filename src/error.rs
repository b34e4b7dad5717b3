//! Unified error type for ampbridge.
//!
//! We avoid `alloc` - all error variants carry no data, so the enum stays
//! `Copy` and cheap to pass through the bridge loop.
//! Implements `defmt::Format` for efficient on-target logging.

use core::fmt;

/// Link-level failures reported by sessions, adapters and the manager.
///
/// None of these are fatal: establishment failures are retried by the
/// connection manager, `BufferFull` is a counted backpressure condition and
/// `LinkLost` only pauses routing through the affected endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Establishment
    /// No matching peer appeared within the scan window.
    DeviceNotFound,

    /// The link-layer connection did not complete in time.
    ConnectTimeout,

    /// The peer does not expose the expected service or characteristics.
    ServiceMissing,

    /// Enabling notifications on the inbound characteristic failed.
    SubscriptionFailed,

    // Data path
    /// A transport-level write was rejected or timed out.
    WriteFailed,

    /// A ring buffer had no room for the incoming bytes.
    BufferFull,

    /// The link dropped, or the endpoint is not connected.
    LinkLost,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::DeviceNotFound => "device not found",
            Error::ConnectTimeout => "connect timeout",
            Error::ServiceMissing => "service missing",
            Error::SubscriptionFailed => "subscription failed",
            Error::WriteFailed => "write failed",
            Error::BufferFull => "buffer full",
            Error::LinkLost => "link lost",
        };
        f.write_str(msg)
    }
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;
