#![cfg_attr(docsrs, feature(doc_cfg))]
//! # fujiac_lib
//!
//! This crate implements the proprietary 8-byte serial protocol spoken on the
//! wired remote-controller bus of Fujitsu split-system air conditioners. It
//! decodes and encodes bus frames, tracks the login/negotiation conversation
//! with the indoor unit, and merges user-requested setting changes into the
//! outgoing frames, acting as either the primary or the secondary wired
//! remote.
//!
//! ## Features
//!
//! This crate uses a feature-based system to keep dependencies minimal.
//! You need to enable the transport client you want to use.
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `fujiac` command-line tool and pulls in `serialport` and `serde`.
//!
//! ### Client Features
//! - `serialport`: Enables the **synchronous** client using the `serialport` crate.
//! - `tokio-serial-async`: Enables the **asynchronous** client using `tokio` and `tokio-serial`.
//!
//! ### Utility Features
//! - `protocol_serde`: Enables `serde` support for serializing/deserializing the protocol data structures.
//! - `bin-dependencies`: Enables all features required by the `fujiac` binary executable.

/// Contains error types for the library.
mod error;
/// Frame layout and the bitfield codec for the wired remote bus.
pub mod protocol;
/// Session state machine, pending-update staging and transmit timing.
pub mod session;

pub use error::Error;

/// Synchronous transport client for the wired remote bus.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

/// Asynchronous transport client for the wired remote bus.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;
