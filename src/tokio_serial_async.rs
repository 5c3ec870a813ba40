//! Provides an asynchronous wired-remote controller client using Tokio and
//! the `tokio-serial` crate for serial communication.
//!
//! This module is suitable for applications built on the Tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use fujiac_lib::session::Role;
//! use fujiac_lib::tokio_serial_async::{Error, FujitsuAC};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut ac = FujitsuAC::connect("/dev/ttyUSB0", Role::Primary)?;
//!
//!     loop {
//!         ac.poll().await?;
//!         if ac.is_bound() {
//!             println!("current state: {}", ac.session().current_state());
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use crate::protocol::{BAUD_RATE, FRAME_LENGTH, MIN_TX_DELAY};
use crate::session::{Role, Session};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

/// Errors specific to the asynchronous Tokio serial port client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error, typically from the serial port communication.
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    /// An error from the `tokio-serial` crate.
    #[error("Tokio serial error: {0}")]
    TokioSerial(#[from] tokio_serial::Error),
    /// An error indicating that a Tokio timeout elapsed during an I/O operation.
    #[error("Tokio timeout elapsed: {0}")]
    TokioElapsed(#[from] tokio::time::error::Elapsed),
}

/// A specialized `Result` type for operations within the `tokio_serial_async` module.
type Result<T> = std::result::Result<T, Error>;

/// Asynchronous wired-remote controller attached to a serial port.
///
/// The shape matches the synchronous client: [`FujitsuAC::poll`] performs
/// one cooperative iteration (receive, classify, guard-gated transmit)
/// and is meant to be driven from the host's own loop or task.
pub struct FujitsuAC {
    serial: tokio_serial::SerialStream,
    session: Session,
    io_timeout: Duration,
}

impl FujitsuAC {
    /// Opens `port` with the bus parameters (500 baud, 8E1) and starts a
    /// session in the given role.
    pub fn connect(port: &str, role: Role) -> Result<Self> {
        let serial = tokio_serial::new(port, BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::Even)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;
        log::info!("connected to {} as {:?} controller", port, role);
        Ok(Self {
            serial,
            session: Session::new(role),
            io_timeout: Duration::from_millis(200),
        })
    }

    /// Timeout for individual read operations while waiting for a frame.
    pub fn set_io_timeout(&mut self, timeout: Duration) {
        self.io_timeout = timeout;
    }

    /// One cooperative iteration: reset on liveness failure, wait up to
    /// the I/O timeout for an inbound frame, and transmit a queued reply
    /// once the guard interval allows. Returns `true` if a frame was
    /// received.
    pub async fn poll(&mut self) -> Result<bool> {
        if self.session.is_timed_out(Instant::now()) {
            log::info!("no frame addressed to us within timeout, resetting connection");
            self.reset_connection();
        }

        let mut received = false;
        let mut buf = [0u8; FRAME_LENGTH];
        match tokio::time::timeout(self.io_timeout, self.serial.read_exact(&mut buf)).await {
            Ok(Ok(_)) => {
                log::trace!("received {:02X?}", buf);
                self.session.on_frame(&buf, Instant::now());
                received = true;
            }
            Ok(Err(err)) => return Err(err.into()),
            // No (complete) frame within the window; partial reads are
            // abandoned, the unit will poll again shortly.
            Err(_elapsed) => {}
        }

        if self.session.on_tick(Instant::now()).is_none() && received {
            // The reply may still be inside the guard interval; wait it
            // out rather than spinning the caller.
            tokio::time::sleep(MIN_TX_DELAY).await;
        }
        if let Some(tx) = self.session.on_tick(Instant::now()) {
            tokio::time::timeout(self.io_timeout, self.serial.write_all(&tx)).await??;
            tokio::time::timeout(self.io_timeout, self.serial.flush()).await??;
            log::trace!("transmitted {:02X?}", tx);

            // Read back our own echoed bytes so the next poll does not
            // process our transmission as an inbound frame.
            let mut echo = [0u8; FRAME_LENGTH];
            if let Ok(Err(err)) =
                tokio::time::timeout(self.io_timeout, self.serial.read_exact(&mut echo)).await
            {
                log::trace!("echo readback failed: {}", err);
            }
        }

        Ok(received)
    }

    /// Clears the session's login/discovery state. Cached settings
    /// survive.
    pub fn reset_connection(&mut self) {
        self.session.reset();
    }

    pub fn set_receive_timeout(&mut self, timeout: Duration) {
        self.session.set_receive_timeout(timeout);
    }

    pub fn is_bound(&self) -> bool {
        self.session.is_bound(Instant::now())
    }

    pub fn update_pending(&self) -> bool {
        self.session.update_pending()
    }

    /// Access to the session for state readout and staging setting
    /// changes.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}
