//! Synchronous transport client built on the `serialport` crate.
//!
//! The bus is half duplex with no arbitration, so the client never
//! transmits on its own schedule: it polls for inbound frames, lets the
//! [`Session`] compute a reply, and releases it only after the
//! post-receive guard interval. Call [`FujitsuAC::poll`] from the host's
//! own loop; every call performs at most one receive and one transmit.

use crate::protocol::{BAUD_RATE, FRAME_LENGTH};
use crate::session::{Role, Session};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Errors specific to the synchronous serial port client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error originating from the protocol/session library.
    #[error("protocol error: {0}")]
    Protocol(#[from] crate::Error),
    /// An error from the `serialport` crate.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    /// An I/O error, typically from the serial port communication.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for operations within this module.
type Result<T> = std::result::Result<T, Error>;

/// Synchronous wired-remote controller attached to a serial port.
pub struct FujitsuAC {
    serial: Box<dyn serialport::SerialPort>,
    session: Session,
}

impl FujitsuAC {
    /// Opens `port` with the bus parameters (500 baud, 8E1) and starts a
    /// session in the given role.
    pub fn connect(port: &str, role: Role) -> Result<Self> {
        let serial = serialport::new(port, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::Even)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(200))
            .open()?;
        log::info!("connected to {} as {:?} controller", port, role);
        Ok(Self {
            serial,
            session: Session::new(role),
        })
    }

    /// One cooperative iteration: reset on liveness failure, read an
    /// inbound frame if one is available, and transmit a queued reply
    /// once the guard interval allows. Returns `true` if a frame was
    /// received.
    pub fn poll(&mut self) -> Result<bool> {
        if self.session.is_timed_out(Instant::now()) {
            log::info!("no frame addressed to us within timeout, resetting connection");
            self.reset_connection()?;
        }

        let mut received = false;
        if self.serial.bytes_to_read()? > 0 {
            match self.receive_frame() {
                Ok(buf) => {
                    self.session.on_frame(&buf, Instant::now());
                    received = true;
                }
                Err(Error::Protocol(crate::Error::ShortFrame { received: got, .. })) => {
                    log::trace!("dropping incomplete frame ({} bytes)", got);
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(tx) = self.session.on_tick(Instant::now()) {
            self.serial.write_all(&tx)?;
            self.serial.flush()?;
            log::trace!("transmitted {:02X?}", tx);

            // Read back our own echoed bytes so the next poll does not
            // process our transmission as an inbound frame.
            let mut echo = [0u8; FRAME_LENGTH];
            if let Err(err) = self.serial.read_exact(&mut echo) {
                log::trace!("echo readback failed: {}", err);
            }
        }

        Ok(received)
    }

    fn receive_frame(&mut self) -> Result<[u8; FRAME_LENGTH]> {
        let mut buf = [0u8; FRAME_LENGTH];
        let mut filled = 0;
        while filled < FRAME_LENGTH {
            match self.serial.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => break,
                Err(err) => return Err(err.into()),
            }
        }
        if filled < FRAME_LENGTH {
            return Err(crate::Error::ShortFrame {
                expected: FRAME_LENGTH,
                received: filled,
            }
            .into());
        }
        log::trace!("received {:02X?}", buf);
        Ok(buf)
    }

    /// Flushes the port buffers and clears the session's login/discovery
    /// state. Cached settings survive.
    pub fn reset_connection(&mut self) -> Result<()> {
        self.serial.clear(serialport::ClearBuffer::All)?;
        self.session.reset();
        Ok(())
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
