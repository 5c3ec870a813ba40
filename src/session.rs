//! Session logic for the wired remote bus: classifies inbound frames,
//! derives replies according to the login/negotiation phase, merges
//! pending user-requested setting changes and gates transmission.
//!
//! Everything here is sans-IO. The transport clients feed raw bytes into
//! [`Session::on_frame`] and poll [`Session::on_tick`] with a monotonic
//! timestamp; no blocking, no clock access of its own.

use crate::protocol::{
    invert, AcMode, Address, ControlFrame, FanMode, MessageType, BOUND_WINDOW,
    DEFAULT_RECEIVE_TIMEOUT, FRAME_LENGTH, MIN_TX_DELAY,
};
use std::time::{Duration, Instant};

/// Which of the two wired-remote slots this controller occupies. Exactly
/// one primary and at most one secondary may be active per bus; the role
/// is fixed at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    pub fn address(self) -> u8 {
        match self {
            Role::Primary => Address::Primary as u8,
            Role::Secondary => Address::Secondary as u8,
        }
    }
}

const ON_OFF_UPDATE: u8 = 0b1000_0000;
const TEMP_UPDATE: u8 = 0b0100_0000;
const MODE_UPDATE: u8 = 0b0010_0000;
const FAN_MODE_UPDATE: u8 = 0b0001_0000;
const ECONOMY_MODE_UPDATE: u8 = 0b0000_1000;
const SWING_MODE_UPDATE: u8 = 0b0000_0100;
const SWING_STEP_UPDATE: u8 = 0b0000_0010;

/// Write-coalescing buffer: at most one outstanding desired value per
/// controllable field, last writer wins. Cleared atomically once the
/// values have been embedded into an outgoing frame.
#[derive(Debug, Default)]
pub struct PendingUpdates {
    fields: u8,
    values: ControlFrame,
}

impl PendingUpdates {
    pub fn set_on_off(&mut self, on: bool) {
        self.fields |= ON_OFF_UPDATE;
        self.values.on_off = on;
    }

    pub fn set_temp(&mut self, raw: u8) {
        self.fields |= TEMP_UPDATE;
        self.values.temperature = raw;
    }

    pub fn set_mode(&mut self, mode: AcMode) {
        self.fields |= MODE_UPDATE;
        self.values.ac_mode = mode;
    }

    pub fn set_fan_mode(&mut self, fan: FanMode) {
        self.fields |= FAN_MODE_UPDATE;
        self.values.fan_mode = fan;
    }

    pub fn set_economy_mode(&mut self, economy: bool) {
        self.fields |= ECONOMY_MODE_UPDATE;
        self.values.economy_mode = economy;
    }

    pub fn set_swing_mode(&mut self, swing: bool) {
        self.fields |= SWING_MODE_UPDATE;
        self.values.swing_mode = swing;
    }

    pub fn set_swing_step(&mut self, step: bool) {
        self.fields |= SWING_STEP_UPDATE;
        self.values.swing_step = step;
    }

    pub fn has_pending(&self) -> bool {
        self.fields != 0
    }

    /// Overwrites every dirty field of `frame` with its staged value,
    /// then clears all dirty flags. Call exactly once per transmitted
    /// write frame.
    pub fn apply_and_clear(&mut self, frame: &mut ControlFrame) {
        if self.fields & ON_OFF_UPDATE != 0 {
            frame.on_off = self.values.on_off;
        }
        if self.fields & TEMP_UPDATE != 0 {
            frame.temperature = self.values.temperature;
        }
        if self.fields & MODE_UPDATE != 0 {
            frame.ac_mode = self.values.ac_mode;
        }
        if self.fields & FAN_MODE_UPDATE != 0 {
            frame.fan_mode = self.values.fan_mode;
        }
        if self.fields & SWING_MODE_UPDATE != 0 {
            frame.swing_mode = self.values.swing_mode;
        }
        if self.fields & SWING_STEP_UPDATE != 0 {
            frame.swing_step = self.values.swing_step;
        }
        if self.fields & ECONOMY_MODE_UPDATE != 0 {
            frame.economy_mode = self.values.economy_mode;
        }
        self.fields = 0;
    }
}

/// State machine for one bus connection.
///
/// Drive it with `on_frame` for every chunk of received bytes and
/// `on_tick` whenever the host loop comes around; `on_tick` hands out
/// the queued reply once the post-receive guard interval has elapsed.
#[derive(Debug)]
pub struct Session {
    role: Role,
    address: u8,
    logged_in: bool,
    seen_secondary: bool,
    last_frame_received: Option<Instant>,
    receive_timeout: Duration,
    current: ControlFrame,
    updates: PendingUpdates,
    pending_tx: Option<[u8; FRAME_LENGTH]>,
}

impl Session {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            address: role.address(),
            logged_in: false,
            seen_secondary: false,
            last_frame_received: None,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            current: ControlFrame::default(),
            updates: PendingUpdates::default(),
            pending_tx: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn set_receive_timeout(&mut self, timeout: Duration) {
        self.receive_timeout = timeout;
    }

    /// Processes one inbound read. Short reads (partial or corrupted
    /// frames) are dropped without touching any state. Returns `true`
    /// if a reply was queued for transmission.
    pub fn on_frame(&mut self, raw: &[u8], now: Instant) -> bool {
        if raw.len() < FRAME_LENGTH {
            log::trace!("skipping incomplete frame ({} bytes)", raw.len());
            return false;
        }

        let mut buf = [0u8; FRAME_LENGTH];
        buf.copy_from_slice(&raw[..FRAME_LENGTH]);
        invert(&mut buf);
        let frame = ControlFrame::decode(&buf);
        log::trace!("<-- {:02X?}  {}", buf, frame);

        if frame.message_dest == self.address {
            self.last_frame_received = Some(now);

            let reply = match frame.message_type {
                MessageType::Status => Some(self.build_status_reply(&frame)),
                MessageType::Login => Some(self.build_login_reply()),
                MessageType::Error => {
                    log::warn!("unit reported error: {}", frame);
                    None
                }
                MessageType::Unknown => {
                    log::warn!("dropping frame with reserved message type: {}", frame);
                    None
                }
            };

            if let Some(reply) = reply {
                let mut out = reply.encode();
                log::trace!("--> {:02X?}  {}", out, reply);
                invert(&mut out);
                self.pending_tx = Some(out);
                return true;
            }
        } else if frame.message_dest == Address::Secondary as u8 && self.role != Role::Secondary {
            // Passive observation only. The primary typically has no
            // temperature sensor of its own, so adopt the reading the
            // secondary remote reports.
            if !self.seen_secondary {
                log::debug!("secondary controller discovered on the bus");
            }
            self.seen_secondary = true;
            self.current.controller_temp = frame.controller_temp;
        }

        false
    }

    /// Steady-state STATUS exchange, first-contact announce, or the fixed
    /// secondary-role shape, plus the pending-update merge.
    fn build_status_reply(&mut self, frame: &ControlFrame) -> ControlFrame {
        let mut reply = *frame;
        reply.message_source = self.address;

        if frame.controller_present {
            // The indoor unit already acknowledges us; the bulk of bus
            // traffic is this exchange.
            self.logged_in = true;

            if self.seen_secondary {
                reply.message_dest = Address::Secondary as u8;
                reply.login_bit = true;
                reply.controller_present = false;
            } else {
                reply.message_dest = Address::Unit as u8;
                reply.login_bit = false;
                reply.controller_present = true;
            }
            reply.update_magic = 0;
            reply.unknown_bit = true;
            reply.write_bit = false;
            reply.message_type = MessageType::Status;
        } else if self.role == Role::Primary {
            // First contact: announce ourselves to the indoor unit.
            log::info!("logging in to indoor unit");
            reply.message_dest = Address::Unit as u8;
            reply.login_bit = false;
            reply.controller_present = false;
            reply.update_magic = 0;
            reply.unknown_bit = true;
            reply.write_bit = false;
            reply.message_type = MessageType::Login;

            reply.on_off = false;
            reply.temperature = 0;
            reply.ac_mode = AcMode::Unknown;
            reply.fan_mode = FanMode::Auto;
            reply.swing_mode = false;
            reply.swing_step = false;
            reply.economy_mode = false;
            reply.ac_error = 0;
        } else {
            // The secondary is only ever queried with STATUS frames and
            // answers with the same shape no matter what; update magic 2
            // is the sentinel observed from real secondary remotes.
            reply.message_dest = Address::Unit as u8;
            reply.login_bit = false;
            reply.controller_present = true;
            reply.update_magic = 2;
            reply.unknown_bit = true;
            reply.write_bit = false;
        }

        if self.updates.has_pending() {
            reply.write_bit = true;
            self.updates.apply_and_clear(&mut reply);
        }

        // Believed live settings, updated optimistically to what we are
        // about to transmit rather than a unit-confirmed value.
        self.current = reply;

        reply
    }

    /// The primary probes for a secondary controller with LOGIN frames;
    /// an echo means one answered. Keep it synchronized with the last
    /// known settings without consuming our own pending updates.
    fn build_login_reply(&self) -> ControlFrame {
        let mut reply = ControlFrame {
            message_source: self.address,
            message_dest: Address::Secondary as u8,
            message_type: MessageType::Login,
            login_bit: true,
            controller_present: true,
            update_magic: 0,
            unknown_bit: true,
            write_bit: false,
            ..ControlFrame::default()
        };

        reply.on_off = self.current.on_off;
        reply.temperature = self.current.temperature;
        reply.ac_mode = self.current.ac_mode;
        reply.fan_mode = self.current.fan_mode;
        reply.swing_mode = self.current.swing_mode;
        reply.swing_step = self.current.swing_step;
        reply.ac_error = self.current.ac_error;

        reply
    }

    /// Returns the queued wire frame once at least [`MIN_TX_DELAY`] has
    /// elapsed since the last receive, `None` otherwise.
    pub fn on_tick(&mut self, now: Instant) -> Option<[u8; FRAME_LENGTH]> {
        let last = self.last_frame_received?;
        if self.pending_tx.is_some() && now.duration_since(last) >= MIN_TX_DELAY {
            return self.pending_tx.take();
        }
        None
    }

    /// Liveness indicator for external collaborators: a frame addressed
    /// to us arrived within the last second.
    pub fn is_bound(&self, now: Instant) -> bool {
        self.last_frame_received
            .map(|last| now.duration_since(last) < BOUND_WINDOW)
            .unwrap_or(false)
    }

    /// True once the configured receive timeout has passed without a
    /// frame addressed to us. Never true before the first frame; there
    /// is no conversation to reset yet.
    pub fn is_timed_out(&self, now: Instant) -> bool {
        self.last_frame_received
            .map(|last| now.duration_since(last) >= self.receive_timeout)
            .unwrap_or(false)
    }

    /// Clears the login/discovery state and any queued reply. The cached
    /// settings and staged updates survive; only liveness resets.
    pub fn reset(&mut self) {
        log::debug!("resetting session state");
        self.logged_in = false;
        self.seen_secondary = false;
        self.last_frame_received = None;
        self.pending_tx = None;
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn seen_secondary(&self) -> bool {
        self.seen_secondary
    }

    /// The latest fully-merged frame reflecting the unit's believed live
    /// settings.
    pub fn current_state(&self) -> &ControlFrame {
        &self.current
    }

    pub fn update_pending(&self) -> bool {
        self.updates.has_pending()
    }

    pub fn set_on_off(&mut self, on: bool) {
        self.updates.set_on_off(on);
    }

    pub fn set_temp(&mut self, raw: u8) {
        self.updates.set_temp(raw);
    }

    pub fn set_mode(&mut self, mode: AcMode) {
        self.updates.set_mode(mode);
    }

    pub fn set_fan_mode(&mut self, fan: FanMode) {
        self.updates.set_fan_mode(fan);
    }

    pub fn set_economy_mode(&mut self, economy: bool) {
        self.updates.set_economy_mode(economy);
    }

    pub fn set_swing_mode(&mut self, swing: bool) {
        self.updates.set_swing_mode(swing);
    }

    pub fn set_swing_step(&mut self, step: bool) {
        self.updates.set_swing_step(step);
    }

    pub fn get_on_off(&self) -> bool {
        self.current.on_off
    }

    pub fn get_temp(&self) -> u8 {
        self.current.temperature
    }

    pub fn get_mode(&self) -> AcMode {
        self.current.ac_mode
    }

    pub fn get_fan_mode(&self) -> FanMode {
        self.current.fan_mode
    }

    pub fn get_economy_mode(&self) -> bool {
        self.current.economy_mode
    }

    pub fn get_swing_mode(&self) -> bool {
        self.current.swing_mode
    }

    pub fn get_swing_step(&self) -> bool {
        self.current.swing_step
    }

    pub fn get_controller_temp(&self) -> u8 {
        self.current.controller_temp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(frame: &ControlFrame) -> [u8; FRAME_LENGTH] {
        let mut buf = frame.encode();
        invert(&mut buf);
        buf
    }

    fn unwire(buf: &[u8; FRAME_LENGTH]) -> ControlFrame {
        let mut copy = *buf;
        invert(&mut copy);
        ControlFrame::decode(&copy)
    }

    fn status_to_primary(controller_present: bool) -> ControlFrame {
        ControlFrame {
            message_source: Address::Unit as u8,
            message_dest: Address::Primary as u8,
            message_type: MessageType::Status,
            login_bit: true, // bit 5 of the primary address
            controller_present,
            temperature: 40,
            ac_mode: AcMode::Cool,
            fan_mode: FanMode::Medium,
            on_off: true,
            ..ControlFrame::default()
        }
    }

    fn reply_after_guard(session: &mut Session, start: Instant) -> ControlFrame {
        assert_eq!(session.on_tick(start + MIN_TX_DELAY / 2), None);
        let out = session
            .on_tick(start + MIN_TX_DELAY)
            .expect("reply should be released after the guard interval");
        unwire(&out)
    }

    #[test]
    fn first_contact_produces_login_announce() {
        let mut session = Session::new(Role::Primary);
        let t0 = Instant::now();

        assert!(session.on_frame(&wire(&status_to_primary(false)), t0));
        let reply = reply_after_guard(&mut session, t0);

        assert_eq!(reply.message_type, MessageType::Login);
        assert_eq!(reply.message_source, Address::Primary as u8);
        assert_eq!(reply.message_dest, Address::Unit as u8);
        assert!(!reply.controller_present);
        assert!(!reply.login_bit);
        assert!(!reply.on_off);
        assert_eq!(reply.temperature, 0);
        assert_eq!(reply.ac_mode, AcMode::Unknown);
        assert_eq!(reply.fan_mode, FanMode::Auto);
        assert!(!reply.economy_mode);
        assert!(!reply.swing_mode);
        assert!(!reply.swing_step);
        assert_eq!(reply.ac_error, 0);
    }

    #[test]
    fn steady_state_status_echo() {
        let mut session = Session::new(Role::Primary);
        let t0 = Instant::now();

        assert!(session.on_frame(&wire(&status_to_primary(true)), t0));
        let reply = reply_after_guard(&mut session, t0);

        assert_eq!(reply.message_type, MessageType::Status);
        assert_eq!(reply.message_dest, Address::Unit as u8);
        assert!(reply.controller_present);
        assert!(!reply.login_bit);
        assert!(!reply.write_bit);
        assert!(reply.unknown_bit);
        assert_eq!(reply.update_magic, 0);
        // Operating fields echo the unit's report.
        assert!(reply.on_off);
        assert_eq!(reply.temperature, 40);
        assert_eq!(reply.ac_mode, AcMode::Cool);
        assert!(session.is_logged_in());
    }

    #[test]
    fn status_reply_redirects_to_seen_secondary() {
        let mut session = Session::new(Role::Primary);
        let t0 = Instant::now();

        // A frame addressed to the secondary is observed passively.
        let passive = ControlFrame {
            message_source: Address::Unit as u8,
            message_dest: Address::Secondary as u8,
            message_type: MessageType::Status,
            login_bit: true,
            controller_temp: 21,
            ..ControlFrame::default()
        };
        assert!(!session.on_frame(&wire(&passive), t0));
        assert!(session.seen_secondary());
        assert_eq!(session.get_controller_temp(), 21);
        assert_eq!(session.on_tick(t0 + MIN_TX_DELAY * 2), None);

        assert!(session.on_frame(&wire(&status_to_primary(true)), t0));
        let reply = reply_after_guard(&mut session, t0);

        assert_eq!(reply.message_dest, Address::Secondary as u8);
        assert!(reply.login_bit);
        assert!(!reply.controller_present);
    }

    #[test]
    fn secondary_role_reply_shape() {
        let mut session = Session::new(Role::Secondary);
        let t0 = Instant::now();

        let query = ControlFrame {
            message_source: Address::Unit as u8,
            message_dest: Address::Secondary as u8,
            message_type: MessageType::Status,
            login_bit: true,
            controller_present: false,
            temperature: 36,
            ..ControlFrame::default()
        };
        assert!(session.on_frame(&wire(&query), t0));
        let reply = reply_after_guard(&mut session, t0);

        assert_eq!(reply.message_type, MessageType::Status);
        assert_eq!(reply.message_dest, Address::Unit as u8);
        assert!(reply.controller_present);
        assert_eq!(reply.update_magic, 2);
        assert!(!reply.login_bit);
        assert_eq!(reply.temperature, 36);
    }

    #[test]
    fn login_echo_synchronizes_secondary() {
        let mut session = Session::new(Role::Primary);
        let t0 = Instant::now();

        // Establish current settings through a steady-state exchange.
        assert!(session.on_frame(&wire(&status_to_primary(true)), t0));
        let _ = session.on_tick(t0 + MIN_TX_DELAY);

        let t1 = t0 + Duration::from_millis(500);
        let login_echo = ControlFrame {
            message_source: Address::Secondary as u8,
            message_dest: Address::Primary as u8,
            message_type: MessageType::Login,
            login_bit: true,
            ..ControlFrame::default()
        };
        assert!(session.on_frame(&wire(&login_echo), t1));
        let reply = reply_after_guard(&mut session, t1);

        assert_eq!(reply.message_type, MessageType::Login);
        assert_eq!(reply.message_dest, Address::Secondary as u8);
        assert!(reply.login_bit);
        assert!(reply.controller_present);
        // Operating fields come from the cached current state.
        assert!(reply.on_off);
        assert_eq!(reply.temperature, 40);
        assert_eq!(reply.ac_mode, AcMode::Cool);
        assert_eq!(reply.fan_mode, FanMode::Medium);
    }

    #[test]
    fn error_frame_is_dropped() {
        let mut session = Session::new(Role::Primary);
        let t0 = Instant::now();

        let error = ControlFrame {
            message_source: Address::Unit as u8,
            message_dest: Address::Primary as u8,
            message_type: MessageType::Error,
            login_bit: true,
            ac_error: 1,
            ..ControlFrame::default()
        };
        assert!(!session.on_frame(&wire(&error), t0));
        assert_eq!(session.on_tick(t0 + MIN_TX_DELAY * 2), None);
        assert!(!session.is_logged_in());
        // The frame still counts for liveness.
        assert!(session.is_bound(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn frames_for_other_destinations_are_ignored() {
        let mut session = Session::new(Role::Primary);
        let t0 = Instant::now();

        let other = ControlFrame {
            message_source: Address::Secondary as u8,
            message_dest: Address::Unit as u8,
            message_type: MessageType::Status,
            controller_present: true,
            ..ControlFrame::default()
        };
        assert!(!session.on_frame(&wire(&other), t0));
        assert_eq!(session.on_tick(t0 + MIN_TX_DELAY * 2), None);
        assert!(!session.is_bound(t0));
        assert!(!session.seen_secondary());
    }

    #[test]
    fn short_read_is_dropped_silently() {
        let mut session = Session::new(Role::Primary);
        let t0 = Instant::now();

        assert!(!session.on_frame(&[0xFF, 0x00, 0x12], t0));
        assert!(!session.is_bound(t0));
        assert_eq!(session.on_tick(t0 + MIN_TX_DELAY * 2), None);
    }

    #[test]
    fn staged_updates_coalesce_and_merge() {
        let mut session = Session::new(Role::Primary);
        let t0 = Instant::now();

        session.set_temp(20);
        session.set_temp(22); // last writer wins
        session.set_on_off(true);
        assert!(session.update_pending());

        assert!(session.on_frame(&wire(&status_to_primary(true)), t0));
        // Pending flags clear as soon as the reply is built.
        assert!(!session.update_pending());

        let reply = reply_after_guard(&mut session, t0);
        assert!(reply.write_bit);
        assert_eq!(reply.temperature, 22);
        assert!(reply.on_off);
        // The merged frame became the believed current state.
        assert_eq!(session.get_temp(), 22);
    }

    #[test]
    fn guard_interval_gates_transmit() {
        let mut session = Session::new(Role::Primary);
        let t0 = Instant::now();

        assert!(session.on_frame(&wire(&status_to_primary(true)), t0));
        assert_eq!(session.on_tick(t0), None);
        assert_eq!(session.on_tick(t0 + Duration::from_millis(49)), None);
        assert!(session.on_tick(t0 + Duration::from_millis(50)).is_some());
        // Queue is drained after one successful tick.
        assert_eq!(session.on_tick(t0 + Duration::from_millis(60)), None);
    }

    #[test]
    fn timeout_and_reset_clear_liveness_but_keep_state() {
        let mut session = Session::new(Role::Primary);
        let t0 = Instant::now();

        // Nothing received yet: no timeout, no binding.
        assert!(!session.is_timed_out(t0));
        assert!(!session.is_bound(t0));

        assert!(session.on_frame(&wire(&status_to_primary(true)), t0));
        let passive = ControlFrame {
            message_dest: Address::Secondary as u8,
            message_type: MessageType::Status,
            login_bit: true,
            controller_temp: 19,
            ..ControlFrame::default()
        };
        session.on_frame(&wire(&passive), t0);
        assert!(session.seen_secondary());
        session.set_temp(24);

        assert!(session.is_bound(t0 + Duration::from_millis(999)));
        assert!(!session.is_bound(t0 + Duration::from_millis(1000)));
        assert!(!session.is_timed_out(t0 + Duration::from_millis(1999)));
        assert!(session.is_timed_out(t0 + Duration::from_millis(2000)));

        session.reset();
        assert!(!session.seen_secondary());
        assert!(!session.is_logged_in());
        assert!(!session.is_bound(t0));
        // Cached settings and staged updates survive the reset.
        assert_eq!(session.get_controller_temp(), 19);
        assert!(session.update_pending());
    }

    #[test]
    fn reserved_message_type_is_dropped() {
        let mut session = Session::new(Role::Primary);
        let t0 = Instant::now();

        let mut raw = ControlFrame {
            message_dest: Address::Primary as u8,
            login_bit: true,
            ..ControlFrame::default()
        }
        .encode();
        raw[2] |= 0b0011_0000; // reserved type 3
        invert(&mut raw);

        assert!(!session.on_frame(&raw, t0));
        assert_eq!(session.on_tick(t0 + MIN_TX_DELAY * 2), None);
    }

    #[test]
    fn configurable_receive_timeout() {
        let mut session = Session::new(Role::Primary);
        session.set_receive_timeout(Duration::from_millis(500));
        let t0 = Instant::now();

        session.on_frame(&wire(&status_to_primary(true)), t0);
        assert!(!session.is_timed_out(t0 + Duration::from_millis(499)));
        assert!(session.is_timed_out(t0 + Duration::from_millis(500)));
    }
}
