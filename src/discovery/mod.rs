//! Discovery targets and reconnect supervision.
//!
//! The [`ConnectionManager`] keeps the amplifier and pedal sessions up:
//! every pump it notices link loss, waits out a bounded exponential
//! backoff and retries `connect`. It never touches ring buffers; the
//! bridge flushes stale data when a session's epoch changes.

pub mod adv_parser;
pub mod backoff;

use crate::error::Error;
use crate::link::{Role, Transport, TransportSession};
use backoff::{Backoff, BackoffConfig};

/// How a peer is recognised in advertising data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceMatch {
    /// Exact Complete or Shortened Local Name.
    Name(&'static str),
    Service16(u16),
    Service128(u128),
}

impl DeviceMatch {
    pub fn matches_advertisement(&self, data: &[u8]) -> bool {
        match *self {
            DeviceMatch::Name(name) => adv_parser::local_name(data) == Some(name),
            DeviceMatch::Service16(uuid) => adv_parser::contains_service_uuid16(data, uuid),
            DeviceMatch::Service128(uuid) => adv_parser::contains_service_uuid128(data, uuid),
        }
    }
}

/// A peer to look for on behalf of one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Target {
    pub role: Role,
    pub matcher: DeviceMatch,
}

impl Target {
    pub const fn new(role: Role, matcher: DeviceMatch) -> Self {
        Self { role, matcher }
    }
}

/// Outcome of one [`ConnectionManager::service`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    /// The role has no target.
    Unsupervised,
    /// Connected, nothing to do.
    Steady,
    /// Disconnected, backoff not yet elapsed.
    Waiting,
    /// `connect` succeeded on this call.
    Established,
    /// The link dropped since the last call.
    Lost,
    /// `connect` failed; retry scheduled.
    Failed(Error),
}

#[derive(Debug, Clone, Copy)]
struct Supervisor {
    target: Option<Target>,
    backoff: Backoff,
    next_attempt_ms: u64,
}

impl Supervisor {
    fn new(config: BackoffConfig) -> Self {
        Self {
            target: None,
            backoff: Backoff::new(config),
            next_attempt_ms: 0,
        }
    }
}

/// Per-role reconnect supervision for the outward (client-role) links.
pub struct ConnectionManager {
    amplifier: Supervisor,
    pedal: Supervisor,
}

impl ConnectionManager {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            amplifier: Supervisor::new(backoff),
            pedal: Supervisor::new(backoff),
        }
    }

    /// Supervise `targets` from `now_ms` on. The first attempt is immediate.
    pub fn begin(&mut self, targets: &[Target], now_ms: u64) {
        for target in targets {
            let Some(sup) = self.supervisor_mut(target.role) else {
                warn!("ignoring discovery target for {}", target.role);
                continue;
            };
            info!("supervising {}: {}", target.role, target.matcher);
            sup.target = Some(*target);
            sup.backoff.reset();
            sup.next_attempt_ms = now_ms;
        }
    }

    pub fn is_supervising(&self, role: Role) -> bool {
        self.supervisor(role).is_some_and(|s| s.target.is_some())
    }

    /// Earliest time of the next connect attempt for `role`.
    pub fn next_attempt_ms(&self, role: Role) -> Option<u64> {
        self.supervisor(role)
            .filter(|s| s.target.is_some())
            .map(|s| s.next_attempt_ms)
    }

    /// Keep `session` connected to its role's target.
    pub async fn service<T: Transport>(
        &mut self,
        session: &mut TransportSession<'_, T>,
        now_ms: u64,
    ) -> LinkEvent {
        let Some(sup) = self.supervisor_mut(session.role()) else {
            return LinkEvent::Unsupervised;
        };
        let Some(target) = sup.target else {
            return LinkEvent::Unsupervised;
        };

        if session.check_link() {
            sup.backoff.reset();
            sup.next_attempt_ms = now_ms + sup.backoff.next_delay();
            return LinkEvent::Lost;
        }
        if session.is_connected() {
            return LinkEvent::Steady;
        }
        if now_ms < sup.next_attempt_ms {
            return LinkEvent::Waiting;
        }

        match session.connect(&target).await {
            Ok(()) => {
                sup.backoff.reset();
                LinkEvent::Established
            }
            Err(e) => {
                let delay = sup.backoff.next_delay();
                sup.next_attempt_ms = now_ms + delay;
                debug!("{}: retry in {} ms", target.role, delay);
                LinkEvent::Failed(e)
            }
        }
    }

    fn supervisor(&self, role: Role) -> Option<&Supervisor> {
        match role {
            Role::Amplifier => Some(&self.amplifier),
            Role::Pedal => Some(&self.pedal),
            Role::App => None,
        }
    }

    fn supervisor_mut(&mut self, role: Role) -> Option<&mut Supervisor> {
        match role {
            Role::Amplifier => Some(&mut self.amplifier),
            Role::Pedal => Some(&mut self.pedal),
            Role::App => None,
        }
    }
}
