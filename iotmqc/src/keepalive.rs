use std::time::Duration;

use tokio::time::Instant;

/// What the connection has to do about keep-alive right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// Send a PINGREQ
    Ping,
    /// Nothing heard from the broker for one and a half intervals
    Expired,
    Wait,
}

/// Tracks traffic on a connection and decides when to ping.
///
/// Pure bookkeeping, the event loop feeds it timestamps and sends the pings.
#[derive(Debug)]
pub(crate) struct KeepAlive {
    /// Zero disables keep-alive
    interval: Duration,
    last_sent: Instant,
    last_received: Instant,
    ping_outstanding: bool,
}

impl KeepAlive {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_sent: now,
            last_received: now,
            ping_outstanding: false,
        }
    }

    /// Starts over for a fresh connection
    pub fn reset(&mut self, now: Instant) {
        self.last_sent = now;
        self.last_received = now;
        self.ping_outstanding = false;
    }

    fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    fn expiry(&self) -> Instant {
        self.last_received + self.interval + self.interval / 2
    }

    pub fn poll(&self, now: Instant) -> Tick {
        if !self.enabled() {
            return Tick::Wait;
        }

        if now >= self.expiry() {
            return Tick::Expired;
        }

        if !self.ping_outstanding
            && (now >= self.last_sent + self.interval || now >= self.last_received + self.interval)
        {
            return Tick::Ping;
        }

        Tick::Wait
    }

    /// Next instant at which [`KeepAlive::poll`] may return something other than `Wait`
    pub fn deadline(&self) -> Option<Instant> {
        if !self.enabled() {
            return None;
        }

        if self.ping_outstanding {
            return Some(self.expiry());
        }

        let idle = self.last_sent.min(self.last_received) + self.interval;
        Some(idle.min(self.expiry()))
    }

    /// A packet was written
    pub fn sent(&mut self, now: Instant) {
        self.last_sent = now;
    }

    pub fn ping_sent(&mut self, now: Instant) {
        self.last_sent = now;
        self.ping_outstanding = true;
    }

    /// A packet was read. Any packet proves the broker alive, but only a
    /// PINGRESP answers the outstanding ping.
    pub fn received(&mut self, now: Instant, pingresp: bool) {
        self.last_received = now;
        if pingresp {
            self.ping_outstanding = false;
        }
    }
}
