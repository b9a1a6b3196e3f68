use std::time::Duration;

use log::{debug, warn};

use crate::{
    time::tick_config::TickConfig,
    types::{HostType, Tick},
};

/// How a client step moved its local tick relative to the server estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAdjustment {
    /// On target, advanced by one tick
    None,
    /// Behind target, advanced by two ticks
    SpeedUp,
    /// Ahead of target, held for one step
    SlowDown,
    /// Too far behind, jumped straight to the target
    HardReset,
}

/// Fixed-step logical clock.
///
/// On a server the local tick is authoritative. On a client the manager keeps
/// an estimate of the server tick (last received tick plus steps elapsed since)
/// and steers the local tick toward that estimate plus a small lead, without
/// ever moving it backwards.
pub struct TimeManager {
    host_type: HostType,
    config: TickConfig,
    local_tick: Tick,
    accumulator: Duration,
    last_server_tick: Option<Tick>,
    steps_since_server_tick: u32,
}

impl TimeManager {
    pub fn new(host_type: HostType, config: TickConfig) -> Self {
        Self {
            host_type,
            config,
            local_tick: 0,
            accumulator: Duration::ZERO,
            last_server_tick: None,
            steps_since_server_tick: 0,
        }
    }

    pub fn host_type(&self) -> HostType {
        self.host_type
    }

    /// Switches mode and restarts the clock
    pub fn set_host_type(&mut self, host_type: HostType) {
        self.host_type = host_type;
        self.reset();
    }

    pub fn config(&self) -> &TickConfig {
        &self.config
    }

    /// Advances by one fixed step
    pub fn advance_one_tick(&mut self) -> TickAdjustment {
        if self.host_type == HostType::Server {
            self.local_tick = self.local_tick.saturating_add(1);
            return TickAdjustment::None;
        }

        self.steps_since_server_tick = self.steps_since_server_tick.saturating_add(1);
        let next = self.local_tick.saturating_add(1);
        let Some(target) = self.target_tick() else {
            self.local_tick = next;
            return TickAdjustment::None;
        };

        let behind_by = i64::from(target) - i64::from(next);
        if behind_by > i64::from(self.config.hard_reset_threshold) {
            debug!(
                "Client tick {} is {} ticks behind target {}, jumping",
                self.local_tick, behind_by, target
            );
            self.local_tick = target;
            TickAdjustment::HardReset
        } else if behind_by > 0 {
            self.local_tick = self.local_tick.saturating_add(2);
            TickAdjustment::SpeedUp
        } else if behind_by < 0 {
            TickAdjustment::SlowDown
        } else {
            self.local_tick = next;
            TickAdjustment::None
        }
    }

    /// Accumulates `delta` and advances by every whole tick it covers, at most
    /// `max_catch_up_ticks`. Returns the number of ticks advanced.
    pub fn advance(&mut self, delta: Duration) -> u32 {
        let interval = self.config.tick_interval;
        if interval.is_zero() {
            self.advance_one_tick();
            return 1;
        }

        self.accumulator += delta;
        let whole_ticks = self.accumulator.as_nanos() / interval.as_nanos();
        let max_ticks = self.config.max_catch_up_ticks;

        let ticks = if whole_ticks > u128::from(max_ticks) {
            warn!(
                "Frame covered {} ticks, advancing {} and discarding the rest",
                whole_ticks, max_ticks
            );
            let remainder = self.accumulator.as_nanos() % interval.as_nanos();
            // remainder < interval, which is itself a Duration
            self.accumulator = Duration::from_nanos(remainder as u64);
            max_ticks
        } else {
            // whole_ticks <= max_ticks here
            let ticks = whole_ticks as u32;
            self.accumulator -= interval * ticks;
            ticks
        };

        for _ in 0..ticks {
            self.advance_one_tick();
        }
        ticks
    }

    /// Records a server tick received from the network
    pub fn on_server_tick(&mut self, server_tick: Tick) {
        if self.host_type == HostType::Server {
            return;
        }
        self.last_server_tick = Some(server_tick);
        self.steps_since_server_tick = 0;
    }

    pub fn local_tick(&self) -> Tick {
        self.local_tick
    }

    /// Authoritative tick on a server, best estimate on a client. A client that
    /// has not heard from the server yet reports its local tick.
    pub fn server_tick(&self) -> Tick {
        match self.host_type {
            HostType::Server => self.local_tick,
            HostType::Client => self.estimated_server_tick().unwrap_or(self.local_tick),
        }
    }

    pub fn has_server_tick(&self) -> bool {
        self.host_type == HostType::Server || self.last_server_tick.is_some()
    }

    pub fn local_time(&self) -> Duration {
        self.config.tick_interval * self.local_tick
    }

    pub fn server_time(&self) -> Duration {
        self.config.tick_interval * self.server_tick()
    }

    /// Number of whole ticks needed to cover `duration`, rounded up
    pub fn duration_to_ticks(&self, duration: Duration) -> u32 {
        let interval = self.config.tick_interval.as_nanos();
        if interval == 0 {
            return 0;
        }
        let ticks = duration.as_nanos().div_ceil(interval);
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }

    pub fn reset(&mut self) {
        self.local_tick = 0;
        self.accumulator = Duration::ZERO;
        self.last_server_tick = None;
        self.steps_since_server_tick = 0;
    }

    fn estimated_server_tick(&self) -> Option<Tick> {
        self.last_server_tick
            .map(|tick| tick.saturating_add(self.steps_since_server_tick))
    }

    fn target_tick(&self) -> Option<Tick> {
        self.estimated_server_tick()
            .map(|tick| tick.saturating_add(self.config.client_tick_lead))
    }
}
