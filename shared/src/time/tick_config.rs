use std::{default::Default, time::Duration};

/// Contains Config properties which drive the tick clock
#[derive(Clone, Debug)]
pub struct TickConfig {
    /// Length of one tick
    pub tick_interval: Duration,
    /// Most ticks a single frame may advance. Lag beyond this is discarded.
    pub max_catch_up_ticks: u32,
    /// The server sends its tick to clients every this many ticks
    pub time_sync_interval: u32,
    /// How many ticks ahead of the estimated server tick clients aim to run
    pub client_tick_lead: u32,
    /// A client further behind its target than this jumps instead of catching up
    pub hard_reset_threshold: u32,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            max_catch_up_ticks: 5,
            time_sync_interval: 20,
            client_tick_lead: 2,
            hard_reset_threshold: 30,
        }
    }
}
