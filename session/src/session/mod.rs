mod session;
pub use session::{Session, TelemetryCallback};

mod session_config;
pub use session_config::SessionConfig;

mod network_stats;
pub use network_stats::NetworkStats;
