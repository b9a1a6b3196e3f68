
pub use helpers::*;
pub use local_transport::{EndpointId, LinkConditionerConfig, LocalHub, LocalTransport, SentPacket};
