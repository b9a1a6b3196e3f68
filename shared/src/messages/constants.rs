// Message size thresholds

/// Default maximum transmission unit, in bytes, for a single transport send
pub const DEFAULT_MTU_BYTES: usize = 1296;

/// Smallest MTU a peer may be configured with. Anything smaller could not carry
/// a fragment header plus a useful amount of payload.
pub const MIN_MTU_BYTES: usize = 64;

/// Default upper bound on the body of a single (possibly fragmented) message
pub const DEFAULT_FRAGMENTED_MESSAGE_MAX_BYTES: usize = 1024 * 1024;

/// Fragmented messages a single peer may have in reassembly at once
pub const DEFAULT_MAX_PARTIAL_MESSAGES_PER_PEER: usize = 32;

/// MTU values keep their low 3 bits cleared so downstream framing stays word aligned
pub const MTU_ALIGNMENT_MASK: usize = !7;

/// Rounds an MTU down to the nearest aligned boundary
pub fn align_mtu(size: usize) -> usize {
    size & MTU_ALIGNMENT_MASK
}
