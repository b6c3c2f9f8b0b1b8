/// Per-response limits of the sync protocol.
///
/// Peers must agree on these bit-for-bit, so they only change with a
/// protocol version bump and are never negotiated per request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolLimits {
    /// Soft byte budget shared by header and body responses.
    pub soft_response_limit: usize,
    /// Fixed per-header size estimate used for header response accounting.
    pub est_header_size: usize,
    /// Hard cap on headers in one response.
    pub max_header_fetch: usize,
    /// Hard cap on bodies in one response.
    pub max_block_fetch: usize,
}

pub const PROTOCOL_V1: u32 = 1;

pub const SOFT_RESPONSE_LIMIT: usize = 2 * 1024 * 1024;
pub const EST_HEADER_SIZE: usize = 500;
pub const MAX_HEADER_FETCH: usize = 192;
pub const MAX_BLOCK_FETCH: usize = 128;

pub const PROTOCOL_V1_LIMITS: ProtocolLimits = ProtocolLimits {
    soft_response_limit: SOFT_RESPONSE_LIMIT,
    est_header_size: EST_HEADER_SIZE,
    max_header_fetch: MAX_HEADER_FETCH,
    max_block_fetch: MAX_BLOCK_FETCH,
};

impl ProtocolLimits {
    /// Limits in force for a protocol version. Unknown versions get v1.
    pub const fn for_version(version: u32) -> ProtocolLimits {
        match version {
            PROTOCOL_V1 => PROTOCOL_V1_LIMITS,
            _ => PROTOCOL_V1_LIMITS,
        }
    }
}

impl Default for ProtocolLimits {
    fn default() -> Self {
        PROTOCOL_V1_LIMITS
    }
}
