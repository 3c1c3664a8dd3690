//! Endpoint configuration (spec §3's option table), generalized from the
//! teacher's `WebSocketConfig` into the full set this spec names, plus the
//! role-parameterized masking policy spec §9's third open question asks
//! implementers to add instead of hard-coding.

use std::time::Duration;

/// Which side of the handshake this endpoint plays. Drives masking policy
/// (spec §9, open question: "a client-role endpoint inverts this rule").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Reads must be masked by the peer; writes are sent unmasked.
    Server,
    /// Reads must arrive unmasked from the peer; writes are masked.
    Client,
}

impl Role {
    pub fn peer_must_mask(&self) -> bool {
        matches!(self, Role::Server)
    }

    pub fn mask_outbound(&self) -> bool {
        matches!(self, Role::Client)
    }
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub role: Role,
    /// Outbound messages larger than 1.5x this are split into frames of
    /// `ceil(len / ceil(len / auto_frame_size))` bytes.
    pub auto_frame_size: usize,
    /// Inbound frame payload length limit (else MESSAGE_TOO_LARGE).
    pub max_frame_size: usize,
    /// Inbound cumulative message length limit.
    pub max_msg_size: usize,
    /// Ping cadence for the heartbeat (ticker-driven).
    pub heartbeat_period: Duration,
    /// Max time to await peer close confirmation before forced teardown.
    pub close_period: Duration,
    /// Validate TEXT payloads as UTF-8 at emit boundaries.
    pub validate_utf8: bool,
    /// Reject BINARY opcodes as UNACCEPTABLE_TYPE.
    pub text_only: bool,
    /// Outstanding unacknowledged pings tolerated before GOING_AWAY.
    pub queued_ping_limit: u64,
    /// TEXT/BINARY chunk size emitted to the application before fin.
    pub parser_emit_threshold: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            auto_frame_size: 32_768,
            max_frame_size: 2_097_152,
            max_msg_size: 10_485_760,
            heartbeat_period: Duration::from_secs(10),
            close_period: Duration::from_secs(3),
            validate_utf8: false,
            text_only: false,
            queued_ping_limit: 3,
            parser_emit_threshold: 32_768,
        }
    }
}

impl EndpointConfig {
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_auto_frame_size(mut self, size: usize) -> Self {
        self.auto_frame_size = size;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_max_msg_size(mut self, size: usize) -> Self {
        self.max_msg_size = size;
        self
    }

    pub fn with_heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat_period = period;
        self
    }

    pub fn with_close_period(mut self, period: Duration) -> Self {
        self.close_period = period;
        self
    }

    pub fn with_validate_utf8(mut self, enabled: bool) -> Self {
        self.validate_utf8 = enabled;
        self
    }

    pub fn with_text_only(mut self, enabled: bool) -> Self {
        self.text_only = enabled;
        self
    }

    pub fn with_queued_ping_limit(mut self, limit: u64) -> Self {
        self.queued_ping_limit = limit;
        self
    }

    pub fn with_parser_emit_threshold(mut self, threshold: usize) -> Self {
        self.parser_emit_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = EndpointConfig::default();
        assert_eq!(cfg.auto_frame_size, 32_768);
        assert_eq!(cfg.max_frame_size, 2_097_152);
        assert_eq!(cfg.max_msg_size, 10_485_760);
        assert_eq!(cfg.heartbeat_period, Duration::from_secs(10));
        assert_eq!(cfg.close_period, Duration::from_secs(3));
        assert!(!cfg.validate_utf8);
        assert!(!cfg.text_only);
        assert_eq!(cfg.queued_ping_limit, 3);
        assert_eq!(cfg.parser_emit_threshold, 32_768);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = EndpointConfig::default()
            .with_role(Role::Client)
            .with_text_only(true);
        assert_eq!(cfg.role, Role::Client);
        assert!(cfg.text_only);
    }
}
