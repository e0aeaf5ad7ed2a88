//! Session configuration.
//!
//! All tunables for one sender/receiver pair live in [`SessionConfig`].
//! Validation happens once, at session setup, before any packet is sent —
//! a malformed configuration is fatal ([`ConfigError`]), never limped along
//! with.

use std::time::Duration;

use crate::packet::MAX_PAYLOAD;

/// Tunables recognised by a session.
///
/// The defaults are usable as-is; construct with struct-update syntax to
/// override individual fields:
///
/// ```
/// use arq_over_udp::config::SessionConfig;
///
/// let cfg = SessionConfig {
///     window_capacity: 4,
///     ..SessionConfig::default()
/// };
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum payload bytes per DATA packet, at most
    /// [`MAX_PAYLOAD`](crate::packet::MAX_PAYLOAD).  Fixed for the session;
    /// renegotiation is out of scope.
    pub max_segment_size: usize,
    /// Maximum number of concurrent in-flight (unacked) packets.
    pub window_capacity: usize,
    /// Retransmission timeout before any RTT sample exists.
    pub initial_rto: Duration,
    /// Lower clamp bound for the computed RTO.
    pub min_rto: Duration,
    /// Upper clamp bound for the computed RTO and for per-packet backoff.
    pub max_rto: Duration,
    /// Retransmissions allowed per packet before the submission is declared
    /// failed.
    pub max_retries_per_packet: u32,
    /// SRTT smoothing weight (RFC 6298 `alpha`); must be in (0, 1).
    pub rto_alpha: f64,
    /// RTTVAR smoothing weight (RFC 6298 `beta`); must be in (0, 1).
    pub rto_beta: f64,
    /// RTTVAR multiplier in the RTO formula (RFC 6298 `K`).
    pub rto_k: u32,
    /// Timer-granularity floor `G` in `RTO = SRTT + max(G, K·RTTVAR)`.
    pub rto_granularity: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_segment_size: 1450,
            window_capacity: 16,
            initial_rto: Duration::from_millis(500),
            min_rto: Duration::from_millis(100),
            max_rto: Duration::from_secs(60),
            max_retries_per_packet: 6,
            rto_alpha: 0.125,
            rto_beta: 0.25,
            rto_k: 4,
            rto_granularity: Duration::from_millis(10),
        }
    }
}

impl SessionConfig {
    /// Reject a configuration no session could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.max_segment_size == 0 {
            return Err(ConfigError::ZeroSegmentSize);
        }
        if self.max_segment_size > MAX_PAYLOAD {
            // The wire format's 16-bit length field would wrap, leaving every
            // transmission of a large payload undecodable at the receiver.
            return Err(ConfigError::SegmentSizeTooLarge {
                requested: self.max_segment_size,
                max: MAX_PAYLOAD,
            });
        }
        if self.max_rto.is_zero() || self.min_rto > self.max_rto {
            return Err(ConfigError::BadRtoBounds {
                min: self.min_rto,
                max: self.max_rto,
            });
        }
        if !(0.0..=1.0).contains(&self.rto_alpha)
            || self.rto_alpha == 0.0
            || self.rto_alpha == 1.0
        {
            return Err(ConfigError::BadWeight("rto_alpha", self.rto_alpha));
        }
        if !(0.0..=1.0).contains(&self.rto_beta) || self.rto_beta == 0.0 || self.rto_beta == 1.0 {
            return Err(ConfigError::BadWeight("rto_beta", self.rto_beta));
        }
        if self.rto_k == 0 {
            return Err(ConfigError::ZeroK);
        }
        Ok(())
    }
}

/// Reasons a [`SessionConfig`] is rejected at setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    /// `window_capacity` is zero — no packet could ever be in flight.
    ZeroWindow,
    /// `max_segment_size` is zero — no payload could ever be carried.
    ZeroSegmentSize,
    /// `max_segment_size` exceeds what one datagram can carry.
    SegmentSizeTooLarge { requested: usize, max: usize },
    /// RTO clamp bounds are empty or inverted.
    BadRtoBounds { min: Duration, max: Duration },
    /// A smoothing weight lies outside the open interval (0, 1).
    BadWeight(&'static str, f64),
    /// `rto_k` is zero — RTTVAR would never contribute to the RTO.
    ZeroK,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroWindow => write!(f, "window_capacity must be at least 1"),
            ConfigError::ZeroSegmentSize => write!(f, "max_segment_size must be at least 1"),
            ConfigError::SegmentSizeTooLarge { requested, max } => {
                write!(f, "max_segment_size {requested} exceeds the per-packet limit of {max}")
            }
            ConfigError::BadRtoBounds { min, max } => {
                write!(f, "invalid RTO bounds: min {min:?} > max {max:?}")
            }
            ConfigError::BadWeight(name, v) => {
                write!(f, "{name} must lie strictly between 0 and 1, got {v}")
            }
            ConfigError::ZeroK => write!(f, "rto_k must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_window_rejected() {
        let cfg = SessionConfig {
            window_capacity: 0,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroWindow));
    }

    #[test]
    fn zero_segment_size_rejected() {
        let cfg = SessionConfig {
            max_segment_size: 0,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroSegmentSize));
    }

    #[test]
    fn segment_size_above_wire_limit_rejected() {
        // A 70,000-byte segment would wrap the 16-bit payload_len field.
        let cfg = SessionConfig {
            max_segment_size: 70_000,
            ..SessionConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::SegmentSizeTooLarge {
                requested: 70_000,
                max: MAX_PAYLOAD,
            })
        );
    }

    #[test]
    fn segment_size_at_wire_limit_accepted() {
        let cfg = SessionConfig {
            max_segment_size: MAX_PAYLOAD,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn inverted_rto_bounds_rejected() {
        let cfg = SessionConfig {
            min_rto: Duration::from_secs(10),
            max_rto: Duration::from_secs(1),
            ..SessionConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BadRtoBounds { .. })
        ));
    }

    #[test]
    fn degenerate_weights_rejected() {
        for alpha in [0.0, 1.0, -0.5, 2.0] {
            let cfg = SessionConfig {
                rto_alpha: alpha,
                ..SessionConfig::default()
            };
            assert!(
                matches!(cfg.validate(), Err(ConfigError::BadWeight("rto_alpha", _))),
                "alpha {alpha} should be rejected"
            );
        }
    }

    #[test]
    fn zero_k_rejected() {
        let cfg = SessionConfig {
            rto_k: 0,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroK));
    }
}
