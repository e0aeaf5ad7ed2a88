//! Retransmission-timeout estimation.
//!
//! Reliable delivery needs a good guess at how long to wait for an ack before
//! declaring a packet lost.  [`RtoEstimator`] keeps the two exponentially
//! weighted estimates of Jacobson's algorithm (RFC 6298):
//!
//! ```text
//! RTTVAR ← (1-β)·RTTVAR + β·|SRTT − R|
//! SRTT   ← (1-α)·SRTT   + α·R
//! RTO    =  SRTT + max(G, K·RTTVAR)       clamped to [min_rto, max_rto]
//! ```
//!
//! Samples are fed only from acks of packets that were **never
//! retransmitted** (Karn's rule): an ack for a retransmitted packet cannot be
//! attributed to a specific transmission attempt, so such samples are
//! discarded by the caller.
//!
//! Consecutive timeouts of one packet double that packet's *effective*
//! timeout ([`timeout_after`](RtoEstimator::timeout_after)) without touching
//! `SRTT`/`RTTVAR` — the backoff dies with the packet's in-flight record when
//! the ack finally arrives.

use std::time::Duration;

use crate::config::{ConfigError, SessionConfig};

/// Smoothed RTT state and the RTO derived from it.
#[derive(Debug)]
pub struct RtoEstimator {
    /// Smoothed round-trip estimate; `None` until the first sample.
    srtt: Option<Duration>,
    /// Round-trip variation estimate; `None` until the first sample.
    rttvar: Option<Duration>,
    initial_rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    alpha: f64,
    beta: f64,
    k: u32,
    granularity: Duration,
}

impl RtoEstimator {
    /// Construct an estimator from the session's tunables.
    ///
    /// The configuration is validated first; an out-of-range smoothing
    /// weight would otherwise corrupt every subsequent estimate.  Before any
    /// sample arrives, [`current_timeout`](Self::current_timeout) returns
    /// `initial_rto`.
    pub fn new(config: &SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            srtt: None,
            rttvar: None,
            initial_rto: config.initial_rto,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
            alpha: config.rto_alpha,
            beta: config.rto_beta,
            k: config.rto_k,
            granularity: config.rto_granularity,
        })
    }

    /// Record one usable RTT sample (RFC 6298 §2).
    ///
    /// First sample:       SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples: RTTVAR then SRTT per the module formulas, RTTVAR
    /// first so it sees the pre-update SRTT.
    pub fn on_sample(&mut self, r: Duration) {
        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let deviation = srtt.abs_diff(r);
                self.rttvar = Some(blend(rttvar, deviation, self.beta));
                self.srtt = Some(blend(srtt, r, self.alpha));
            }
            _ => {
                self.srtt = Some(r);
                self.rttvar = Some(r / 2);
            }
        }
    }

    /// The RTO to arm for a fresh (never-retransmitted) packet.
    pub fn current_timeout(&self) -> Duration {
        let raw = match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => srtt + self.granularity.max(rttvar * self.k),
            _ => self.initial_rto,
        };
        raw.clamp(self.min_rto, self.max_rto)
    }

    /// Effective timeout for a packet that has already been retransmitted
    /// `retries` times: the current RTO doubled once per retry, capped at
    /// `max_rto`.
    ///
    /// The exponent lives in the packet's in-flight record, not here, so one
    /// stalled packet never inflates the timeout of its neighbours.
    pub fn timeout_after(&self, retries: u32) -> Duration {
        let base = self.current_timeout();
        let factor = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
        base.checked_mul(factor)
            .map_or(self.max_rto, |d| d.min(self.max_rto))
    }

    /// Current smoothed RTT, if any sample has been recorded.
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }
}

/// Exponentially weighted average: `(1-w)·old + w·new`.
fn blend(old: Duration, new: Duration, w: f64) -> Duration {
    Duration::from_secs_f64(old.as_secs_f64() * (1.0 - w) + new.as_secs_f64() * w)
}
