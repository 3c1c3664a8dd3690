//! Timeout ticker (spec §2 / §4.4): a 1Hz tick that drives heartbeats and
//! close-handshake timeouts off the shared [`Clock`] rather than each
//! component arming its own `tokio::time::sleep`. Mirrors the teacher's
//! pattern of a small standalone task pumping state through a
//! mutex-guarded handle (`read.rs`'s `writer: Arc<Mutex<Writer>>`),
//! generalized to tick on a fixed period instead of driving off socket
//! reads. The ticker never touches the socket itself — it compiles a PING
//! frame and hands the bytes to whoever owns the write queue, the same
//! way the reader task and the application handle do.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::compiler::{compile_frame, random_mask_key};
use crate::config::EndpointConfig;
use crate::frame::{close_code, OpCode};
use crate::pipeline::FrameDescriptor;
use crate::stats::Stats;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Shared liveness counters the ticker reads and the reader task bumps.
/// `ping_count` and `pong_count` each only ever grow; the heartbeat PING's
/// payload carries the new `ping_count` so a peer that actually echoes it
/// (RFC 6455 PONGs echo the PING payload they answer) lets the reader log
/// which ping a given PONG corresponds to. Liveness failure is
/// `ping_count - pong_count > queued_ping_limit`, i.e. too many heartbeats
/// in a row went unanswered.
#[derive(Default)]
pub struct Liveness {
    ping_count: AtomicU64,
    pong_count: AtomicU64,
}

impl Liveness {
    pub fn note_pong(&self) {
        self.pong_count.fetch_add(1, Ordering::SeqCst);
    }

    fn note_ping_sent(&self) -> u64 {
        self.ping_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn unanswered(&self) -> u64 {
        self.ping_count.load(Ordering::SeqCst).saturating_sub(self.pong_count.load(Ordering::SeqCst))
    }
}

pub enum TickOutcome {
    Idle,
    HeartbeatSent(Vec<u8>),
    CloseTimedOut,
    /// Carries a fully-compiled CLOSE frame (code GOING_AWAY) ready to
    /// hand to the write queue; `closing_since` has already been set by
    /// the time this is returned, so the next ticks fall through to
    /// `CloseTimedOut` if the peer never acks.
    PeerUnresponsive(Vec<u8>),
}

/// Runs one tick's worth of bookkeeping against shared endpoint state.
/// Split out as a free function (rather than a method taking `&mut self`)
/// so it can be driven either by the real 1Hz loop or by a test feeding
/// it a [`crate::clock::ManualClock`] directly.
pub async fn tick<C>(
    config: &EndpointConfig,
    clock: &C,
    stats: &Mutex<Stats>,
    liveness: &Liveness,
    closing_since: &Mutex<Option<Instant>>,
) -> TickOutcome
where
    C: Clock,
{
    let now = clock.now();

    if let Some(since) = *closing_since.lock().await {
        if now.duration_since(since) >= config.close_period {
            return TickOutcome::CloseTimedOut;
        }
    }

    let last_sent_at = { stats.lock().await.last_sent_at };
    let due = match last_sent_at {
        Some(t) => now.duration_since(t) >= config.heartbeat_period,
        None => true,
    };
    if !due {
        return TickOutcome::Idle;
    }

    let ping_count = liveness.note_ping_sent();

    if liveness.unanswered() > config.queued_ping_limit {
        let mut since = closing_since.lock().await;
        if since.is_none() {
            *since = Some(now);
        }
        drop(since);
        let payload = close_code::GOING_AWAY.to_be_bytes().to_vec();
        let descriptor = FrameDescriptor { msg: payload, rsv1: false, fin: true, opcode: OpCode::Close };
        let mask = if config.role.mask_outbound() { Some(random_mask_key()) } else { None };
        return TickOutcome::PeerUnresponsive(compile_frame(&descriptor, mask));
    }

    let descriptor =
        FrameDescriptor { msg: ping_count.to_be_bytes().to_vec(), rsv1: false, fin: true, opcode: OpCode::Ping };
    let mask = if config.role.mask_outbound() { Some(random_mask_key()) } else { None };
    TickOutcome::HeartbeatSent(compile_frame(&descriptor, mask))
}

/// Spawns the actual 1Hz loop against a [`crate::clock::SystemClock`].
/// `on_outcome` is invoked for every non-idle tick; it's responsible for
/// forwarding heartbeat bytes to the write queue and for reacting to a
/// timeout/unresponsive peer by initiating a close.
pub fn spawn(
    config: EndpointConfig,
    stats: Arc<Mutex<Stats>>,
    liveness: Arc<Liveness>,
    closing_since: Arc<Mutex<Option<Instant>>>,
    on_outcome: impl Fn(TickOutcome) -> bool + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let clock = crate::clock::SystemClock;
        let mut interval = tokio::time::interval(TICK_PERIOD);
        loop {
            interval.tick().await;
            let outcome = tick(&config, &clock, &stats, &liveness, &closing_since).await;
            if on_outcome(outcome) {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;

    fn harness() -> (EndpointConfig, crate::clock::ManualClock, Mutex<Stats>, Liveness, Mutex<Option<Instant>>) {
        let config =
            EndpointConfig::default().with_role(Role::Server).with_heartbeat_period(Duration::from_secs(5));
        let clock = crate::clock::ManualClock::new();
        let stats = Mutex::new(Stats::new(clock.now()));
        (config, clock, stats, Liveness::default(), Mutex::new(None))
    }

    #[tokio::test]
    async fn idle_before_heartbeat_period_elapses() {
        let (config, clock, stats, liveness, closing) = harness();
        stats.lock().await.last_sent_at = Some(clock.now());
        let outcome = tick(&config, &clock, &stats, &liveness, &closing).await;
        assert!(matches!(outcome, TickOutcome::Idle));
    }

    #[tokio::test]
    async fn heartbeat_fires_after_period_elapses() {
        let (config, clock, stats, liveness, closing) = harness();
        stats.lock().await.last_sent_at = Some(clock.now());
        clock.advance(Duration::from_secs(6));
        let outcome = tick(&config, &clock, &stats, &liveness, &closing).await;
        assert!(matches!(outcome, TickOutcome::HeartbeatSent(_)));
    }

    #[tokio::test]
    async fn close_period_expiry_is_reported() {
        let (config, clock, stats, liveness, closing) = harness();
        *closing.lock().await = Some(clock.now());
        clock.advance(config.close_period + Duration::from_secs(1));
        let outcome = tick(&config, &clock, &stats, &liveness, &closing).await;
        assert!(matches!(outcome, TickOutcome::CloseTimedOut));
    }

    #[tokio::test]
    async fn heartbeat_payload_carries_ping_count() {
        let (config, clock, stats, liveness, closing) = harness();
        stats.lock().await.last_sent_at = Some(clock.now());
        clock.advance(Duration::from_secs(6));
        let outcome = tick(&config, &clock, &stats, &liveness, &closing).await;
        let TickOutcome::HeartbeatSent(wire) = outcome else {
            panic!("expected a heartbeat");
        };
        // Server role doesn't mask outbound frames: header (2 bytes)
        // followed directly by the 8-byte big-endian ping count, 1 for
        // the first heartbeat.
        assert_eq!(&wire[2..], &1u64.to_be_bytes());
    }

    #[tokio::test]
    async fn unanswered_pings_beyond_limit_report_unresponsive() {
        let (config, clock, stats, liveness, closing) = harness();
        for _ in 0..config.queued_ping_limit {
            clock.advance(config.heartbeat_period + Duration::from_secs(1));
            let outcome = tick(&config, &clock, &stats, &liveness, &closing).await;
            assert!(matches!(outcome, TickOutcome::HeartbeatSent(_)));
        }
        clock.advance(config.heartbeat_period + Duration::from_secs(1));
        let outcome = tick(&config, &clock, &stats, &liveness, &closing).await;
        assert!(matches!(outcome, TickOutcome::PeerUnresponsive(_)));
        assert!(closing.lock().await.is_some());
    }
}
