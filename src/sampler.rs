//! Tick admission.
//!
//! Three gates, always evaluated in this order:
//!
//! 1. exclusivity: a detection is staged or in flight, drop. Touches no state.
//! 2. time: less than `min_interval` since the last admitted tick, drop.
//! 3. count: of the ticks that passed the time gate, only every `every_nth` is admitted.
//!
//! The time reference only moves on admission; the count counter moves on every
//! time-gate pass. Until the first admission of a session every tick passes the
//! time gate. Busy ticks are rejected before either is consulted, so sustained
//! backpressure does not eat count-gate slots.

use std::time::{Duration, Instant};

use crate::frame::FrameTick;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_EVERY_NTH: u64 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerConfig {
    pub min_interval: Duration,
    pub every_nth: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            every_nth: DEFAULT_EVERY_NTH,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    Busy,
    Interval,
    Count,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Dropped(DropReason),
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        self == Admission::Admitted
    }
}

#[derive(Clone, Debug)]
pub struct FrameSampler {
    config: SamplerConfig,
    last_admitted: Option<Instant>,
    eligible_count: u64,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            last_admitted: None,
            eligible_count: 0,
        }
    }

    pub fn config(&self) -> SamplerConfig {
        self.config
    }

    /// Decide whether `tick` is admitted. `in_flight` is the current value of
    /// the detection client's single-flight flag.
    pub fn admit(&mut self, tick: &FrameTick, in_flight: bool) -> Admission {
        if in_flight {
            return Admission::Dropped(DropReason::Busy);
        }

        if let Some(last) = self.last_admitted {
            if tick.captured_at.saturating_duration_since(last) < self.config.min_interval {
                return Admission::Dropped(DropReason::Interval);
            }
        }

        self.eligible_count += 1;
        if self.eligible_count % self.config.every_nth.max(1) != 0 {
            return Admission::Dropped(DropReason::Count);
        }
        self.last_admitted = Some(tick.captured_at);
        Admission::Admitted
    }

    /// Number of ticks that have passed the time gate so far.
    pub fn eligible_count(&self) -> u64 {
        self.eligible_count
    }

    pub fn last_admitted(&self) -> Option<Instant> {
        self.last_admitted
    }

    pub fn reset(&mut self) {
        self.last_admitted = None;
        self.eligible_count = 0;
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(SamplerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(start: Instant, spacing_ms: u64, n: u64) -> Vec<FrameTick> {
        (0..n)
            .map(|i| FrameTick::new(start + Duration::from_millis(i * spacing_ms), i + 1))
            .collect()
    }

    #[test]
    fn dense_ticks_pass_time_gate_at_most_once() {
        let mut sampler = FrameSampler::new(SamplerConfig {
            min_interval: Duration::from_millis(100),
            every_nth: 1,
        });
        let admitted = ticks(Instant::now(), 10, 10)
            .iter()
            .filter(|tick| sampler.admit(tick, false).is_admitted())
            .count();
        assert!(admitted <= 1);
        assert_eq!(sampler.eligible_count(), 1);
    }

    #[test]
    fn count_gate_admits_every_third_eligible_tick() {
        let mut sampler = FrameSampler::new(SamplerConfig {
            min_interval: Duration::from_millis(100),
            every_nth: 3,
        });
        let outcomes: Vec<Admission> = ticks(Instant::now(), 100, 9)
            .iter()
            .map(|tick| sampler.admit(tick, false))
            .collect();
        let admitted: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_admitted())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(admitted, vec![2, 5, 8]);
        assert_eq!(outcomes[0], Admission::Dropped(DropReason::Count));
    }

    #[test]
    fn busy_ticks_do_not_consume_count_slots() {
        let mut sampler = FrameSampler::new(SamplerConfig {
            min_interval: Duration::ZERO,
            every_nth: 3,
        });
        let all = ticks(Instant::now(), 100, 8);

        assert_eq!(sampler.admit(&all[0], false), Admission::Dropped(DropReason::Count));
        assert_eq!(sampler.admit(&all[1], false), Admission::Dropped(DropReason::Count));
        for tick in &all[2..7] {
            assert_eq!(sampler.admit(tick, true), Admission::Dropped(DropReason::Busy));
        }
        assert_eq!(sampler.eligible_count(), 2);
        assert_eq!(sampler.admit(&all[7], false), Admission::Admitted);
    }

    #[test]
    fn camera_cadence_admits_on_interval_from_last_admission() {
        let mut sampler = FrameSampler::new(SamplerConfig {
            min_interval: Duration::from_millis(100),
            every_nth: 3,
        });
        let start = Instant::now();
        let admitted_ms: Vec<u64> = ticks(start, 10, 31)
            .iter()
            .filter(|tick| sampler.admit(tick, false).is_admitted())
            .map(|tick| tick.captured_at.duration_since(start).as_millis() as u64)
            .collect();
        assert_eq!(admitted_ms, vec![20, 140, 260]);
        assert_eq!(sampler.eligible_count(), 9);
    }

    #[test]
    fn time_reference_is_last_admission() {
        let mut sampler = FrameSampler::new(SamplerConfig {
            min_interval: Duration::from_millis(100),
            every_nth: 2,
        });
        let start = Instant::now();
        let at = |ms: u64, seq: u64| FrameTick::new(start + Duration::from_millis(ms), seq);

        assert_eq!(sampler.admit(&at(0, 1), false), Admission::Dropped(DropReason::Count));
        assert_eq!(sampler.last_admitted(), None);
        assert!(sampler.admit(&at(10, 2), false).is_admitted());
        assert_eq!(sampler.last_admitted(), Some(start + Duration::from_millis(10)));

        // passes the time gate but not the count gate: reference stays put
        assert_eq!(sampler.admit(&at(110, 3), false), Admission::Dropped(DropReason::Count));
        assert_eq!(sampler.last_admitted(), Some(start + Duration::from_millis(10)));
        assert!(sampler.admit(&at(115, 4), false).is_admitted());
        assert_eq!(sampler.last_admitted(), Some(start + Duration::from_millis(115)));

        assert_eq!(
            sampler.admit(&at(200, 5), false),
            Admission::Dropped(DropReason::Interval)
        );
    }

    #[test]
    fn busy_ticks_do_not_move_time_reference() {
        let mut sampler = FrameSampler::new(SamplerConfig {
            min_interval: Duration::from_millis(100),
            every_nth: 1,
        });
        let start = Instant::now();
        assert!(sampler.admit(&FrameTick::new(start, 1), false).is_admitted());
        let busy = FrameTick::new(start + Duration::from_millis(150), 2);
        assert_eq!(sampler.admit(&busy, true), Admission::Dropped(DropReason::Busy));
        assert_eq!(sampler.last_admitted(), Some(start));
        let next = FrameTick::new(start + Duration::from_millis(160), 3);
        assert!(sampler.admit(&next, false).is_admitted());
    }

    #[test]
    fn interval_drops_do_not_advance_counter() {
        let mut sampler = FrameSampler::new(SamplerConfig {
            min_interval: Duration::from_millis(100),
            every_nth: 2,
        });
        let start = Instant::now();
        let at = |ms: u64, seq: u64| FrameTick::new(start + Duration::from_millis(ms), seq);

        sampler.admit(&at(0, 1), false);
        assert!(sampler.admit(&at(10, 2), false).is_admitted());
        assert_eq!(sampler.admit(&at(50, 3), false), Admission::Dropped(DropReason::Interval));
        assert_eq!(sampler.admit(&at(90, 4), false), Admission::Dropped(DropReason::Interval));
        assert_eq!(sampler.eligible_count(), 2);
        assert_eq!(sampler.admit(&at(110, 5), false), Admission::Dropped(DropReason::Count));
        assert!(sampler.admit(&at(120, 6), false).is_admitted());
    }

    #[test]
    fn reset_restores_fresh_state() {
        let mut sampler = FrameSampler::default();
        let start = Instant::now();
        sampler.admit(&FrameTick::new(start, 1), false);
        sampler.reset();
        assert_eq!(sampler.eligible_count(), 0);
        assert_eq!(
            sampler.admit(&FrameTick::new(start, 1), false),
            Admission::Dropped(DropReason::Count)
        );
    }
}
