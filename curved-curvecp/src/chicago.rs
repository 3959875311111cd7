//! The Chicago congestion scheduler.
//!
//! Chicago converts a stream of RTT observations into the two values the
//! connection pump lives by:
//!
//! - [`Chicago::tx_throttle`] - the minimum interval between transmissions,
//!   cycled through rising and falling congestion phases;
//! - [`Chicago::tx_timeout`] - the retransmit timeout, a Jacobson/Karels
//!   estimate padded for delayed acknowledgments.
//!
//! The scheduler performs no I/O and reads no clocks: every call carries the
//! caller's `now`, and jitter comes from a non-cryptographic PRNG injected at
//! construction. Driving it with synthetic timestamps reproduces any cycle
//! exactly.
//!
//! All arithmetic is in whole nanoseconds. Intermediate cubes and squares of
//! a throttle are computed in 128 bits; quotients truncate toward zero.

use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::time::{Duration, Instant};

const SECOND: i64 = 1_000_000_000;
const MILLISECOND: i64 = 1_000_000;

/// Rate-increase curve constant, 2^51.
const TIME_CONSTANT: i128 = 1 << 51;

/// Below this throttle the scheduler stops speeding up.
const THROTTLE_FLOOR: i64 = 100_000;

/// Crossover between the cubic and rational forms of the rate increase.
const INCREASE_CROSSOVER: i64 = 16 * MILLISECOND;

#[derive(Debug)]
pub struct Chicago {
    /// Interval between successive transmissions, in nanoseconds.
    tx_throttle: i64,
    /// Retransmit timeout, in nanoseconds.
    tx_timeout: i64,

    // Jacobson/Karels estimators driving tx_timeout.
    rtt_average: i64,
    rtt_mean_dev: i64,

    // Long-horizon envelope of the observed RTTs. These converge much more
    // slowly than the estimators above so they track the cycle's extremes.
    rtt_high: i64,
    rtt_low: i64,

    last_adjustment: Option<Instant>,
    last_edge: Option<Instant>,
    last_doubling: Option<Instant>,

    // Whether the previous adjustment cycle sat above the high mark or
    // below the low mark, and which half of the cycle we are in.
    was_high: bool,
    was_low: bool,
    falling: bool,

    rng: SmallRng,
}

impl Chicago {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    /// Construct with a caller-supplied jitter source. Tests seed this for
    /// reproducible cycles.
    pub fn with_rng(rng: SmallRng) -> Self {
        Self {
            tx_throttle: SECOND,
            tx_timeout: SECOND,
            rtt_average: 0,
            rtt_mean_dev: 0,
            rtt_high: 0,
            rtt_low: 0,
            last_adjustment: None,
            last_edge: None,
            last_doubling: None,
            was_high: false,
            was_low: false,
            falling: false,
            rng,
        }
    }

    pub fn tx_throttle(&self) -> Duration {
        Duration::from_nanos(self.tx_throttle as u64)
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_nanos(self.tx_timeout as u64)
    }

    /// Feed one RTT observation taken at `now`.
    pub fn adjust(&mut self, rtt: Duration, now: Instant) {
        let rtt = duration_nanos(rtt);

        // The very first observation seeds every estimator and nothing else.
        let Some(last_adjustment) = self.last_adjustment else {
            self.tx_throttle = rtt;
            self.rtt_average = rtt;
            self.rtt_mean_dev = rtt / 2;
            self.rtt_high = rtt;
            self.rtt_low = rtt;
            self.last_adjustment = Some(now);
            return;
        };

        // Jacobson/Karels, gains 1/8 for the average and 1/4 for the
        // deviation. The 8x throttle term pads the timeout against
        // acknowledgments the peer is allowed to delay.
        let average_delta = rtt - self.rtt_average;
        self.rtt_average += average_delta / 8;
        self.rtt_mean_dev += (average_delta.abs() - self.rtt_mean_dev) / 4;
        self.tx_timeout = self.rtt_average + 4 * self.rtt_mean_dev + 8 * self.tx_throttle;

        // Envelope. The low mark rises far more slowly than it falls.
        self.rtt_high += (rtt - self.rtt_high) / 1024;
        let low_delta = rtt - self.rtt_low;
        if low_delta >= 0 {
            self.rtt_low += low_delta / 8192;
        } else {
            self.rtt_low += low_delta / 256;
        }

        // Reconsider the throttle every 16 packet intervals.
        let since_adjustment = duration_nanos(now - last_adjustment);
        if since_adjustment < 16 * self.tx_throttle {
            return;
        }

        if since_adjustment > 10 * SECOND {
            // Idle flow; restart near one block per second.
            self.tx_throttle = SECOND + self.rng.gen_range(0..SECOND / 8);
        }
        self.last_adjustment = Some(now);

        if self.tx_throttle > THROTTLE_FLOOR {
            // Rate-fair additive increase of 1/throttle, approximated by
            // two curves that agree near the crossover.
            let t = self.tx_throttle as i128;
            if self.tx_throttle < INCREASE_CROSSOVER {
                self.tx_throttle -= (t * t * t / TIME_CONSTANT) as i64;
            } else {
                self.tx_throttle = (t / (1 + t * t / TIME_CONSTANT)) as i64;
            }
        }

        if self.falling {
            if self.was_low {
                // Bottom of the cycle: resume watching for the next high.
                self.falling = false;
            }
        } else if self.was_high {
            // Past the top of the cycle: back off with jitter.
            self.tx_throttle += self.rng.gen_range(0..(self.tx_throttle / 4).max(1));
            self.last_edge = Some(now);
            self.falling = true;
        }

        self.was_low = self.rtt_average < self.rtt_low;
        self.was_high = self.rtt_average > self.rtt_high + 5 * MILLISECOND;

        // Occasionally double the send rate, unless already at the floor.
        if self.tx_throttle > THROTTLE_FLOOR {
            let edge_recent = matches!(
                self.last_edge,
                Some(edge) if duration_nanos(now - edge) < 60 * SECOND
            );
            let required = if edge_recent {
                4 * self.tx_throttle + 64 * self.tx_timeout + 5 * SECOND
            } else {
                4 * self.tx_throttle + 2 * self.tx_timeout
            };
            let allowed = match self.last_doubling {
                None => true,
                Some(last) => duration_nanos(now - last) >= required,
            };
            if allowed {
                self.tx_throttle /= 2;
                self.last_doubling = Some(now);
                self.last_edge = Some(now);
            }
        }
    }
}

impl Default for Chicago {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Chicago {
        Chicago::with_rng(SmallRng::seed_from_u64(7))
    }

    #[test]
    fn first_sample_seeds_estimators() {
        let mut c = seeded();
        let t0 = Instant::now();
        c.adjust(Duration::from_millis(50), t0);

        assert_eq!(c.tx_throttle(), Duration::from_millis(50));
        assert_eq!(c.rtt_average, 50 * MILLISECOND);
        assert_eq!(c.rtt_mean_dev, 25 * MILLISECOND);
        assert_eq!(c.rtt_high, 50 * MILLISECOND);
        assert_eq!(c.rtt_low, 50 * MILLISECOND);
        // tx_timeout is untouched until the second observation.
        assert_eq!(c.tx_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn constant_rtt_converges() {
        let mut c = seeded();
        let rtt = Duration::from_millis(50);
        let t0 = Instant::now();
        // Closely spaced samples never cross the 16-throttle boundary, so
        // only the estimators move.
        for i in 0..500 {
            c.adjust(rtt, t0 + Duration::from_millis(i));
        }
        assert_eq!(c.rtt_average, 50 * MILLISECOND);
        assert!(c.rtt_mean_dev < MILLISECOND);
        assert!(c.tx_timeout() >= 8 * c.tx_throttle());
    }

    #[test]
    fn throttle_untouched_within_sixteen_intervals() {
        let mut c = seeded();
        let rtt = Duration::from_millis(50);
        let t0 = Instant::now();
        c.adjust(rtt, t0);
        let throttle = c.tx_throttle();
        for i in 1..=10u64 {
            // 50ms spacing is far below 16 * 50ms.
            c.adjust(rtt, t0 + Duration::from_millis(50 * i));
            assert_eq!(c.tx_throttle(), throttle);
        }
    }

    #[test]
    fn throttle_decreases_after_sixteen_intervals() {
        let mut c = seeded();
        let rtt = Duration::from_millis(50);
        let t0 = Instant::now();
        c.adjust(rtt, t0);
        let before = c.tx_throttle();
        c.adjust(rtt, t0 + 17 * before);
        assert!(c.tx_throttle() < before);
        // Edge flags reflect the comparison made in that cycle.
        assert!(!c.was_high);
        assert!(!c.was_low);
    }

    #[test]
    fn idle_flow_slow_restarts() {
        let mut c = seeded();
        let rtt = Duration::from_millis(100);
        let t0 = Instant::now();
        c.adjust(rtt, t0);
        // One adjustment cycle: the rate increase and the first doubling
        // bring the throttle to 10ms and stamp last_doubling.
        let t1 = t0 + 17 * c.tx_throttle();
        c.adjust(rtt, t1);
        assert_eq!(c.tx_throttle(), Duration::from_millis(10));

        // A 10.5s gap is idle (>10s): the throttle restarts at 1s..1.125s
        // and the same call's rate increase divides it by 1 + T^2/2^51,
        // landing near 2ms. Without the restart it would still be near
        // 10ms; the doubling guard (64x a ~300ms timeout) blocks halving.
        c.adjust(rtt, t1 + Duration::from_millis(10_500));
        let restart_min = Duration::from_nanos(
            (SECOND as i128 * TIME_CONSTANT / (TIME_CONSTANT + (9 * SECOND as i128 / 8).pow(2)))
                as u64,
        );
        assert!(c.tx_throttle() >= restart_min);
        assert!(c.tx_throttle() < Duration::from_millis(3));
    }

    #[test]
    fn timeout_keeps_delayed_ack_margin() {
        let mut c = seeded();
        let t0 = Instant::now();
        let mut at = t0;
        for i in 0..200u64 {
            // A noisy RTT pattern.
            let rtt = Duration::from_millis(40 + (i * 13) % 25);
            at += Duration::from_millis(30);
            c.adjust(rtt, at);
            if i > 0 {
                assert!(c.tx_timeout() >= 8 * c.tx_throttle());
            }
        }
    }

    #[test]
    fn backoff_enters_falling_phase() {
        let mut c = seeded();
        let t0 = Instant::now();
        c.adjust(Duration::from_millis(10), t0);
        let mut at = t0;
        // Climb the RTT so the average outruns the slow high envelope.
        for i in 0..60 {
            at += 17 * c.tx_throttle() + Duration::from_millis(1);
            c.adjust(Duration::from_millis(10 + i * 4), at);
            if c.falling {
                return;
            }
        }
        panic!("rising RTTs never triggered a backoff edge");
    }
}
