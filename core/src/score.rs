//! Candidate scoring: 40 points for latency, 40 for loss, 20 for an open port.

use crate::Measurement;

/// Score a host in [0, 100]. Total loss or a closed port always scores 0.
pub fn score(latency_ms: f64, loss_percent: u8, reachable: bool) -> f64 {
    if loss_percent >= 100 || !reachable {
        return 0.0;
    }
    let delay_score = (40.0 - latency_ms / 5.0).max(0.0);
    let loss_score = 40.0 * (1.0 - f64::from(loss_percent) / 100.0);
    let port_score = 20.0;
    (delay_score + loss_score + port_score).min(100.0)
}

/// `None` for an unmeasurable probe, which never gets a score.
pub fn score_measurement(m: &Measurement, reachable: bool) -> Option<f64> {
    match *m {
        Measurement::Measured { avg_latency_ms, loss_percent } => Some(score(avg_latency_ms, loss_percent, reachable)),
        Measurement::Unmeasurable => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_clean_open_host() {
        assert_eq!(score(10.0, 0, true), 98.0);
        assert_eq!(score(50.0, 0, true), 90.0);
    }

    #[test]
    fn total_loss_or_closed_port_is_zero() {
        assert_eq!(score(5.0, 100, true), 0.0);
        assert_eq!(score(5.0, 0, false), 0.0);
        assert_eq!(score(9999.0, 100, true), 0.0);
    }

    #[test]
    fn slow_host_keeps_loss_and_port_points() {
        assert_eq!(score(400.0, 0, true), 60.0);
        assert_eq!(score(400.0, 50, true), 40.0);
    }

    #[test]
    fn zero_iff_total_loss_or_unreachable() {
        for loss in 0..=100u8 {
            for latency in [0.0, 1.0, 33.3, 200.0, 9999.0] {
                for reachable in [true, false] {
                    let s = score(latency, loss, reachable);
                    assert!((0.0..=100.0).contains(&s));
                    assert_eq!(s == 0.0, loss == 100 || !reachable, "latency={latency} loss={loss} reachable={reachable}");
                }
            }
        }
    }

    #[test]
    fn monotonic_in_latency_and_loss() {
        let latencies = [0.0, 1.0, 10.0, 50.0, 199.0, 200.0, 500.0];
        for w in latencies.windows(2) {
            assert!(score(w[0], 10, true) >= score(w[1], 10, true));
        }
        for loss in 0..100u8 {
            assert!(score(20.0, loss, true) >= score(20.0, loss + 1, true));
        }
    }

    #[test]
    fn unmeasurable_has_no_score() {
        assert_eq!(score_measurement(&Measurement::Unmeasurable, true), None);
        assert_eq!(score_measurement(&Measurement::measured(10.0, 0), true), Some(98.0));
        assert_eq!(score_measurement(&Measurement::sentinel(), true), Some(0.0));
    }
}
