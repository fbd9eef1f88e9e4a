//! SM-2 variant with a daily-cementing phase and mastery-gated spacing
//!
//! The first fourteen successful reviews always come back the next day.
//! After that, only perfect recalls (quality 5) walk the progressive
//! interval ladder; quality 3-4 inches the interval forward by one day, and
//! anything below 3 resets the repetition count.

/// Successful reviews that stay at a one-day interval.
pub const DAILY_PHASE: i64 = 14;

/// Interval ladder for perfect recalls past the cementing phase, in days.
pub const MASTERY_STEPS: [i64; 11] = [3, 7, 14, 21, 30, 45, 60, 90, 120, 150, 180];

#[derive(Debug, Clone, Copy)]
pub struct Sm2Config {
    pub min_ease: f64,
    pub max_interval_days: i64,
}

impl Default for Sm2Config {
    fn default() -> Self {
        Self {
            min_ease: 1.3,
            max_interval_days: 180,
        }
    }
}

/// Scheduling state of one verse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReviewState {
    pub ease_factor: f64,
    pub interval_days: i64,
    pub repetitions: i64,
}

/// Apply one review of the given quality (0-5) to the state.
pub fn schedule(state: &ReviewState, quality: i64, config: &Sm2Config) -> ReviewState {
    let q = quality.clamp(0, 5) as f64;

    let ease_raw = state.ease_factor + (0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02));
    let ease_factor = round2(ease_raw.max(config.min_ease));

    if quality < 3 {
        return ReviewState {
            ease_factor,
            interval_days: 1,
            repetitions: 0,
        };
    }

    let repetitions = state.repetitions + 1;
    let interval_days = if repetitions <= DAILY_PHASE {
        1
    } else if quality == 5 {
        let step = (repetitions - DAILY_PHASE).min(MASTERY_STEPS.len() as i64) - 1;
        MASTERY_STEPS[step as usize]
    } else {
        state.interval_days + 1
    };

    ReviewState {
        ease_factor,
        interval_days: interval_days.min(config.max_interval_days),
        repetitions,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> ReviewState {
        ReviewState {
            ease_factor: 2.5,
            interval_days: 0,
            repetitions: 0,
        }
    }

    #[test]
    fn test_cementing_phase_stays_daily() {
        let config = Sm2Config::default();
        let mut state = fresh();
        for i in 1..=DAILY_PHASE {
            state = schedule(&state, 5, &config);
            assert_eq!(state.interval_days, 1, "review {i} should stay daily");
            assert_eq!(state.repetitions, i);
        }
    }

    #[test]
    fn test_mastery_ladder_after_cementing() {
        let config = Sm2Config::default();
        let mut state = fresh();
        for _ in 0..DAILY_PHASE {
            state = schedule(&state, 5, &config);
        }

        // Fifteenth perfect review steps onto the ladder
        state = schedule(&state, 5, &config);
        assert_eq!(state.interval_days, 3);
        // Sixteenth climbs it
        state = schedule(&state, 5, &config);
        assert_eq!(state.interval_days, 7);
        // A good-but-not-perfect recall only inches forward
        state = schedule(&state, 4, &config);
        assert_eq!(state.interval_days, 8);
    }

    #[test]
    fn test_failure_resets_repetitions() {
        let config = Sm2Config::default();
        let mut state = fresh();
        for _ in 0..20 {
            state = schedule(&state, 5, &config);
        }
        assert!(state.interval_days > 1);

        state = schedule(&state, 2, &config);
        assert_eq!(state.repetitions, 0);
        assert_eq!(state.interval_days, 1);
    }

    #[test]
    fn test_ladder_saturates_at_max() {
        let config = Sm2Config::default();
        let mut state = fresh();
        for _ in 0..60 {
            state = schedule(&state, 5, &config);
        }
        assert_eq!(state.interval_days, 180);
        assert!(state.ease_factor >= config.min_ease);
    }

    #[test]
    fn test_ease_floor() {
        let config = Sm2Config::default();
        let mut state = fresh();
        for _ in 0..30 {
            state = schedule(&state, 0, &config);
        }
        assert_eq!(state.ease_factor, config.min_ease);
    }

    #[test]
    fn test_ease_rounds_to_two_decimals() {
        let config = Sm2Config::default();
        let state = schedule(&fresh(), 4, &config);
        assert_eq!(state.ease_factor, 2.5); // 2.5 + (0.1 - 1*(0.08+0.02)) = 2.5
        let state = schedule(&fresh(), 3, &config);
        assert_eq!(state.ease_factor, 2.36);
    }

    #[test]
    fn test_interval_cap_from_config() {
        let config = Sm2Config {
            min_ease: 1.3,
            max_interval_days: 30,
        };
        let mut state = fresh();
        for _ in 0..40 {
            state = schedule(&state, 5, &config);
        }
        assert_eq!(state.interval_days, 30);
    }
}
