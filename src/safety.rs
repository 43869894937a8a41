//! Responsible-betting kernel: Dutch-book validation, Kelly sizing,
//! risk-of-ruin estimation, and the cool-off gate.
//!
//! Time is read through the [`Clock`] trait so tests advance a virtual
//! clock; the cool-off record is owned by the caller and threaded by
//! reference, never module state.

use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::prng::Prng;

/// Defaults for the configurable knobs.
pub const DEFAULT_KELLY_FRACTION: f64 = 0.25;
pub const DEFAULT_MAX_RISK: f64 = 0.05;
pub const DEFAULT_RUIN_TRAJECTORIES: usize = 10_000;
pub const DEFAULT_RUIN_MAX_BETS: usize = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub enum SafetyViolation {
    NegativeWeight { weight: f64 },
    ZeroTotal,
    DutchBook { sum: f64, margin: f64 },
    StakeUnsafe { fraction: f64, limit: f64 },
    KellyExceeded { fraction: f64, limit: f64 },
    CoolOff { remaining_seconds: f64 },
}

/// Knobs for stake safety and ruin estimation.
#[derive(Debug, Clone, Copy)]
pub struct SafetyConfig {
    pub kelly_fraction: f64,
    pub max_risk: f64,
    pub ruin_trajectories: usize,
    pub ruin_max_bets: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: DEFAULT_KELLY_FRACTION,
            max_risk: DEFAULT_MAX_RISK,
            ruin_trajectories: DEFAULT_RUIN_TRAJECTORIES,
            ruin_max_bets: DEFAULT_RUIN_MAX_BETS,
        }
    }
}

// --- Dutch book ------------------------------------------------------------

/// Success iff |Σp − 1| < tol over finite non-negative inputs.
pub fn validate(probs: &[f64], tolerance: f64) -> Result<(), SafetyViolation> {
    for p in probs {
        if *p < 0.0 {
            return Err(SafetyViolation::NegativeWeight { weight: *p });
        }
    }
    let sum: f64 = probs.iter().sum();
    let margin = (sum - 1.0).abs();
    if margin < tolerance {
        Ok(())
    } else {
        Err(SafetyViolation::DutchBook { sum, margin })
    }
}

/// Divide by the total; rejects negative weights and a zero total.
pub fn normalize(weights: &[f64]) -> Result<Vec<f64>, SafetyViolation> {
    for w in weights {
        if *w < 0.0 {
            return Err(SafetyViolation::NegativeWeight { weight: *w });
        }
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(SafetyViolation::ZeroTotal);
    }
    Ok(weights.iter().map(|w| w / total).collect())
}

/// A book of decimal odds is fair iff the implied probabilities 1/oᵢ pass
/// validation.
pub fn dutch_book_from_odds(odds: &[f64], tolerance: f64) -> Result<(), SafetyViolation> {
    if odds.iter().any(|o| *o <= 0.0) {
        return Err(SafetyViolation::ZeroTotal);
    }
    let implied: Vec<f64> = odds.iter().map(|o| 1.0 / o).collect();
    validate(&implied, tolerance)
}

// --- Kelly -----------------------------------------------------------------

/// `max(0, (p·b − (1−p)) / b)` for win probability `p` and net odds `b`.
pub fn kelly(p: f64, b: f64) -> f64 {
    if b <= 0.0 {
        return 0.0;
    }
    ((p * b - (1.0 - p)) / b).max(0.0)
}

/// Fractional-Kelly stake recommendation.
pub fn optimal_stake(bankroll: f64, p: f64, b: f64, fraction: f64) -> f64 {
    bankroll * kelly(p, b) * fraction
}

/// A stake is safe iff its bankroll fraction stays within the fractional
/// Kelly cap and the absolute risk cap.
pub fn check_stake(
    stake: f64,
    bankroll: f64,
    p: f64,
    b: f64,
    config: &SafetyConfig,
) -> Result<(), SafetyViolation> {
    if bankroll <= 0.0 {
        return Err(SafetyViolation::StakeUnsafe {
            fraction: f64::INFINITY,
            limit: config.max_risk,
        });
    }
    let fraction = stake / bankroll;
    let kelly_cap = config.kelly_fraction * kelly(p, b);
    if fraction > kelly_cap {
        return Err(SafetyViolation::KellyExceeded {
            fraction,
            limit: kelly_cap,
        });
    }
    if fraction > config.max_risk {
        return Err(SafetyViolation::StakeUnsafe {
            fraction,
            limit: config.max_risk,
        });
    }
    Ok(())
}

// --- Risk of ruin ----------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RuinParams {
    pub win_prob: f64,
    pub net_odds: f64,
    pub stake_fraction: f64,
    pub initial_wealth: f64,
    pub target_wealth: f64,
    pub ruin_threshold: f64,
}

/// Probability of hitting the ruin threshold before the target.
///
/// The symmetric fair game (`p = ½`, even odds) has the closed form
/// `(T − W₀)/T`; everything else is estimated by simulating fixed-stake
/// trajectories against the threaded PRNG.
pub fn risk_of_ruin(params: &RuinParams, config: &SafetyConfig, prng: &mut Prng) -> f64 {
    if params.initial_wealth <= params.ruin_threshold {
        return 1.0;
    }
    if params.initial_wealth >= params.target_wealth {
        return 0.0;
    }
    if params.win_prob == 0.5 && params.net_odds == 1.0 {
        let t = params.target_wealth;
        return ((t - params.initial_wealth) / t).clamp(0.0, 1.0);
    }

    let stake = params.stake_fraction * params.initial_wealth;
    let mut ruined = 0usize;
    for _ in 0..config.ruin_trajectories {
        let mut wealth = params.initial_wealth;
        for _ in 0..config.ruin_max_bets {
            if prng.next_f64() < params.win_prob {
                wealth += stake * params.net_odds;
            } else {
                wealth -= stake;
            }
            if wealth <= params.ruin_threshold {
                ruined += 1;
                break;
            }
            if wealth >= params.target_wealth {
                break;
            }
        }
    }
    ruined as f64 / config.ruin_trajectories as f64
}

// --- Clock -----------------------------------------------------------------

/// Injectable time source; seconds since the Unix epoch.
pub trait Clock {
    fn now(&self) -> f64;
}

impl<C: Clock + ?Sized> Clock for std::rc::Rc<C> {
    fn now(&self) -> f64 {
        (**self).now()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock {
    now: Cell<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn advance(&self, seconds: f64) {
        self.now.set(self.now.get() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

// --- Cool-off --------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoolOffPhase {
    Idle,
    Cooling { until: f64 },
}

/// Mutable gate state around bet execution. The only observably
/// time-dependent mutation in the runtime happens here, at the `try_bet`
/// call site.
#[derive(Debug, Clone)]
pub struct CoolOff {
    pub enabled: bool,
    pub period_seconds: f64,
    pub last_bet_time: Option<f64>,
    pub violations: u32,
    bet_times: Vec<f64>,
    self_excluded_until: Option<f64>,
}

impl CoolOff {
    pub fn new(period_seconds: f64) -> Self {
        Self {
            enabled: true,
            period_seconds,
            last_bet_time: None,
            violations: 0,
            bet_times: Vec::new(),
            self_excluded_until: None,
        }
    }

    pub fn disabled() -> Self {
        let mut state = Self::new(0.0);
        state.enabled = false;
        state
    }

    /// Base period scaled by the recent betting rate: 2× above 5 bets per
    /// minute, 4× above 10.
    pub fn effective_period(&self, now: f64) -> f64 {
        let recent = self
            .bet_times
            .iter()
            .filter(|t| now - **t <= 60.0)
            .count();
        let multiplier = if recent > 10 {
            4.0
        } else if recent > 5 {
            2.0
        } else {
            1.0
        };
        self.period_seconds * multiplier
    }

    pub fn phase(&self, now: f64) -> CoolOffPhase {
        // Self-exclusion is not bypassable by the enabled flag.
        if let Some(until) = self.self_excluded_until {
            if now < until {
                return CoolOffPhase::Cooling { until };
            }
        }
        if !self.enabled {
            return CoolOffPhase::Idle;
        }
        if let Some(last) = self.last_bet_time {
            let until = last + self.effective_period(now);
            if now < until {
                return CoolOffPhase::Cooling { until };
            }
        }
        CoolOffPhase::Idle
    }

    /// Gate one bet: on Idle, records the bet and opens a new cooling
    /// window; on Cooling, bumps the violation counter and reports the
    /// remaining seconds.
    pub fn try_bet(&mut self, now: f64) -> Result<(), SafetyViolation> {
        match self.phase(now) {
            CoolOffPhase::Cooling { until } => {
                self.violations += 1;
                Err(SafetyViolation::CoolOff {
                    remaining_seconds: until - now,
                })
            }
            CoolOffPhase::Idle => {
                self.last_bet_time = Some(now);
                self.bet_times.push(now);
                self.bet_times.retain(|t| now - *t <= 60.0);
                Ok(())
            }
        }
    }

    pub fn self_exclude(&mut self, now: f64, duration_seconds: f64) {
        self.self_excluded_until = Some(now + duration_seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_a_fair_book() {
        assert!(validate(&[0.5, 0.25, 0.25], 1e-10).is_ok());
    }

    #[test]
    fn validate_reports_sum_and_margin() {
        match validate(&[0.4, 0.4, 0.3], 1e-10).unwrap_err() {
            SafetyViolation::DutchBook { sum, margin } => {
                assert!((sum - 1.1).abs() < 1e-12);
                assert!((margin - 0.1).abs() < 1e-12);
            }
            other => panic!("expected dutch book violation, got {other:?}"),
        }
    }

    #[test]
    fn normalized_weights_always_validate() {
        let probs = normalize(&[3.0, 5.0, 2.0]).unwrap();
        assert!(validate(&probs, 1e-10).is_ok());
    }

    #[test]
    fn normalize_rejects_degenerate_input() {
        assert_eq!(
            normalize(&[1.0, -2.0]).unwrap_err(),
            SafetyViolation::NegativeWeight { weight: -2.0 }
        );
        assert_eq!(normalize(&[0.0, 0.0]).unwrap_err(), SafetyViolation::ZeroTotal);
    }

    #[test]
    fn fair_odds_pass_the_book_check() {
        // 1/2 + 1/4 + 1/4 = 1.
        assert!(dutch_book_from_odds(&[2.0, 4.0, 4.0], 1e-10).is_ok());
        assert!(dutch_book_from_odds(&[1.8, 3.5, 3.5], 1e-10).is_err());
    }

    #[test]
    fn kelly_matches_the_worked_example() {
        assert!((kelly(0.55, 2.0) - 0.325).abs() < 1e-12);
        assert!((optimal_stake(10_000.0, 0.55, 2.0, 0.25) - 812.5).abs() < 1e-9);
    }

    #[test]
    fn kelly_is_zero_for_losing_edges() {
        assert_eq!(kelly(0.3, 1.0), 0.0);
        assert_eq!(kelly(0.5, 0.0), 0.0);
        assert!(kelly(0.9, 1.0) > 0.0);
    }

    #[test]
    fn stake_checks_fire_in_order() {
        let config = SafetyConfig::default();
        // Quarter-Kelly cap for (0.55, 2.0) is 0.08125 of bankroll.
        assert!(check_stake(800.0, 10_000.0, 0.55, 2.0, &config).is_ok());
        assert!(matches!(
            check_stake(900.0, 10_000.0, 0.55, 2.0, &config),
            Err(SafetyViolation::KellyExceeded { .. })
        ));
        // Within quarter-Kelly for a huge edge but above the absolute cap.
        assert!(matches!(
            check_stake(1_200.0, 10_000.0, 0.9, 5.0, &config),
            Err(SafetyViolation::StakeUnsafe { .. })
        ));
    }

    #[test]
    fn fair_game_ruin_is_analytic() {
        let params = RuinParams {
            win_prob: 0.5,
            net_odds: 1.0,
            stake_fraction: 0.01,
            initial_wealth: 300.0,
            target_wealth: 1_000.0,
            ruin_threshold: 0.0,
        };
        let mut prng = Prng::seed(1);
        let ror = risk_of_ruin(&params, &SafetyConfig::default(), &mut prng);
        assert!((ror - 0.7).abs() < 1e-12);
    }

    #[test]
    fn favorable_games_ruin_less_often_than_unfavorable() {
        let config = SafetyConfig {
            ruin_trajectories: 2_000,
            ..SafetyConfig::default()
        };
        let base = RuinParams {
            win_prob: 0.6,
            net_odds: 1.0,
            stake_fraction: 0.05,
            initial_wealth: 100.0,
            target_wealth: 200.0,
            ruin_threshold: 0.0,
        };
        let mut prng = Prng::seed(7);
        let favorable = risk_of_ruin(&base, &config, &mut prng);
        let unfavorable = risk_of_ruin(
            &RuinParams {
                win_prob: 0.4,
                ..base
            },
            &config,
            &mut prng,
        );
        assert!(favorable < unfavorable);
    }

    #[test]
    fn ruin_is_deterministic_under_seed() {
        let params = RuinParams {
            win_prob: 0.45,
            net_odds: 1.0,
            stake_fraction: 0.1,
            initial_wealth: 100.0,
            target_wealth: 150.0,
            ruin_threshold: 0.0,
        };
        let config = SafetyConfig {
            ruin_trajectories: 500,
            ..SafetyConfig::default()
        };
        let a = risk_of_ruin(&params, &config, &mut Prng::seed(3));
        let b = risk_of_ruin(&params, &config, &mut Prng::seed(3));
        assert_eq!(a, b);
    }

    #[test]
    fn cool_off_blocks_and_counts_violations() {
        let clock = ManualClock::new(1_000.0);
        let mut state = CoolOff::new(5.0);
        assert!(state.try_bet(clock.now()).is_ok());
        match state.try_bet(clock.now()).unwrap_err() {
            SafetyViolation::CoolOff { remaining_seconds } => {
                assert!((remaining_seconds - 5.0).abs() < 1e-9);
            }
            other => panic!("expected cool-off, got {other:?}"),
        }
        assert_eq!(state.violations, 1);

        clock.advance(5.5);
        assert!(state.try_bet(clock.now()).is_ok());
    }

    #[test]
    fn disabled_gate_is_always_idle() {
        let mut state = CoolOff::disabled();
        for _ in 0..10 {
            assert!(state.try_bet(0.0).is_ok());
        }
        assert_eq!(state.violations, 0);
    }

    #[test]
    fn rapid_betting_stretches_the_period() {
        let clock = ManualClock::new(0.0);
        let mut state = CoolOff::new(1.0);
        // Six bets inside a minute pushes the rate over 5/min.
        for _ in 0..6 {
            assert!(state.try_bet(clock.now()).is_ok());
            clock.advance(1.5);
        }
        assert_eq!(state.effective_period(clock.now()), 2.0);
    }

    #[test]
    fn self_exclusion_ignores_the_enabled_flag() {
        let clock = ManualClock::new(0.0);
        let mut state = CoolOff::disabled();
        state.self_exclude(clock.now(), 3_600.0);
        assert!(matches!(
            state.try_bet(clock.now()),
            Err(SafetyViolation::CoolOff { .. })
        ));
        clock.advance(3_601.0);
        assert!(state.try_bet(clock.now()).is_ok());
    }
}
