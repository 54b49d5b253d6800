//! Volume and reverb actuation policy for the modulated condition.
//!
//! Volume follows the feature directly through a piecewise-linear curve.
//! Reverb is a reward: holding the feature high long enough raises it in
//! steps, and a sustained drop fades it back out.
//!
//! ```text
//!   value ≥ reward      reward zone   hold timer → +step every `reward_hold`
//!   decay ≤ value < rw  stable zone   decay timer cleared, nothing changes
//!   value < decay       decay zone    after `decay_delay`, −fade_step every
//!                                     `fade_interval` down to 0
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Piecewise-linear feature → volume mapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeCurve {
    /// Below this the output is silent
    pub silence_below: f64,
    /// Feature range of the main segment
    pub low_in: (f64, f64),
    /// Volume range of the main segment
    pub low_out: (f64, f64),
    /// Feature range of the upper segment; inputs are clamped to it
    pub high_in: (f64, f64),
    /// Volume range of the upper segment
    pub high_out: (f64, f64),
}

impl Default for VolumeCurve {
    fn default() -> Self {
        Self {
            silence_below: 30.0,
            low_in: (30.0, 80.0),
            low_out: (20.0, 90.0),
            high_in: (81.0, 100.0),
            high_out: (90.0, 127.0),
        }
    }
}

impl VolumeCurve {
    pub fn volume(&self, value: f64) -> u8 {
        let level = if value < self.silence_below {
            0.0
        } else if value <= self.low_in.1 {
            interp(value, self.low_in, self.low_out)
        } else {
            interp(value, self.high_in, self.high_out)
        };
        level.clamp(0.0, 127.0) as u8
    }
}

/// Linear interpolation with the input clamped to `input`.
fn interp(value: f64, (x0, x1): (f64, f64), (y0, y1): (f64, f64)) -> f64 {
    if x1 <= x0 {
        return y0;
    }
    let x = value.clamp(x0, x1);
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

/// Tunables for the policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Feature at or above which the reward timer runs
    pub reward_threshold: f64,
    /// Feature below which reverb decays
    pub decay_threshold: f64,
    /// Continuous reward time needed per reverb step
    #[serde(with = "crate::config::duration_serde")]
    pub reward_hold: Duration,
    pub reverb_step: u8,
    pub reverb_max: u8,
    /// Reverb level at session start
    #[serde(default)]
    pub reverb_initial: u8,
    /// Continuous decay-zone time before fading starts
    #[serde(with = "crate::config::duration_serde")]
    pub decay_delay: Duration,
    pub fade_step: u8,
    /// Minimum spacing between fades
    #[serde(with = "crate::config::duration_serde")]
    pub fade_interval: Duration,
    #[serde(default)]
    pub volume: VolumeCurve,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            reward_threshold: 70.0,
            decay_threshold: 60.0,
            reward_hold: Duration::from_secs(60),
            reverb_step: 15,
            reverb_max: 100,
            reverb_initial: 0,
            decay_delay: Duration::from_secs(30),
            fade_step: 5,
            fade_interval: Duration::from_secs(2),
            volume: VolumeCurve::default(),
        }
    }
}

/// Which reverb zone a tick fell in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Reward,
    Stable,
    Decay,
}

/// Mutable policy state. Timestamps are session-clock offsets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyState {
    pub volume: u8,
    pub reverb_level: u8,
    pub reward_hold_start: Option<Duration>,
    pub decay_start: Option<Duration>,
    pub last_fade: Option<Duration>,
}

/// What one tick asks the actuator to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyOutput {
    pub volume: u8,
    /// New reverb level if it changed this tick
    pub reverb: Option<u8>,
    /// Reverb level after this tick
    pub reverb_level: u8,
    pub zone: Zone,
}

/// The reward/decay state machine.
#[derive(Debug, Clone)]
pub struct ActuationPolicy {
    config: PolicyConfig,
    state: PolicyState,
}

impl ActuationPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        let state = PolicyState {
            reverb_level: config.reverb_initial.min(config.reverb_max),
            ..PolicyState::default()
        };
        Self { config, state }
    }

    pub fn state(&self) -> &PolicyState {
        &self.state
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Return to the session-start state.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    pub fn zone(&self, value: f64) -> Zone {
        if value >= self.config.reward_threshold {
            Zone::Reward
        } else if value < self.config.decay_threshold {
            Zone::Decay
        } else {
            Zone::Stable
        }
    }

    /// Advance one tick with a fresh feature value observed at `now`.
    ///
    /// Ticks without a feature must not call this; skipping leaves every
    /// timer where it was.
    pub fn update(&mut self, value: f64, now: Duration) -> PolicyOutput {
        self.state.volume = self.config.volume.volume(value);

        let zone = self.zone(value);
        let before = self.state.reverb_level;
        match zone {
            Zone::Reward => self.on_reward(now),
            Zone::Decay => self.on_decay(now),
            Zone::Stable => self.state.decay_start = None,
        }
        let after = self.state.reverb_level;

        PolicyOutput {
            volume: self.state.volume,
            reverb: (after != before).then_some(after),
            reverb_level: after,
            zone,
        }
    }

    fn on_reward(&mut self, now: Duration) {
        let state = &mut self.state;
        state.decay_start = None;

        match state.reward_hold_start {
            None => state.reward_hold_start = Some(now),
            Some(start) if now.saturating_sub(start) >= self.config.reward_hold => {
                state.reverb_level = state
                    .reverb_level
                    .saturating_add(self.config.reverb_step)
                    .min(self.config.reverb_max);
                state.reward_hold_start = Some(now);
            }
            Some(_) => {}
        }
    }

    fn on_decay(&mut self, now: Duration) {
        let state = &mut self.state;
        state.reward_hold_start = None;

        let Some(start) = state.decay_start else {
            state.decay_start = Some(now);
            return;
        };
        if now.saturating_sub(start) < self.config.decay_delay {
            return;
        }
        let spaced = state
            .last_fade
            .map_or(true, |last| now.saturating_sub(last) >= self.config.fade_interval);
        if spaced && state.reverb_level > 0 {
            state.reverb_level = state.reverb_level.saturating_sub(self.config.fade_step);
            state.last_fade = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_volume_breakpoints() {
        let curve = VolumeCurve::default();
        assert_eq!(curve.volume(0.0), 0);
        assert_eq!(curve.volume(29.9), 0);
        assert_eq!(curve.volume(30.0), 20);
        assert_eq!(curve.volume(55.0), 55);
        assert_eq!(curve.volume(80.0), 90);
        assert_eq!(curve.volume(80.5), 90);
        assert_eq!(curve.volume(81.0), 90);
        assert_eq!(curve.volume(100.0), 127);
        assert_eq!(curve.volume(250.0), 127);
    }

    #[test]
    fn test_volume_monotonic() {
        let curve = VolumeCurve::default();
        let mut last = 0;
        for i in 0..=1000 {
            let v = curve.volume(i as f64 / 10.0);
            assert!(v >= last, "volume dropped at {}", i as f64 / 10.0);
            last = v;
        }
    }

    #[test]
    fn test_reward_needs_full_hold() {
        let mut policy = ActuationPolicy::new(PolicyConfig::default());
        for t in 0..60 {
            let out = policy.update(75.0, secs(t));
            assert_eq!(out.reverb, None, "early reward at {t}s");
        }
        let out = policy.update(75.0, secs(60));
        assert_eq!(out.reverb, Some(15));
        assert_eq!(policy.state().reward_hold_start, Some(secs(60)));
    }

    #[test]
    fn test_reward_window_restarts_after_increment() {
        let mut policy = ActuationPolicy::new(PolicyConfig::default());
        let mut increments = Vec::new();
        for t in 0..=180 {
            if policy.update(90.0, secs(t)).reverb.is_some() {
                increments.push(t);
            }
        }
        assert_eq!(increments, vec![60, 120, 180]);
        assert_eq!(policy.state().reverb_level, 45);
    }

    #[test]
    fn test_reverb_clamped_at_max() {
        let mut policy = ActuationPolicy::new(PolicyConfig::default());
        for t in 0..=3600 {
            policy.update(95.0, secs(t));
            assert!(policy.state().reverb_level <= 100);
        }
        assert_eq!(policy.state().reverb_level, 100);
    }

    #[test]
    fn test_stable_zone_keeps_reward_timer() {
        let mut policy = ActuationPolicy::new(PolicyConfig::default());
        policy.update(75.0, secs(0));
        policy.update(65.0, secs(30));
        assert_eq!(policy.state().reward_hold_start, Some(secs(0)));

        let out = policy.update(75.0, secs(60));
        assert_eq!(out.reverb, Some(15));
    }

    #[test]
    fn test_decay_zone_resets_reward() {
        let mut policy = ActuationPolicy::new(PolicyConfig::default());
        policy.update(75.0, secs(0));
        policy.update(50.0, secs(40));
        assert_eq!(policy.state().reward_hold_start, None);

        for t in 41..100 {
            assert_eq!(policy.update(75.0, secs(t)).reverb, None, "at {t}s");
        }
        assert_eq!(policy.update(75.0, secs(101)).reverb, Some(15));
    }

    #[test]
    fn test_decay_delay_and_spacing() {
        let mut policy = ActuationPolicy::new(PolicyConfig {
            reverb_initial: 22,
            ..PolicyConfig::default()
        });
        let mut fades = Vec::new();
        for t in 0..=60 {
            if let Some(level) = policy.update(40.0, secs(t)).reverb {
                fades.push((t, level));
            }
        }
        assert_eq!(fades, vec![(30, 17), (32, 12), (34, 7), (36, 2), (38, 0)]);
        assert_eq!(policy.state().last_fade, Some(secs(38)));
    }

    #[test]
    fn test_timers_never_both_set() {
        let mut policy = ActuationPolicy::new(PolicyConfig::default());
        let values = [75.0, 50.0, 65.0, 80.0, 20.0, 69.9, 70.0, 59.9, 60.0];
        for t in 0..500u64 {
            let value = values[(t as usize * 7 + t as usize / 13) % values.len()];
            policy.update(value, secs(t));
            let state = policy.state();
            assert!(state.reward_hold_start.is_none() || state.decay_start.is_none());
        }
    }

    #[test]
    fn test_zone_boundaries() {
        let policy = ActuationPolicy::new(PolicyConfig::default());
        assert_eq!(policy.zone(70.0), Zone::Reward);
        assert_eq!(policy.zone(69.99), Zone::Stable);
        assert_eq!(policy.zone(60.0), Zone::Stable);
        assert_eq!(policy.zone(59.99), Zone::Decay);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut policy = ActuationPolicy::new(PolicyConfig::default());
        for t in 0..=60 {
            policy.update(90.0, secs(t));
        }
        policy.reset();
        assert_eq!(policy.state(), &PolicyState::default());
    }
}
