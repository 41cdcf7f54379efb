//! Skill-check minigame run during a custody countdown.
//!
//! A pointer oscillates along a bar; the target presses to stop it inside
//! the success window. The engine only reports verdicts. Custody decides
//! what a hit or a miss means.

use crate::{
    config::{EdgeMode, MinigameConfig},
    rng::SubsystemRng,
    subsystem::{ui_logged, TickContext},
    types::{ActorId, Tick},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinigameState {
    pub pointer_index:         u32,
    pub direction:             i8,
    pub current_tick_interval: u32,
    pub ticks_until_step:      u32,
    pub ticks_until_reroll:    u32,
    pub miss_count:            u32,
    pub ends_at:               Tick,
}

impl MinigameState {
    fn new(config: &MinigameConfig, ends_at: Tick, rng: &mut SubsystemRng) -> Self {
        let interval = match &config.speed_variation {
            Some(v) => rng.range_inclusive(v.min_interval, v.max_interval).max(1),
            None => config.tick_interval.max(1),
        };
        Self {
            pointer_index:         0,
            direction:             1,
            current_tick_interval: interval,
            ticks_until_step:      interval,
            ticks_until_reroll:    config.speed_variation.as_ref().map(|v| v.every_ticks).unwrap_or(0),
            miss_count:            0,
            ends_at,
        }
    }

    /// Advance one tick. Returns true when the pointer moved.
    fn advance(&mut self, config: &MinigameConfig, rng: &mut SubsystemRng) -> bool {
        if let Some(variation) = &config.speed_variation {
            self.ticks_until_reroll = self.ticks_until_reroll.saturating_sub(1);
            if self.ticks_until_reroll == 0 {
                self.current_tick_interval =
                    rng.range_inclusive(variation.min_interval, variation.max_interval).max(1);
                self.ticks_until_reroll = variation.every_ticks.max(1);
            }
        }

        self.ticks_until_step = self.ticks_until_step.saturating_sub(1);
        if self.ticks_until_step > 0 {
            return false;
        }
        self.ticks_until_step = self.current_tick_interval;
        self.step(config.bar_length.max(1), config.edge_mode);
        true
    }

    fn step(&mut self, bar_length: u32, edge_mode: EdgeMode) {
        let last = bar_length - 1;
        match edge_mode {
            EdgeMode::Cycle => {
                self.direction = 1;
                self.pointer_index = if self.pointer_index >= last { 0 } else { self.pointer_index + 1 };
            }
            EdgeMode::Bounce => {
                if last == 0 {
                    return;
                }
                if self.direction > 0 && self.pointer_index >= last {
                    self.direction = -1;
                } else if self.direction < 0 && self.pointer_index == 0 {
                    self.direction = 1;
                }
                self.pointer_index = if self.direction > 0 {
                    self.pointer_index + 1
                } else {
                    self.pointer_index - 1
                };
            }
        }
    }
}

/// What the target sees each time the pointer moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinigameFrame {
    pub pointer:        u32,
    pub bar_length:     u32,
    pub success_start:  u32,
    pub success_end:    u32,
    pub misses:         u32,
    pub miss_threshold: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinigameVerdict {
    Hit,
    Miss { misses: u32, threshold_reached: bool },
}

pub struct MinigameEngine {
    config: MinigameConfig,
    states: BTreeMap<ActorId, MinigameState>,
}

impl MinigameEngine {
    pub fn new(config: MinigameConfig) -> Self {
        Self { config, states: BTreeMap::new() }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_active(&self, target: &str) -> bool {
        self.states.contains_key(target)
    }

    pub fn state_of(&self, target: &str) -> Option<&MinigameState> {
        self.states.get(target)
    }

    pub fn states(&self) -> impl Iterator<Item = (&ActorId, &MinigameState)> {
        self.states.iter()
    }

    pub fn active_count(&self) -> usize {
        self.states.len()
    }

    /// Begin a minigame for `target`, replacing any stale one.
    pub fn start(&mut self, target: &str, ends_at: Tick, ctx: &mut TickContext<'_>) {
        let state = MinigameState::new(&self.config, ends_at, ctx.rng);
        let frame = self.frame(&state);
        self.states.insert(target.to_string(), state);
        ui_logged(ctx.world.render_minigame(target, &frame), ctx.tick, "minigame frame");
        log::debug!("tick={} minigame: started for {target}", ctx.tick);
    }

    /// Returns true if a minigame was running.
    pub fn stop(&mut self, target: &str) -> bool {
        self.states.remove(target).is_some()
    }

    /// Step every pointer and drop minigames past their end.
    pub fn tick(&mut self, ctx: &mut TickContext<'_>) {
        let expired: Vec<ActorId> = self
            .states
            .iter()
            .filter(|(_, s)| ctx.tick >= s.ends_at)
            .map(|(target, _)| target.clone())
            .collect();
        for target in expired {
            self.states.remove(&target);
            log::debug!("tick={} minigame: expired for {target}", ctx.tick);
        }

        let mut frames = Vec::new();
        for (target, state) in self.states.iter_mut() {
            if state.advance(&self.config, ctx.rng) {
                frames.push((target.clone(), state.pointer_index, state.miss_count));
            }
        }
        for (target, pointer, misses) in frames {
            let frame = MinigameFrame {
                pointer,
                bar_length:     self.config.bar_length,
                success_start:  self.config.success_start,
                success_end:    self.config.success_end,
                misses,
                miss_threshold: self.config.miss_threshold,
            };
            ui_logged(ctx.world.render_minigame(&target, &frame), ctx.tick, "minigame frame");
        }
    }

    /// Judge a key press. `None` when no minigame is running for `target`.
    /// A hit, or a miss that reaches the threshold, ends the minigame.
    pub fn input(&mut self, target: &str) -> Option<MinigameVerdict> {
        let pointer = self.states.get(target)?.pointer_index;
        if self.window_contains(pointer) {
            self.states.remove(target);
            return Some(MinigameVerdict::Hit);
        }

        let state = self.states.get_mut(target)?;
        state.miss_count += 1;
        let misses = state.miss_count;
        let threshold_reached = misses >= self.config.miss_threshold;
        if threshold_reached {
            self.states.remove(target);
        }
        Some(MinigameVerdict::Miss { misses, threshold_reached })
    }

    /// The window forgives one cell on either side.
    pub fn window_contains(&self, pointer: u32) -> bool {
        pointer + 1 >= self.config.success_start && pointer <= self.config.success_end + 1
    }

    fn frame(&self, state: &MinigameState) -> MinigameFrame {
        MinigameFrame {
            pointer:        state.pointer_index,
            bar_length:     self.config.bar_length,
            success_start:  self.config.success_start,
            success_end:    self.config.success_end,
            misses:         state.miss_count,
            miss_threshold: self.config.miss_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IncidentConfig, SpeedVariation};

    fn config() -> MinigameConfig {
        IncidentConfig::default_test().with_minigame().minigame
    }

    fn pointers(config: &MinigameConfig, steps: usize) -> Vec<u32> {
        let mut rng = SubsystemRng::new(3, 2);
        let mut state = MinigameState::new(config, Tick::MAX, &mut rng);
        let mut seen = Vec::new();
        while seen.len() < steps {
            if state.advance(config, &mut rng) {
                seen.push(state.pointer_index);
            }
        }
        seen
    }

    #[test]
    fn window_forgives_one_cell_each_side() {
        let engine = MinigameEngine::new(config());
        assert!(engine.window_contains(2));
        assert!(engine.window_contains(6));
        assert!(!engine.window_contains(1));
        assert!(!engine.window_contains(7));
    }

    #[test]
    fn bounce_reverses_at_both_edges() {
        let mut cfg = config();
        cfg.bar_length = 4;
        assert_eq!(pointers(&cfg, 8), vec![1, 2, 3, 2, 1, 0, 1, 2]);
    }

    #[test]
    fn cycle_wraps_to_start() {
        let mut cfg = config();
        cfg.bar_length = 3;
        cfg.edge_mode = EdgeMode::Cycle;
        assert_eq!(pointers(&cfg, 5), vec![1, 2, 0, 1, 2]);
    }

    #[test]
    fn slower_interval_steps_less_often() {
        let mut cfg = config();
        cfg.tick_interval = 3;
        let mut rng = SubsystemRng::new(3, 2);
        let mut state = MinigameState::new(&cfg, Tick::MAX, &mut rng);
        let moved: Vec<bool> = (0..6).map(|_| state.advance(&cfg, &mut rng)).collect();
        assert_eq!(moved, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn rerolled_interval_stays_in_range() {
        let mut cfg = config();
        cfg.speed_variation = Some(SpeedVariation { min_interval: 2, max_interval: 4, every_ticks: 5 });
        let mut rng = SubsystemRng::new(11, 2);
        let mut state = MinigameState::new(&cfg, Tick::MAX, &mut rng);
        for _ in 0..200 {
            state.advance(&cfg, &mut rng);
            assert!((2..=4).contains(&state.current_tick_interval));
        }
    }

    #[test]
    fn misses_accumulate_until_threshold() {
        let mut engine = MinigameEngine::new(config());
        let mut rng = SubsystemRng::new(1, 2);
        engine.states.insert("inmate".into(), MinigameState::new(&engine.config, 100, &mut rng));

        // Pointer sits at 0, outside the window.
        assert_eq!(engine.input("inmate"), Some(MinigameVerdict::Miss { misses: 1, threshold_reached: false }));
        assert_eq!(engine.input("inmate"), Some(MinigameVerdict::Miss { misses: 2, threshold_reached: false }));
        assert_eq!(engine.input("inmate"), Some(MinigameVerdict::Miss { misses: 3, threshold_reached: true }));
        assert!(!engine.is_active("inmate"));
        assert_eq!(engine.input("inmate"), None);
    }

    #[test]
    fn hit_ends_the_minigame() {
        let mut engine = MinigameEngine::new(config());
        let mut rng = SubsystemRng::new(1, 2);
        let mut state = MinigameState::new(&engine.config, 100, &mut rng);
        state.pointer_index = 4;
        engine.states.insert("inmate".into(), state);
        assert_eq!(engine.input("inmate"), Some(MinigameVerdict::Hit));
        assert!(!engine.is_active("inmate"));
    }
}
