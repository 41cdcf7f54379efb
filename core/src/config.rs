use crate::{clock::secs_to_ticks, types::Tick};
use serde::{Deserialize, Serialize};

// ── Wanted ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WantedConfig {
    /// Ceiling for any wanted level.
    pub max_level: u32,
    /// How long a status lasts once set, indexed by level − 1.
    /// Levels past the end of the list reuse the last entry.
    pub duration_secs_by_level: Vec<u64>,
    /// Level at which the actor glows for on-duty enforcers.
    pub visibility_threshold: u32,
    /// Passive expiry sweep cadence.
    pub sweep_interval_ticks: Tick,
}

impl WantedConfig {
    pub fn duration_secs_for(&self, level: u32) -> u64 {
        if level == 0 || self.duration_secs_by_level.is_empty() {
            return 0;
        }
        let idx = (level as usize - 1).min(self.duration_secs_by_level.len() - 1);
        self.duration_secs_by_level[idx]
    }
}

// ── Chase ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaseConfig {
    pub max_distance: f64,
    /// Past this separation the enforcer is warned (rate-limited).
    pub warning_distance: f64,
    pub warning_cooldown_secs: f64,
    /// Soft budget; the monitor ends the chase once it is spent.
    pub duration_budget_secs: u64,
    pub monitor_interval_ticks: Tick,
    /// Zones a target may not be chased into.
    pub no_chase_zones: Vec<String>,
    /// When set, the monitor requests custody once the pair is this close.
    pub auto_capture_distance: Option<f64>,
    pub combat_secs: f64,
    pub block_capture_during_combat: bool,
}

impl ChaseConfig {
    pub fn combat_ticks(&self) -> Tick {
        secs_to_ticks(self.combat_secs)
    }

    pub fn warning_cooldown_ticks(&self) -> Tick {
        secs_to_ticks(self.warning_cooldown_secs)
    }

    pub fn duration_budget_ticks(&self) -> Tick {
        secs_to_ticks(self.duration_budget_secs as f64)
    }
}

// ── Custody ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyConfig {
    pub countdown_secs: u32,
    pub radius: f64,
    pub flee_threshold: f64,
    /// Wanted levels added when a target flees a countdown.
    pub flee_wanted_delta: u32,
    /// Remaining seconds at or below which both parties get a final warning.
    pub final_warning_secs: u32,
    pub base_jail_secs: u64,
    pub per_level_jail_secs: u64,
}

impl CustodyConfig {
    /// Custody duration for a target at the given wanted level.
    pub fn jail_secs_for(&self, level: u32) -> u64 {
        self.base_jail_secs + u64::from(level) * self.per_level_jail_secs
    }
}

// ── Minigame ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    /// Pointer reverses at either end of the bar.
    Bounce,
    /// Pointer wraps from the last cell back to the first.
    Cycle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedVariation {
    pub min_interval: u32,
    pub max_interval: u32,
    pub every_ticks: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscapeWanted {
    Clear,
    Bonus { levels: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinigameConfig {
    pub enabled: bool,
    pub bar_length: u32,
    pub success_start: u32,
    pub success_end: u32,
    pub edge_mode: EdgeMode,
    /// Ticks between pointer steps when speed variation is off.
    pub tick_interval: u32,
    #[serde(default)]
    pub speed_variation: Option<SpeedVariation>,
    pub miss_threshold: u32,
    pub impair_secs: u32,
    pub escape_wanted: EscapeWanted,
    pub escape_starts_chase: bool,
}

// ── Detection ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub assault_wanted_delta: u32,
    pub chase_on_assault: bool,
    pub contraband_wanted_delta: u32,
}

// ── Root ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentConfig {
    pub wanted: WantedConfig,
    pub chase: ChaseConfig,
    pub custody: CustodyConfig,
    pub minigame: MinigameConfig,
    pub detection: DetectionConfig,
}

impl IncidentConfig {
    /// Load from the data/ directory.
    /// In tests, use IncidentConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/incident/incident_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: IncidentConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    /// Auto-capture and the minigame are off (opt-in per test).
    pub fn default_test() -> Self {
        Self {
            wanted: WantedConfig {
                max_level: 5,
                duration_secs_by_level: vec![300, 600, 900, 1200, 1800],
                visibility_threshold: 3,
                sweep_interval_ticks: 1200,
            },
            chase: ChaseConfig {
                max_distance: 60.0,
                warning_distance: 45.0,
                warning_cooldown_secs: 5.0,
                duration_budget_secs: 300,
                monitor_interval_ticks: 10,
                no_chase_zones: vec!["chapel".into(), "infirmary".into()],
                auto_capture_distance: None,
                combat_secs: 10.0,
                block_capture_during_combat: true,
            },
            custody: CustodyConfig {
                countdown_secs: 10,
                radius: 5.0,
                flee_threshold: 2.5,
                flee_wanted_delta: 1,
                final_warning_secs: 3,
                base_jail_secs: 300,
                per_level_jail_secs: 60,
            },
            minigame: MinigameConfig {
                enabled: false, // disabled by default in tests (opt-in)
                bar_length: 10,
                success_start: 3,
                success_end: 5,
                edge_mode: EdgeMode::Bounce,
                tick_interval: 1,
                speed_variation: None,
                miss_threshold: 3,
                impair_secs: 5,
                escape_wanted: EscapeWanted::Clear,
                escape_starts_chase: false,
            },
            detection: DetectionConfig {
                assault_wanted_delta: 2,
                chase_on_assault: true,
                contraband_wanted_delta: 1,
            },
        }
    }

    pub fn with_minigame(mut self) -> Self {
        self.minigame.enabled = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_falls_back_to_last_entry() {
        let cfg = IncidentConfig::default_test().wanted;
        assert_eq!(cfg.duration_secs_for(0), 0);
        assert_eq!(cfg.duration_secs_for(1), 300);
        assert_eq!(cfg.duration_secs_for(5), 1800);
        assert_eq!(cfg.duration_secs_for(9), 1800);
    }

    #[test]
    fn jail_time_scales_with_level() {
        let cfg = IncidentConfig::default_test().custody;
        assert_eq!(cfg.jail_secs_for(0), 300);
        assert_eq!(cfg.jail_secs_for(3), 480);
    }

    #[test]
    fn bundled_data_file_parses() {
        let data_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../data");
        let cfg = IncidentConfig::load(data_dir).expect("load bundled config");
        assert!(cfg.minigame.enabled);
        assert!(cfg.chase.auto_capture_distance.is_some());
    }
}
