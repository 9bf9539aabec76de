//! gNodeB configuration file
//!
//! The cell list and scheduler arguments are read from YAML or TOML, chosen
//! by the file extension. Every section is optional and falls back to the
//! built-in single-cell FDD setup.

use std::path::Path;

use anyhow::{anyhow, Context};
use common::types::SubcarrierSpacing;
use num_traits::FromPrimitive;
use sched::config::{default_cell_config, CellConfig, SchedArgs};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GnbConfig {
    /// Carriers served by the scheduler, the index is the cell index
    #[serde(default = "default_cells")]
    pub cells: Vec<CellConfig>,
    /// Scheduler arguments
    #[serde(default)]
    pub sched: SchedArgs,
    /// Emulated UE population
    #[serde(default)]
    pub emulation: EmulationConfig,
    /// Metrics reporting
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_cells() -> Vec<CellConfig> {
    vec![default_cell_config()]
}

/// Emulated UEs attached through the loopback PHY
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmulationConfig {
    /// Number of UEs
    #[serde(default = "default_nof_ues")]
    pub nof_ues: u16,
    /// First TC-RNTI handed out
    #[serde(default = "default_first_rnti")]
    pub first_rnti: u16,
    /// Mean DL traffic per UE in bytes per slot
    #[serde(default = "default_dl_rate")]
    pub dl_bytes_per_slot: u32,
    /// Mean UL traffic per UE in bytes per slot
    #[serde(default = "default_ul_rate")]
    pub ul_bytes_per_slot: u32,
    /// Block error rate applied to every transport block
    #[serde(default = "default_bler")]
    pub bler: f64,
    /// Period of the CQI reports in slots
    #[serde(default = "default_cqi_period")]
    pub cqi_period_slots: u32,
    /// Seed of the traffic and channel draws
    #[serde(default)]
    pub seed: u64,
}

fn default_nof_ues() -> u16 {
    4
}

fn default_first_rnti() -> u16 {
    0x4601
}

fn default_dl_rate() -> u32 {
    500
}

fn default_ul_rate() -> u32 {
    100
}

fn default_bler() -> f64 {
    0.1
}

fn default_cqi_period() -> u32 {
    20
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            nof_ues: default_nof_ues(),
            first_rnti: default_first_rnti(),
            dl_bytes_per_slot: default_dl_rate(),
            ul_bytes_per_slot: default_ul_rate(),
            bler: default_bler(),
            cqi_period_slots: default_cqi_period(),
            seed: 0,
        }
    }
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Reporting period in seconds, 0 disables the report
    #[serde(default = "default_metrics_period")]
    pub period_secs: u64,
    /// Print the report as JSON instead of a summary line per cell
    #[serde(default)]
    pub json: bool,
}

fn default_metrics_period() -> u64 {
    5
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            period_secs: default_metrics_period(),
            json: false,
        }
    }
}

impl Default for GnbConfig {
    fn default() -> Self {
        Self {
            cells: default_cells(),
            sched: SchedArgs::default(),
            emulation: EmulationConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl GnbConfig {
    /// Load configuration from a YAML (`.yml`, `.yaml`) or TOML (`.toml`) file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("cannot read configuration file {}", path))?;
        let extension = Path::new(path).extension().and_then(|e| e.to_str()).unwrap_or("");
        match extension {
            "yml" | "yaml" => Self::from_yaml_str(&contents),
            "toml" => Self::from_toml_str(&contents),
            other => Err(anyhow!("unsupported configuration format '{}'", other)),
        }
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Override the subcarrier spacing of every cell, given in kHz
    pub fn set_scs_khz(&mut self, scs_khz: u32) -> anyhow::Result<()> {
        let scs = SubcarrierSpacing::from_u32(scs_khz)
            .ok_or_else(|| anyhow!("Invalid subcarrier spacing: {} kHz", scs_khz))?;
        for cell in &mut self.cells {
            cell.scs = scs;
        }
        Ok(())
    }

    /// Subcarrier spacing driving the slot clock
    pub fn scs(&self) -> anyhow::Result<SubcarrierSpacing> {
        let first = self.cells.first().ok_or_else(|| anyhow!("no cell configured"))?.scs;
        if self.cells.iter().any(|c| c.scs != first) {
            return Err(anyhow!("all cells must share the same subcarrier spacing"));
        }
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched::config::PolicyKind;

    #[test]
    fn test_yaml_roundtrip() {
        let config = GnbConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = GnbConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.cells, config.cells);
        assert_eq!(parsed.sched, config.sched);
        assert_eq!(parsed.emulation.nof_ues, 4);
    }

    #[test]
    fn test_toml_sections_are_optional() {
        let toml = r#"
            [sched]
            policy = "ProportionalFair"
            max_dl_grants_per_slot = 4

            [emulation]
            nof_ues = 2
            bler = 0.0
        "#;
        let config = GnbConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.sched.policy, PolicyKind::ProportionalFair);
        assert_eq!(config.sched.max_dl_grants_per_slot, 4);
        assert_eq!(config.sched.common_mcs, 4);
        assert_eq!(config.emulation.nof_ues, 2);
        assert_eq!(config.emulation.first_rnti, 0x4601);
        assert_eq!(config.cells.len(), 1);
        assert_eq!(config.metrics.period_secs, 5);
    }

    #[test]
    fn test_scs_override() {
        let mut config = GnbConfig::default();
        config.set_scs_khz(30).unwrap();
        assert_eq!(config.scs().unwrap(), SubcarrierSpacing::Scs30);
        assert!(config.set_scs_khz(45).is_err());
    }

    #[test]
    fn test_unknown_extension() {
        assert!(GnbConfig::from_file("/nonexistent/gnb.conf").is_err());
    }
}
