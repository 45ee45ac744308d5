//! Thermostat state.

use crate::{CheckpointError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Thermostat {
    #[default]
    Off,
    Langevin { kt: f64, gamma: f64 },
    Brownian { kt: f64, gamma: f64 },
}

impl Thermostat {
    pub fn langevin(kt: f64, gamma: f64) -> Result<Self> {
        Self::check(kt, gamma)?;
        Ok(Self::Langevin { kt, gamma })
    }

    pub fn brownian(kt: f64, gamma: f64) -> Result<Self> {
        Self::check(kt, gamma)?;
        Ok(Self::Brownian { kt, gamma })
    }

    fn check(kt: f64, gamma: f64) -> Result<()> {
        if !(kt.is_finite() && gamma.is_finite() && kt >= 0.0 && gamma >= 0.0) {
            return Err(CheckpointError::validation(format!(
                "kT and gamma must be finite and non-negative, got {kt} and {gamma}"
            )));
        }
        Ok(())
    }

    /// Check parameters set by assigning a variant directly
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Off => Ok(()),
            Self::Langevin { kt, gamma } | Self::Brownian { kt, gamma } => Self::check(kt, gamma),
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Named parameters of the active thermostat
    pub fn state(&self) -> Vec<(&'static str, f64)> {
        match *self {
            Self::Off => Vec::new(),
            Self::Langevin { kt, gamma } | Self::Brownian { kt, gamma } => {
                vec![("kT", kt), ("gamma", gamma)]
            }
        }
    }
}
