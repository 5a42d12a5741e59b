//! Phase-weighted progress aggregation.
//!
//! Every backend reports phase-local progress; the aggregator maps it into
//! one 0-100 scale and guarantees the emitted percent never decreases,
//! even when a backend reports a phase out of order.

use crate::error::{EngineResult, RenderError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Compose,
    Encode,
    Finalize,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Compose => "compose",
            Phase::Encode => "encode",
            Phase::Finalize => "finalize",
        }
    }
}

/// A single typed progress value, emitted 0..N times per render.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// Global percent in `[0, 100]`, monotonically non-decreasing.
    pub percent: f64,
    pub message: String,
}

pub struct ProgressAggregator {
    phases: Vec<(Phase, f64)>,
    total_weight: f64,
    high_water: f64,
}

impl ProgressAggregator {
    pub fn new(phases: &[(Phase, f64)]) -> EngineResult<Self> {
        if phases.is_empty() {
            return Err(RenderError::validation("progress phases must be non-empty"));
        }
        for (phase, weight) in phases {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(RenderError::validation(format!(
                    "progress phase '{}' weight must be finite and > 0",
                    phase.as_str()
                )));
            }
        }
        let total_weight = phases.iter().map(|(_, w)| w).sum();
        Ok(Self {
            phases: phases.to_vec(),
            total_weight,
            high_water: 0.0,
        })
    }

    /// Map a phase-local percent into the global scale:
    /// `range_start + local/100 * width` with `width = weight/total * 100`.
    pub fn global_percent(&self, phase: Phase, local_percent: f64) -> f64 {
        let local = local_percent.clamp(0.0, 100.0);
        let mut range_start = 0.0;
        for (p, weight) in &self.phases {
            let width = weight / self.total_weight * 100.0;
            if *p == phase {
                return range_start + local / 100.0 * width;
            }
            range_start += width;
        }
        tracing::warn!(phase = phase.as_str(), "progress phase not declared");
        self.high_water
    }

    /// Build the clamped event for a phase-local report.
    pub fn event(&mut self, phase: Phase, local_percent: f64, message: impl Into<String>) -> ProgressEvent {
        let raw = self.global_percent(phase, local_percent);
        self.high_water = self.high_water.max(raw);
        ProgressEvent {
            phase,
            percent: self.high_water,
            message: message.into(),
        }
    }
}
