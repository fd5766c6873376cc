//! Distribution configuration, loaded from JSON.
//!
//! Every field has a default, so `{}` is a valid configuration. Rational
//! values are written as strings (`"740"`, `"1/3"`, `"12.5"`) or integers.
//!
//! ```json
//! {
//!   "system_width": "740",
//!   "first_system_indent": "60",
//!   "constraints": { "forced_breaks": [16], "keep_together": [{ "start": 3, "end": 5 }] }
//! }
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::distribution::{Constraints, Policies};
use crate::error::{DistributionError, Result};
use crate::policy::{BreakPenalty, FirstSystemIndent, NoPenalty, PageBudget, PreferredBreaks};
use crate::rational::{int, serde_str, Rational};

// Page geometry defaults (820-wide page, 50 left and 30 right margin).
pub const DEFAULT_SYSTEM_WIDTH: i64 = 740;
pub const DEFAULT_PAGE_HEIGHT: i64 = 1100;
pub const DEFAULT_SYSTEM_GAP: i64 = 90;
pub const DEFAULT_SYSTEM_HEIGHT: i64 = 40;
pub const DEFAULT_PREFERRED_BREAK_PENALTY: i64 = 50;
pub const DEFAULT_MAX_REFLOWS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DistributionConfig {
    #[serde(with = "serde_str")]
    pub system_width: Rational,
    /// Width taken from the first system only
    #[serde(with = "serde_str")]
    pub first_system_indent: Rational,
    #[serde(with = "serde_str")]
    pub page_height: Rational,
    /// Vertical space between consecutive systems on a page
    #[serde(with = "serde_str")]
    pub system_gap: Rational,
    /// Height of a system whose stacks report none
    #[serde(with = "serde_str")]
    pub system_height: Rational,
    /// Stack positions where a system break costs nothing extra
    pub preferred_breaks: BTreeSet<usize>,
    #[serde(with = "serde_str")]
    pub preferred_break_penalty: Rational,
    pub max_reflows: usize,
    pub constraints: Constraints,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            system_width: int(DEFAULT_SYSTEM_WIDTH),
            first_system_indent: Rational::zero(),
            page_height: int(DEFAULT_PAGE_HEIGHT),
            system_gap: int(DEFAULT_SYSTEM_GAP),
            system_height: int(DEFAULT_SYSTEM_HEIGHT),
            preferred_breaks: BTreeSet::new(),
            preferred_break_penalty: int(DEFAULT_PREFERRED_BREAK_PENALTY),
            max_reflows: DEFAULT_MAX_REFLOWS,
            constraints: Constraints::default(),
        }
    }
}

impl DistributionConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        log::debug!("loading distribution config from {}", path.display());
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject geometry no layout could satisfy.
    pub fn validate(&self) -> Result<()> {
        let zero = Rational::zero();
        if self.system_width <= zero {
            return Err(DistributionError::config(format!(
                "system_width must be positive, got {}",
                self.system_width
            )));
        }
        if self.first_system_indent < zero || self.first_system_indent >= self.system_width {
            return Err(DistributionError::config(format!(
                "first_system_indent must lie in [0, {}), got {}",
                self.system_width, self.first_system_indent
            )));
        }
        if self.page_height <= zero {
            return Err(DistributionError::config(format!(
                "page_height must be positive, got {}",
                self.page_height
            )));
        }
        if self.system_gap < zero {
            return Err(DistributionError::config(format!(
                "system_gap must not be negative, got {}",
                self.system_gap
            )));
        }
        if self.system_height <= zero {
            return Err(DistributionError::config(format!(
                "system_height must be positive, got {}",
                self.system_height
            )));
        }
        if self.preferred_break_penalty < zero {
            return Err(DistributionError::config(format!(
                "preferred_break_penalty must not be negative, got {}",
                self.preferred_break_penalty
            )));
        }
        Ok(())
    }

    pub fn width_policy(&self) -> FirstSystemIndent {
        FirstSystemIndent {
            width: self.system_width.clone(),
            indent: self.first_system_indent.clone(),
        }
    }

    pub fn height_policy(&self) -> PageBudget {
        PageBudget {
            height: self.page_height.clone(),
            system_gap: self.system_gap.clone(),
        }
    }

    /// [`PreferredBreaks`] when any are configured, otherwise no penalty.
    pub fn penalty(&self) -> Arc<dyn BreakPenalty> {
        if self.preferred_breaks.is_empty() {
            Arc::new(NoPenalty)
        } else {
            Arc::new(PreferredBreaks {
                positions: self.preferred_breaks.clone(),
                cost: self.preferred_break_penalty.clone(),
            })
        }
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn policies(&self) -> Result<Policies> {
        self.validate()?;
        let mut policies = Policies::new(self.width_policy())
            .with_height(self.height_policy())
            .with_system_height(self.system_height.clone());
        policies.penalty = self.penalty();
        Ok(policies)
    }
}
