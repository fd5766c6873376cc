//! Data model for measure distribution.
//!
//! Inputs are [`Stack`]s (one per musical time-position, all staves aligned)
//! plus user constraints. Outputs are immutable [`Layout`]s: system and page
//! segmentations together with the final width of every stack.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::rational::{serde_str, Rational};

// ═══════════════════════════════════════════════════════════════════════
// Inputs
// ═══════════════════════════════════════════════════════════════════════

/// The vertical alignment of all staves at one measure position.
///
/// Produced upstream by collision analysis. Callers guarantee
/// `0 < min_width <= ideal_width`; the distribution stage does not
/// re-validate this outside debug builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    /// Hard collision-free lower bound
    #[serde(with = "serde_str")]
    pub min_width: Rational,
    /// Proportional target derived from rhythmic density
    #[serde(with = "serde_str")]
    pub ideal_width: Rational,
    /// Stable identity of the measure this stack was built from
    pub source_index: usize,
    /// Vertical extent this stack needs (extra lyric lines, tall
    /// directions). `None` means the default system height is enough.
    #[serde(default, with = "serde_str::option", skip_serializing_if = "Option::is_none")]
    pub height: Option<Rational>,
}

impl Stack {
    pub fn new(min_width: Rational, ideal_width: Rational, source_index: usize) -> Self {
        Self {
            min_width,
            ideal_width,
            source_index,
            height: None,
        }
    }

    pub fn with_height(mut self, height: Rational) -> Self {
        self.height = Some(height);
        self
    }
}

/// User replacement for one stack's widths, keyed by `source_index`.
///
/// `min_width` may only raise the collision floor; `ideal_width` replaces
/// the proportional target outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WidthOverride {
    pub source_index: usize,
    #[serde(default, with = "serde_str::option", skip_serializing_if = "Option::is_none")]
    pub min_width: Option<Rational>,
    #[serde(default, with = "serde_str::option", skip_serializing_if = "Option::is_none")]
    pub ideal_width: Option<Rational>,
}

/// Stacks at positions `start..end` must end up in the same system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeepTogether {
    pub start: usize,
    pub end: usize,
}

// ═══════════════════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════════════════

/// Break indices `0 = b0 < b1 < ... < bk = n` and the total cost of the
/// segments between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segmentation {
    pub breaks: Vec<usize>,
    #[serde(with = "serde_str")]
    pub cost: Rational,
}

impl Segmentation {
    /// Number of segments.
    pub fn len(&self) -> usize {
        self.breaks.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The half-open ranges between consecutive breaks.
    pub fn segments(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.breaks.windows(2).map(|w| w[0]..w[1])
    }
}

/// One laid-out system (a row of consecutive stacks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemLayout {
    /// System number (0-based)
    pub index: usize,
    /// Stack positions in this system
    pub stacks: Range<usize>,
    /// Width the width policy granted this system
    #[serde(with = "serde_str")]
    pub width: Rational,
    /// Uniform factor applied to every ideal width
    #[serde(with = "serde_str")]
    pub scale: Rational,
    /// Final width of each stack, in position order
    #[serde(with = "serde_str::vec")]
    pub actual_widths: Vec<Rational>,
    /// Aggregate height fed to page breaking
    #[serde(with = "serde_str")]
    pub height: Rational,
    /// Discomfort of this system including any break penalty
    #[serde(with = "serde_str")]
    pub cost: Rational,
}

/// One laid-out page (a column of consecutive systems).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLayout {
    /// Page number (0-based)
    pub index: usize,
    /// System indices on this page
    pub systems: Range<usize>,
    /// Height the height policy granted this page
    #[serde(with = "serde_str")]
    pub available: Rational,
    /// Sum of the system heights on this page
    #[serde(with = "serde_str")]
    pub used: Rational,
}

/// Finalized geometry for one distribution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub system_breaks: Segmentation,
    pub page_breaks: Segmentation,
    pub systems: Vec<SystemLayout>,
    pub pages: Vec<PageLayout>,
}

impl Layout {
    /// Every stack's final width, in position order.
    pub fn actual_widths(&self) -> Vec<Rational> {
        self.systems
            .iter()
            .flat_map(|s| s.actual_widths.iter().cloned())
            .collect()
    }

    /// The system containing stack position `position`.
    pub fn system_of(&self, position: usize) -> Option<&SystemLayout> {
        self.systems.iter().find(|s| s.stacks.contains(&position))
    }

    /// The page containing system `system_idx`.
    pub fn page_of(&self, system_idx: usize) -> Option<&PageLayout> {
        self.pages.iter().find(|p| p.systems.contains(&system_idx))
    }
}

/// Which pass failed to find a segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakLevel {
    System,
    Page,
}

/// Report for a configuration where no segmentation fits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infeasibility {
    pub level: BreakLevel,
    /// First stack position (system level) or system index (page level)
    /// that no feasible segment could reach
    pub position: usize,
    /// The forced-break partition the failure happened in
    pub partition: Range<usize>,
}

/// Result of a distribution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Feasible(Layout),
    Infeasible(Infeasibility),
}

impl Outcome {
    pub fn is_feasible(&self) -> bool {
        matches!(self, Outcome::Feasible(_))
    }

    pub fn layout(&self) -> Option<&Layout> {
        match self {
            Outcome::Feasible(layout) => Some(layout),
            Outcome::Infeasible(_) => None,
        }
    }

    pub fn into_layout(self) -> Option<Layout> {
        match self {
            Outcome::Feasible(layout) => Some(layout),
            Outcome::Infeasible(_) => None,
        }
    }

    pub fn infeasibility(&self) -> Option<&Infeasibility> {
        match self {
            Outcome::Feasible(_) => None,
            Outcome::Infeasible(report) => Some(report),
        }
    }
}
