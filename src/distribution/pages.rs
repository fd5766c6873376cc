//! Page break optimizer — the break DP one level up.
//!
//! Systems are opaque blocks whose extent is their height. Runs strictly
//! after system breaking; it reads finished systems and never changes them.

use std::collections::BTreeSet;
use std::ops::Range;

use num_traits::{One, Zero};

use super::breaker::{self, Extent};
use crate::model::{BreakLevel, Infeasibility, PageLayout, Segmentation, SystemLayout};
use crate::policy::BudgetPolicy;
use crate::rational::Rational;

/// A finished system seen by the page pass.
#[derive(Debug, Clone)]
struct SystemBlock {
    index: usize,
    height: Rational,
    height_sq: Rational,
    one: Rational,
}

impl SystemBlock {
    fn new(system: &SystemLayout) -> Self {
        Self {
            index: system.index,
            height_sq: &system.height * &system.height,
            height: system.height.clone(),
            one: Rational::one(),
        }
    }
}

impl Extent for SystemBlock {
    fn span(&self) -> Range<usize> {
        self.index..self.index + 1
    }
    fn min_extent(&self) -> &Rational {
        &self.height
    }
    fn ideal_extent(&self) -> &Rational {
        &self.height
    }
    fn ideal_square_sum(&self) -> &Rational {
        &self.height_sq
    }
    fn tightest_ratio(&self) -> &Rational {
        &self.one
    }
}

/// Page breaks and the pages they produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    pub segmentation: Segmentation,
    pub pages: Vec<PageLayout>,
}

/// Break `systems` into pages.
///
/// `forced_starts` holds system indices that must begin a page. Breaks in
/// the result are system indices.
pub fn optimize_pages(
    systems: &[SystemLayout],
    height: &dyn BudgetPolicy,
    forced_starts: &BTreeSet<usize>,
) -> Result<PagePlan, Infeasibility> {
    let blocks: Vec<SystemBlock> = systems.iter().map(SystemBlock::new).collect();
    let no_penalty = |_: usize, _: usize| Rational::zero();

    let mut breaks = vec![0];
    let mut cost = Rational::zero();
    let mut pages = Vec::new();

    for run in breaker::split_at(blocks.len(), forced_starts) {
        let run_blocks = &blocks[run.clone()];
        let Some(segmentation) = breaker::optimize(run_blocks, height, &no_penalty) else {
            let stuck = breaker::solve(run_blocks, height, &no_penalty, None, None)
                .map(|table| table.stuck_at())
                .unwrap_or(0);
            return Err(Infeasibility {
                level: BreakLevel::Page,
                position: run.start + stuck,
                partition: run,
            });
        };

        cost += &segmentation.cost;
        for local in segmentation.segments() {
            let page_systems = run.start + local.start..run.start + local.end;
            let used: Rational = systems[page_systems.clone()].iter().map(|s| &s.height).sum();
            pages.push(PageLayout {
                index: pages.len(),
                available: height.available(page_systems.start, page_systems.end),
                systems: page_systems.clone(),
                used,
            });
            breaks.push(page_systems.end);
        }
    }

    log::debug!("page pass: {} systems on {} pages, cost {cost}", systems.len(), pages.len());

    Ok(PagePlan {
        segmentation: Segmentation { breaks, cost },
        pages,
    })
}
