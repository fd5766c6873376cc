//! scorelayout — measure distribution for engraved scores.
//!
//! Takes the measure stacks produced by horizontal spacing (each with a
//! collision-free minimum width and a proportional ideal width) and decides
//! which stacks share a system, the final width of every stack, and which
//! systems share a page. All arithmetic is exact ([`Rational`]).
//!
//! # Example
//! ```
//! use scorelayout::rational::int;
//! use scorelayout::{plan, Constraints, Policies, Stack, Uniform};
//!
//! let stacks: Vec<Stack> = (0..3).map(|i| Stack::new(int(8), int(10), i)).collect();
//! let policies = Policies::new(Uniform(int(24)));
//! let outcome = plan(&stacks, &policies, &Constraints::new()).unwrap();
//! let layout = outcome.layout().unwrap();
//! assert_eq!(layout.system_breaks.breaks, vec![0, 3]);
//! assert_eq!(layout.actual_widths(), vec![int(8), int(8), int(8)]);
//! ```

pub mod config;
pub mod distribution;
pub mod error;
pub mod model;
pub mod policy;
pub mod rational;

use std::path::Path;

pub use config::DistributionConfig;
pub use distribution::{
    plan, plan_cancellable, CacheEntry, CacheSnapshot, CancelToken, Constraints,
    DistributionCache, Distributor, Policies, RecomputePath, Update,
};
pub use error::{DistributionError, Result};
pub use model::*;
pub use policy::{
    BreakPenalty, BudgetPolicy, FirstSystemIndent, NoPenalty, PageBudget, PreferredBreaks, Uniform,
};
pub use rational::Rational;

/// Parse a JSON array of stacks.
pub fn stacks_from_json(json: &str) -> Result<Vec<Stack>> {
    Ok(serde_json::from_str(json)?)
}

/// Distribute `stacks` with a JSON configuration (see [`DistributionConfig`]).
pub fn distribute_with_config(stacks: &[Stack], config_json: &str) -> Result<Outcome> {
    let config = DistributionConfig::from_json(config_json)?;
    plan(stacks, &config.policies()?, &config.constraints)
}

/// Distribute a JSON file of stacks with a JSON configuration file.
pub fn distribute_files<P: AsRef<Path>, Q: AsRef<Path>>(stacks: P, config: Q) -> Result<Outcome> {
    let stacks = stacks_from_json(&std::fs::read_to_string(stacks)?)?;
    let config = DistributionConfig::from_file(config)?;
    plan(&stacks, &config.policies()?, &config.constraints)
}

/// Serialize an outcome to pretty-printed JSON.
pub fn outcome_to_json(outcome: &Outcome) -> Result<String> {
    Ok(serde_json::to_string_pretty(outcome)?)
}
