//! kinfit calibrates the free parameters of a reaction-network model
//! against experimental time courses. An external simulator is driven once
//! per (permutation, replicate), its tabular output is scored against the
//! reference data, and a genetic algorithm evolves the population of
//! parameter vectors across generations; a bootstrap outer loop resamples
//! the reference data to yield a distribution of best fits.

pub use kinfit_breed::*;
pub use kinfit_core::*;
pub use kinfit_engine::*;
pub use kinfit_error::{ErrorCode, FitError, FitResult, ResultExt};
