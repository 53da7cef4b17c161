pub mod breeder;
pub mod crossover;
pub mod mutate;
pub mod select;

pub use breeder::{BreedOutcome, Breeder, Termination};
pub use crossover::PositionalCrossover;
pub use mutate::MutationSet;
pub use select::{ParentPool, SelectionWheel};
