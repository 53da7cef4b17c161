pub mod config;
pub mod domain;
pub mod generator;
pub mod model;
pub mod objective;
pub mod params;
pub mod summary;
pub mod tabular;
pub mod weights;

pub use config::{
    ClusterConfig, FitConfig, GenSnapshot, MutationSpec, ObjectiveKind, ParallelMode,
    SchedulerKind, VarSpec,
};
pub use domain::executor::Executor;
pub use domain::random_provider;
pub use domain::thread_pool::{ThreadPool, WaitGroup};
pub use generator::generate_population;
pub use model::{ChangeLog, ModelTemplate};
pub use objective::{PermScore, PreppedRef, Preprocess, ScoreFailure, Scorer};
pub use params::{ParamSchema, ParamVector, Permutation, Population, SENTINEL_SCORE};
pub use summary::{ModelBreakdown, Summary, SummaryRow};
pub use tabular::Table;
pub use weights::{FileWeights, WeightMap};

pub mod prelude {
    pub use super::config::{
        ClusterConfig, FitConfig, GenSnapshot, MutationSpec, ObjectiveKind, ParallelMode,
        SchedulerKind, VarSpec,
    };
    pub use super::domain::executor::Executor;
    pub use super::domain::random_provider;
    pub use super::generator::generate_population;
    pub use super::model::{ChangeLog, ModelTemplate};
    pub use super::objective::{PermScore, PreppedRef, Preprocess, ScoreFailure, Scorer};
    pub use super::params::{ParamSchema, ParamVector, Permutation, Population, SENTINEL_SCORE};
    pub use super::summary::{ModelBreakdown, Summary, SummaryRow};
    pub use super::tabular::Table;
    pub use super::weights::{FileWeights, WeightMap};
}
