pub mod errors;
pub mod insert_explicit_reshards;
pub mod pass;
pub mod projection;

pub use errors::PassError;
pub use insert_explicit_reshards::{
    AxesWithTail, FactorAxesCandidate, FactorAxesPair, InsertExplicitReshardsPass, InsertExplicitReshardsStatistics,
    OperationOutcome, find_common_axes, find_factor_axes_candidates, insert_explicit_reshards,
};
pub use pass::{ClosurePass, Pass, PassIrPrintingOptions, PassManager, PassManagerOptions};
pub use projection::{FactorSharding, ShardingProjection, TensorFactorShardings, UpdateTensorShardings};
