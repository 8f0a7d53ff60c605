pub use reshard_core as core;
pub use reshard_ir as ir;
pub use reshard_passes as passes;

pub use reshard_core::{AxisRef, DimensionSharding, Mesh, OpShardingRule, ShardingError, TensorMapping, TensorSharding};
pub use reshard_ir::{Function, IrError, Module, OperationKind, SymbolTable, TensorType};
pub use reshard_passes::{InsertExplicitReshardsPass, Pass, PassError, PassManager, PassManagerOptions};
