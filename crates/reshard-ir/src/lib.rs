pub mod errors;
pub mod functions;
pub mod modules;
pub mod operations;
mod printer;
pub mod sharding_rules;
pub mod types;
pub mod values;
mod verifier;

pub use errors::IrError;
pub use functions::{Function, FunctionResult};
pub use modules::{Module, SymbolTable};
pub use operations::{DotDimensionNumbers, Operation, OperationId, OperationKind};
pub use sharding_rules::{common_mesh_name, get_or_create_sharding_rule};
pub use types::{ElementType, TensorType};
pub use values::{Use, ValueDefinition, ValueId};
