use reshard_core::ShardingError;
use thiserror::Error;

use crate::operations::OperationId;
use crate::values::ValueId;

/// Error type for constructing, mutating, and verifying [`Function`](crate::Function)s and
/// [`Module`](crate::Module)s.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum IrError {
    #[error("value {value} is not defined in function '{function_name}'")]
    UnknownValue { value: ValueId, function_name: String },

    #[error("operation {operation} is not part of the body of function '{function_name}'")]
    UnknownOperation { operation: OperationId, function_name: String },

    #[error("operand #{operand_index} is out of bounds for operation {operation} with {operand_count} operand(s)")]
    OperandIndexOutOfBounds { operation: OperationId, operand_index: usize, operand_count: usize },

    #[error("value {value} is used by operation {operation} before it is defined")]
    UseBeforeDefinition { value: ValueId, operation: OperationId },

    #[error("function '{function_name}' must end with exactly one 'return' operation")]
    MissingTerminator { function_name: String },

    #[error("'return' operation {operation} is not the last operation of function '{function_name}'")]
    MisplacedTerminator { operation: OperationId, function_name: String },

    #[error("function '{function_name}' returns {actual} value(s), but declares {expected} result(s)")]
    ResultCountMismatch { function_name: String, expected: usize, actual: usize },

    #[error("function '{function_name}' returns a value of type {actual} for result #{result_index} of type {expected}")]
    ResultTypeMismatch { function_name: String, result_index: usize, expected: String, actual: String },

    #[error("sharding '{sharding}' references unknown mesh '@{mesh_name}'")]
    UnknownMesh { mesh_name: String, sharding: String },

    #[error("mesh '@{mesh_name}' is defined more than once")]
    DuplicateMesh { mesh_name: String },

    #[error("function '@{function_name}' is defined more than once")]
    DuplicateFunction { function_name: String },

    #[error("invalid sharding '{sharding}': {source}")]
    InvalidSharding {
        sharding: String,
        #[source]
        source: ShardingError,
    },

    #[error(transparent)]
    Sharding(#[from] ShardingError),
}
