use std::fmt::Display;

use reshard_core::TensorSharding;

use crate::operations::OperationId;
use crate::types::TensorType;

/// Handle to a value of a [`Function`](crate::Function). Values are either function arguments or operation results,
/// and are owned by the function that created them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub(crate) usize);

impl Display for ValueId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "v{}", self.0)
    }
}

/// Where a value comes from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueDefinition {
    /// Argument `index` of the function.
    Argument { index: usize },

    /// Result `index` of `operation`.
    Result { operation: OperationId, index: usize },
}

/// Use of a value as operand `operand_index` of `operation`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Use {
    pub operation: OperationId,
    pub operand_index: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct ValueData {
    pub(crate) r#type: TensorType,
    pub(crate) sharding: Option<TensorSharding>,
    pub(crate) definition: ValueDefinition,
}
