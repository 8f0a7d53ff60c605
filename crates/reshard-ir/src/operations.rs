use std::fmt::Display;

use reshard_core::OpShardingRule;

use crate::values::ValueId;

/// Handle to an operation of a [`Function`](crate::Function).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(pub(crate) usize);

impl Display for OperationId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "op{}", self.0)
    }
}

/// Dimension numbers of a `stablehlo.dot_general` operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DotDimensionNumbers {
    pub lhs_batching_dimensions: Vec<usize>,
    pub rhs_batching_dimensions: Vec<usize>,
    pub lhs_contracting_dimensions: Vec<usize>,
    pub rhs_contracting_dimensions: Vec<usize>,
}

/// Kind of an [`Operation`], which determines its semantics, its textual name, and the sharding rule that gets
/// synthesized for it when it has no explicit one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Negate,
    Abs,
    Exponential,
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Dot,
    DotGeneral { dimension_numbers: DotDimensionNumbers },
    Transpose { permutation: Vec<usize> },

    /// Opaque operation (e.g., a `stablehlo.custom_call`) that only has a sharding rule if one is set explicitly.
    Custom { name: String },

    /// `sdy.reshard` operation. The target sharding of a reshard is the sharding of its result.
    Reshard,

    /// Function terminator.
    Return,
}

impl OperationKind {
    /// Returns the fully qualified name of operations of this kind (e.g., `stablehlo.add`).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Negate => "stablehlo.negate",
            Self::Abs => "stablehlo.abs",
            Self::Exponential => "stablehlo.exponential",
            Self::Add => "stablehlo.add",
            Self::Subtract => "stablehlo.subtract",
            Self::Multiply => "stablehlo.multiply",
            Self::Divide => "stablehlo.divide",
            Self::Maximum => "stablehlo.maximum",
            Self::Dot => "stablehlo.dot",
            Self::DotGeneral { .. } => "stablehlo.dot_general",
            Self::Transpose { .. } => "stablehlo.transpose",
            Self::Custom { .. } => "stablehlo.custom_call",
            Self::Reshard => "sdy.reshard",
            Self::Return => "return",
        }
    }

    /// Returns `true` for elementwise operations, whose operands and results all have the same shape.
    pub fn is_elementwise(&self) -> bool {
        matches!(
            self,
            Self::Negate
                | Self::Abs
                | Self::Exponential
                | Self::Add
                | Self::Subtract
                | Self::Multiply
                | Self::Divide
                | Self::Maximum
        )
    }
}

/// Operation of a [`Function`](crate::Function).
#[derive(Clone, Debug)]
pub struct Operation {
    pub(crate) kind: OperationKind,
    pub(crate) operands: Vec<ValueId>,
    pub(crate) results: Vec<ValueId>,
    pub(crate) sharding_rule: Option<OpShardingRule>,
}

impl Operation {
    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn operands(&self) -> &[ValueId] {
        self.operands.as_slice()
    }

    pub fn results(&self) -> &[ValueId] {
        self.results.as_slice()
    }

    pub fn operand(&self, index: usize) -> Option<ValueId> {
        self.operands.get(index).copied()
    }

    pub fn result(&self, index: usize) -> Option<ValueId> {
        self.results.get(index).copied()
    }

    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }

    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    /// Returns the sharding rule that was explicitly attached to this operation, if any.
    pub fn sharding_rule(&self) -> Option<&OpShardingRule> {
        self.sharding_rule.as_ref()
    }

    pub fn is_return(&self) -> bool {
        matches!(self.kind, OperationKind::Return)
    }

    pub fn is_reshard(&self) -> bool {
        matches!(self.kind, OperationKind::Reshard)
    }
}
