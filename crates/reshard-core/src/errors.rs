use thiserror::Error;

/// Error type for mesh, axis, sharding, and sharding rule definitions.
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShardingError {
    /// Error returned when a mesh axis name is empty.
    #[error("mesh axis names must be non-empty")]
    EmptyMeshAxisName,

    /// Error returned when a mesh axis has size `0`.
    #[error("mesh axis '{axis_name}' must have size > 0")]
    InvalidMeshAxisSize { axis_name: String },

    /// Error returned when mesh axis names are not unique.
    #[error("mesh axis '{axis_name}' appears more than once")]
    DuplicateMeshAxisName { axis_name: String },

    /// Error returned when an axis reference points to an axis that the mesh does not have.
    #[error("axis reference uses unknown mesh axis '{axis_name}'")]
    UnknownMeshAxis { axis_name: String },

    /// Error returned when a sub-axis does not evenly split the underlying mesh axis.
    #[error("sub-axis \"{axis_name}\":({pre_size}){size} does not divide mesh axis of size {axis_size}")]
    InvalidSubAxis { axis_name: String, pre_size: usize, size: usize, axis_size: usize },

    /// Error returned when a sharding uses the same (or an overlapping) axis more than once.
    #[error("axis {axis} overlaps with another axis used by the same sharding")]
    OverlappingShardingAxes { axis: String },

    /// Error returned when a dimension sharding lists two adjacent sub-axes that must be written as one (sub-)axis.
    #[error("sub-axes {major} and {minor} of the same dimension must be merged")]
    MergeableSubAxes { major: String, minor: String },

    /// Error returned when a mesh symbol name used to render Shardy attributes is empty.
    #[error("mesh symbol names used in Shardy attributes must be non-empty")]
    EmptyMeshSymbolName,

    /// Error returned when a mesh symbol name used to render Shardy attributes is invalid.
    #[error("invalid mesh symbol name '{mesh_symbol_name}' used in Shardy attributes")]
    InvalidMeshSymbolName { mesh_symbol_name: String },

    /// Error returned when a tensor sharding rank does not match the tensor rank.
    #[error("sharding rank {sharding_rank} does not match tensor rank {tensor_rank}")]
    RankMismatch { sharding_rank: usize, tensor_rank: usize },

    /// Error returned when a sharding rule references a factor that it does not declare.
    #[error("sharding rule references factor #{factor_index}, but only {factor_count} factor(s) are declared")]
    UnknownFactor { factor_index: usize, factor_count: usize },

    /// Error returned when a sharding rule has the wrong number of operand or result mappings.
    #[error("sharding rule has {actual} {kind} mapping(s), but the operation has {expected}")]
    MappingCountMismatch { kind: &'static str, expected: usize, actual: usize },
}
