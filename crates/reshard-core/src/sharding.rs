//! Tensor sharding annotations.
//!
//! A [`TensorSharding`] binds a tensor to a mesh (by symbol name) and lists, for every tensor dimension, the axes
//! along which that dimension is sharded, major to minor:
//!
//! ```text
//! #sdy.sharding<@mesh, [{"x"}, {}]>              dimension 0 sharded along "x", dimension 1 replicated
//! #sdy.sharding<@mesh, [{"x", "y"}, {?}]>        dimension 0 sharded along "x" then "y", dimension 1 open
//! #sdy.sharding<@mesh, [{}, {}], replicated={"y"}>
//! ```
//!
//! Each dimension can be _closed_ (its axes are fixed) or _open_ (rendered with a trailing `?`, meaning that more
//! axes may be added to it).

use std::fmt::Display;

use crate::errors::ShardingError;
use crate::mesh::{AxisRef, Mesh, escape_shardy_string, normalize_mesh_symbol_name};

/// Sharding of one tensor dimension.
///
/// | `DimensionSharding` | Rendering |
/// |---|---|
/// | closed, no axes | `{}` |
/// | open, no axes | `{?}` |
/// | closed, `["x"]` | `{"x"}` |
/// | open, `["x", "y"]` | `{"x", "y", ?}` |
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DimensionSharding {
    axes: Vec<AxisRef>,
    is_closed: bool,
}

impl DimensionSharding {
    /// Creates a dimension sharding.
    pub fn new(axes: Vec<AxisRef>, is_closed: bool) -> Self {
        Self { axes, is_closed }
    }

    /// Creates a closed dimension sharding along `axes`.
    pub fn closed(axes: Vec<AxisRef>) -> Self {
        Self::new(axes, true)
    }

    /// Creates a closed, replicated dimension sharding.
    pub fn replicated() -> Self {
        Self::new(Vec::new(), true)
    }

    /// Creates an open dimension sharding with no axes.
    pub fn open() -> Self {
        Self::new(Vec::new(), false)
    }

    /// Convenience constructor for a closed dimension sharding along full mesh axes.
    pub fn sharded_by<I, N>(axis_names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self::closed(axis_names.into_iter().map(AxisRef::new).collect())
    }

    /// Returns the axes of this dimension sharding, major to minor.
    pub fn axes(&self) -> &[AxisRef] {
        self.axes.as_slice()
    }

    /// Returns `true` if this dimension sharding is closed.
    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    /// Returns `true` if no axes are assigned to this dimension.
    pub fn is_replicated(&self) -> bool {
        self.axes.is_empty()
    }

    /// Returns the product of the sizes of all axes of this dimension sharding.
    pub fn sharding_size(&self, mesh: &Mesh) -> usize {
        self.axes.iter().map(|axis| axis.size(mesh)).product()
    }
}

impl Display for DimensionSharding {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("{")?;
        for (axis_index, axis) in self.axes.iter().enumerate() {
            if axis_index > 0 {
                formatter.write_str(", ")?;
            }
            write!(formatter, "{axis}")?;
        }
        if !self.is_closed {
            if self.axes.is_empty() {
                formatter.write_str("?")?;
            } else {
                formatter.write_str(", ?")?;
            }
        }
        formatter.write_str("}")
    }
}

/// Sharding of a tensor over a named mesh.
///
/// The mesh is referenced by its symbol name and is resolved through a symbol table when needed. A tensor with no
/// sharding annotation at all is treated like a fully open sharding by consumers of this type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorSharding {
    mesh_name: String,
    dim_shardings: Vec<DimensionSharding>,
    replicated_axes: Vec<AxisRef>,
}

impl TensorSharding {
    /// Creates a tensor sharding with no explicitly replicated axes.
    pub fn new<N: Into<String>>(mesh_name: N, dim_shardings: Vec<DimensionSharding>) -> Self {
        Self::with_replicated_axes(mesh_name, dim_shardings, Vec::new())
    }

    /// Creates a tensor sharding with explicitly replicated axes.
    pub fn with_replicated_axes<N: Into<String>>(
        mesh_name: N,
        dim_shardings: Vec<DimensionSharding>,
        replicated_axes: Vec<AxisRef>,
    ) -> Self {
        Self { mesh_name: mesh_name.into(), dim_shardings, replicated_axes }
    }

    /// Creates a fully replicated sharding with closed dimensions for a tensor of rank `rank`.
    pub fn fully_replicated<N: Into<String>>(mesh_name: N, rank: usize) -> Self {
        Self::new(mesh_name, vec![DimensionSharding::replicated(); rank])
    }

    /// Creates a fully open sharding with no axes for a tensor of rank `rank`.
    pub fn fully_open<N: Into<String>>(mesh_name: N, rank: usize) -> Self {
        Self::new(mesh_name, vec![DimensionSharding::open(); rank])
    }

    /// Returns a fully replicated, fully closed sharding on the same mesh and with the same rank as this one.
    pub fn fully_closed_like(&self) -> Self {
        Self::fully_replicated(self.mesh_name.clone(), self.rank())
    }

    /// Returns `true` if `sharding` is absent or if it does not assign any axis to any dimension.
    pub fn is_fully_replicated(sharding: Option<&TensorSharding>) -> bool {
        match sharding {
            Some(sharding) => sharding.dim_shardings.iter().all(DimensionSharding::is_replicated),
            None => true,
        }
    }

    /// Returns the symbol name of the mesh that this sharding refers to.
    pub fn mesh_name(&self) -> &str {
        self.mesh_name.as_str()
    }

    /// Returns the per-dimension shardings.
    pub fn dim_shardings(&self) -> &[DimensionSharding] {
        self.dim_shardings.as_slice()
    }

    /// Returns the sharding of dimension `dimension`, if it exists.
    pub fn dim_sharding(&self, dimension: usize) -> Option<&DimensionSharding> {
        self.dim_shardings.get(dimension)
    }

    /// Returns the explicitly replicated axes.
    pub fn replicated_axes(&self) -> &[AxisRef] {
        self.replicated_axes.as_slice()
    }

    /// Rank of the tensor that this sharding applies to.
    pub fn rank(&self) -> usize {
        self.dim_shardings.len()
    }

    /// Validates this sharding against `mesh` and against the rank of the tensor it is attached to.
    ///
    /// Checks that all axes are valid for `mesh` and that no two axes (across all dimensions and the replicated axes)
    /// overlap. Adjacent sub-axes of one dimension that form a larger (sub-)axis must be written merged, so
    /// `{"x":(1)2, "x":(2)2}` is rejected in favor of `{"x"}` on a mesh where `"x"` has size 4.
    pub fn validate(&self, mesh: &Mesh, tensor_rank: usize) -> Result<(), ShardingError> {
        if self.rank() != tensor_rank {
            return Err(ShardingError::RankMismatch { sharding_rank: self.rank(), tensor_rank });
        }
        for dim_sharding in &self.dim_shardings {
            for pair in dim_sharding.axes.windows(2) {
                if pair[0].can_merge(&pair[1]) {
                    return Err(ShardingError::MergeableSubAxes {
                        major: pair[0].to_string(),
                        minor: pair[1].to_string(),
                    });
                }
            }
        }
        let mut seen_axes: Vec<&AxisRef> = Vec::new();
        let all_axes = self.dim_shardings.iter().flat_map(|dim| dim.axes.iter()).chain(self.replicated_axes.iter());
        for axis in all_axes {
            axis.validate(mesh)?;
            if seen_axes.iter().any(|seen_axis| seen_axis.overlaps(axis)) {
                return Err(ShardingError::OverlappingShardingAxes { axis: axis.to_string() });
            }
            seen_axes.push(axis);
        }
        Ok(())
    }

    /// Renders the body of this sharding without the `#sdy.sharding` prefix (e.g., `<@mesh, [{"x"}, {}]>`), which
    /// is the form used inside `#sdy.sharding_per_value` and by `sdy.reshard`.
    pub fn to_shardy_short_literal(&self) -> String {
        let mut literal = format!("<@{}, [", escape_shardy_string(&self.mesh_name));
        for (dimension, dim_sharding) in self.dim_shardings.iter().enumerate() {
            if dimension > 0 {
                literal.push_str(", ");
            }
            literal.push_str(dim_sharding.to_string().as_str());
        }
        literal.push(']');
        if !self.replicated_axes.is_empty() {
            literal.push_str(", replicated={");
            for (axis_index, axis) in self.replicated_axes.iter().enumerate() {
                if axis_index > 0 {
                    literal.push_str(", ");
                }
                literal.push_str(axis.to_string().as_str());
            }
            literal.push('}');
        }
        literal.push('>');
        literal
    }

    /// Renders this sharding as a Shardy tensor sharding attribute (e.g., `#sdy.sharding<@mesh, [{"x"}, {}]>`).
    pub fn to_shardy_tensor_sharding_attribute(&self) -> Result<String, ShardingError> {
        normalize_mesh_symbol_name(&self.mesh_name)?;
        Ok(format!("#sdy.sharding{}", self.to_shardy_short_literal()))
    }
}

impl Display for TensorSharding {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "#sdy.sharding{}", self.to_shardy_short_literal())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
