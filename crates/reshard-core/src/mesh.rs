//! Logical device meshes and references to (possibly split) mesh axes.
//!
//! The representation mirrors [Shardy][shardy]: a mesh is an ordered list of named axes, and a tensor dimension is
//! sharded along a list of [`AxisRef`]s. An [`AxisRef`] either references a full mesh axis or a _sub-axis_, which is
//! a contiguous split of a full axis described by a [`SubAxisInfo`]:
//!
//! ```text
//! sdy.mesh @mesh = <["x"=4, "y"=2]>
//!
//! "x"        full axis "x" (4 shards)
//! "x":(1)2   major half of "x" (pre-size 1, size 2)
//! "x":(2)2   minor half of "x" (pre-size 2, size 2)
//! ```
//!
//! [shardy]: https://openxla.org/shardy/sharding_representation

use std::collections::HashMap;
use std::fmt::Display;

use crate::errors::ShardingError;

// ---------------------------------------------------------------------------
// Mesh
// ---------------------------------------------------------------------------

/// A named axis in a logical device mesh.
///
/// Each `MeshAxis` corresponds to one entry in a Shardy `sdy.mesh` operation:
///
/// ```mlir
/// sdy.mesh @mesh = <["data"=4, "model"=2]>
/// //                 ^^^^^^^^^  ^^^^^^^^^^
/// //                 MeshAxis   MeshAxis
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MeshAxis {
    name: String,
    size: usize,
}

impl MeshAxis {
    /// Creates a mesh axis.
    pub fn new<N: Into<String>>(name: N, size: usize) -> Result<Self, ShardingError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ShardingError::EmptyMeshAxisName);
        }
        if size == 0 {
            return Err(ShardingError::InvalidMeshAxisSize { axis_name: name });
        }
        Ok(Self { name, size })
    }

    /// Name of this axis.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Size of this axis.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Logical mesh topology (axis names and sizes).
///
/// Meshes are referenced by symbol name from [`TensorSharding`](crate::TensorSharding)s and resolved through a
/// symbol table. Device identity is irrelevant for the reshard pass, so only the topology is stored.
///
/// Rendered as an `sdy.mesh` operation via [`to_shardy_mesh_operation`][Mesh::to_shardy_mesh_operation]:
///
/// ```mlir
/// sdy.mesh @mesh = <["data"=4, "model"=2]>
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mesh {
    axes: Vec<MeshAxis>,
    axis_index_by_name: HashMap<String, usize>,
}

impl Mesh {
    /// Creates a mesh from named axes.
    ///
    /// Validates that all axis names are non-empty, all sizes are positive, and names are unique.
    pub fn new(axes: Vec<MeshAxis>) -> Result<Self, ShardingError> {
        let mut axis_index_by_name = HashMap::with_capacity(axes.len());
        for (axis_index, axis) in axes.iter().enumerate() {
            if axis.name.is_empty() {
                return Err(ShardingError::EmptyMeshAxisName);
            }
            if axis.size == 0 {
                return Err(ShardingError::InvalidMeshAxisSize { axis_name: axis.name.clone() });
            }
            if axis_index_by_name.insert(axis.name.clone(), axis_index).is_some() {
                return Err(ShardingError::DuplicateMeshAxisName { axis_name: axis.name.clone() });
            }
        }
        Ok(Self { axes, axis_index_by_name })
    }

    /// Convenience constructor from `(name, size)` pairs.
    pub fn from_axes<'n, I: IntoIterator<Item = (&'n str, usize)>>(axes: I) -> Result<Self, ShardingError> {
        let axes = axes.into_iter().map(|(name, size)| MeshAxis::new(name, size)).collect::<Result<Vec<_>, _>>()?;
        Self::new(axes)
    }

    /// Returns the axes of this mesh.
    pub fn axes(&self) -> &[MeshAxis] {
        self.axes.as_slice()
    }

    /// Returns the index of `axis_name` in this mesh, if present.
    pub fn axis_index<S: AsRef<str>>(&self, axis_name: S) -> Option<usize> {
        self.axis_index_by_name.get(axis_name.as_ref()).copied()
    }

    /// Returns the size of `axis_name` in this mesh, if present.
    pub fn axis_size<S: AsRef<str>>(&self, axis_name: S) -> Option<usize> {
        self.axis_index(axis_name).map(|axis_index| self.axes[axis_index].size)
    }

    /// Renders this mesh as the right-hand side of a Shardy `sdy.mesh` declaration.
    ///
    /// Example output for axes `("x", 8)` and `("y", 2)`: `<["x"=8, "y"=2]>`.
    pub fn to_shardy_mesh_literal(&self) -> String {
        let mut literal = String::from("<[");
        for (axis_index, axis) in self.axes.iter().enumerate() {
            if axis_index > 0 {
                literal.push_str(", ");
            }
            literal.push('"');
            literal.push_str(escape_shardy_string(axis.name()).as_str());
            literal.push_str("\"=");
            literal.push_str(axis.size().to_string().as_str());
        }
        literal.push_str("]>");
        literal
    }

    /// Renders a complete Shardy `sdy.mesh` operation declaration (e.g., `sdy.mesh @mesh = <["x"=4]>`).
    ///
    /// # Parameters
    ///
    ///   - `mesh_symbol_name`: Symbol name used in MLIR (without or with leading `'@'`).
    pub fn to_shardy_mesh_operation<S: AsRef<str>>(&self, mesh_symbol_name: S) -> Result<String, ShardingError> {
        let mesh_symbol_name = normalize_mesh_symbol_name(mesh_symbol_name)?;
        Ok(format!("sdy.mesh @{mesh_symbol_name} = {}", self.to_shardy_mesh_literal()))
    }
}

// ---------------------------------------------------------------------------
// Axis references
// ---------------------------------------------------------------------------

/// Split metadata of a sub-axis.
///
/// A sub-axis of a mesh axis with size `n` is described by `pre_size` (the product of the sizes of the sub-axes to
/// its left, i.e., more major) and `size`. It is valid iff `pre_size * size` divides `n`. The sub-axis addresses the
/// shard-index range `[pre_size, pre_size * size)` in the multiplicative sense, which is what makes two sub-axes of
/// the same axis overlap or not.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubAxisInfo {
    pre_size: usize,
    size: usize,
}

impl SubAxisInfo {
    /// Creates split metadata for a sub-axis.
    pub fn new(pre_size: usize, size: usize) -> Self {
        Self { pre_size, size }
    }

    /// Returns the `pre_size` term.
    pub fn pre_size(&self) -> usize {
        self.pre_size
    }

    /// Returns the `size` term.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the `pre_size` of the sub-axis that immediately follows this one.
    pub fn next_pre_size(&self) -> usize {
        self.pre_size * self.size
    }
}

/// Reference to a full mesh axis or to a split sub-axis.
///
/// Ordering is by axis name first and then by split metadata, with full axes ordered before their sub-axes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AxisRef {
    name: String,
    sub_axis_info: Option<SubAxisInfo>,
}

impl AxisRef {
    /// Creates a reference to the full mesh axis `name`.
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self { name: name.into(), sub_axis_info: None }
    }

    /// Creates a reference to the sub-axis `"name":(pre_size)size`.
    pub fn sub_axis<N: Into<String>>(name: N, pre_size: usize, size: usize) -> Self {
        Self { name: name.into(), sub_axis_info: Some(SubAxisInfo::new(pre_size, size)) }
    }

    /// Returns the referenced axis name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns split metadata when this references a sub-axis.
    pub fn sub_axis_info(&self) -> Option<SubAxisInfo> {
        self.sub_axis_info
    }

    /// Returns `true` if this references a sub-axis.
    pub fn is_sub_axis(&self) -> bool {
        self.sub_axis_info.is_some()
    }

    /// Returns the `pre_size` of this axis reference (`1` for full axes).
    pub fn pre_size(&self) -> usize {
        self.sub_axis_info.map_or(1, |info| info.pre_size)
    }

    /// Returns the number of shards that this axis reference splits a dimension into.
    ///
    /// Axes that are not part of `mesh` have size `1`; [`AxisRef::validate`] rejects them.
    pub fn size(&self, mesh: &Mesh) -> usize {
        match self.sub_axis_info {
            Some(info) => info.size,
            None => mesh.axis_size(&self.name).unwrap_or(1),
        }
    }

    /// Returns `true` if this and `other` address intersecting shard-index ranges of the same mesh axis.
    ///
    /// A full axis overlaps every reference to the same axis. Two sub-axes overlap iff their
    /// `[pre_size, pre_size * size)` ranges intersect.
    pub fn overlaps(&self, other: &AxisRef) -> bool {
        if self.name != other.name {
            return false;
        }
        match (self.sub_axis_info, other.sub_axis_info) {
            (Some(lhs), Some(rhs)) => lhs.pre_size < rhs.next_pre_size() && rhs.pre_size < lhs.next_pre_size(),
            _ => true,
        }
    }

    /// Returns `true` if this axis reference is a (not necessarily strict) prefix of `other`.
    ///
    /// For example, `"x":(1)2` is a prefix of `"x"` and of `"x":(1)4`, but not of `"x":(2)2`.
    pub fn prefix_of(&self, other: &AxisRef) -> bool {
        if self.name != other.name {
            return false;
        }
        if self == other {
            return true;
        }
        let Some(info) = self.sub_axis_info else {
            return false;
        };
        if info.pre_size != other.pre_size() {
            return false;
        }
        match other.sub_axis_info {
            Some(other_info) => other_info.size > info.size && other_info.size % info.size == 0,
            None => true,
        }
    }

    /// Returns `true` if this axis reference is a prefix of `other` and is not equal to it.
    pub fn strict_prefix_of(&self, other: &AxisRef) -> bool {
        self != other && self.prefix_of(other)
    }

    /// Returns `true` if this sub-axis is immediately followed by the sub-axis `other` of the same axis, meaning that
    /// the two can be merged into a single (sub-)axis.
    pub fn can_merge(&self, other: &AxisRef) -> bool {
        match (self.sub_axis_info, other.sub_axis_info) {
            (Some(lhs), Some(rhs)) => self.name == other.name && lhs.next_pre_size() == rhs.pre_size,
            _ => false,
        }
    }

    /// Merges this sub-axis with the sub-axis that immediately follows it. The result is a full axis reference if the
    /// merged sub-axis covers the whole mesh axis.
    ///
    /// Assumes that [`AxisRef::can_merge`] returns `true` for `other`.
    pub fn merge(&self, other: &AxisRef, mesh: &Mesh) -> AxisRef {
        debug_assert!(self.can_merge(other), "cannot merge {self} with {other}");
        let pre_size = self.pre_size();
        let size = self.size(mesh) * other.size(mesh);
        if pre_size == 1 && mesh.axis_size(&self.name) == Some(size) {
            AxisRef::new(self.name.clone())
        } else {
            AxisRef::sub_axis(self.name.clone(), pre_size, size)
        }
    }

    /// Splits this axis reference into a major part of size `major_size` and the minor remainder.
    ///
    /// Assumes that `major_size` is a strict divisor of [`AxisRef::size`] that is greater than `1`.
    pub fn split(&self, major_size: usize, mesh: &Mesh) -> (AxisRef, AxisRef) {
        let size = self.size(mesh);
        debug_assert!(major_size > 1 && major_size < size && size % major_size == 0);
        let pre_size = self.pre_size();
        let major = AxisRef::sub_axis(self.name.clone(), pre_size, major_size);
        let minor = AxisRef::sub_axis(self.name.clone(), pre_size * major_size, size / major_size);
        (major, minor)
    }

    /// Validates this axis reference against `mesh`.
    pub fn validate(&self, mesh: &Mesh) -> Result<(), ShardingError> {
        let axis_size =
            mesh.axis_size(&self.name).ok_or_else(|| ShardingError::UnknownMeshAxis { axis_name: self.name.clone() })?;
        if let Some(info) = self.sub_axis_info {
            let next_pre_size = info.pre_size.checked_mul(info.size);
            let is_valid = info.pre_size > 0
                && info.size > 1
                && next_pre_size.is_some_and(|next_pre_size| axis_size % next_pre_size == 0);
            if !is_valid {
                return Err(ShardingError::InvalidSubAxis {
                    axis_name: self.name.clone(),
                    pre_size: info.pre_size,
                    size: info.size,
                    axis_size,
                });
            }
        }
        Ok(())
    }
}

impl Display for AxisRef {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "\"{}\"", escape_shardy_string(&self.name))?;
        if let Some(info) = self.sub_axis_info {
            write!(formatter, ":({}){}", info.pre_size, info.size)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn normalize_mesh_symbol_name<S: AsRef<str>>(mesh_symbol_name: S) -> Result<String, ShardingError> {
    let mesh_symbol_name = mesh_symbol_name.as_ref().trim();
    if mesh_symbol_name.is_empty() {
        return Err(ShardingError::EmptyMeshSymbolName);
    }

    let mesh_symbol_name = mesh_symbol_name.strip_prefix('@').unwrap_or(mesh_symbol_name);
    if mesh_symbol_name.is_empty() || mesh_symbol_name.chars().any(char::is_whitespace) {
        return Err(ShardingError::InvalidMeshSymbolName { mesh_symbol_name: mesh_symbol_name.to_string() });
    }

    Ok(mesh_symbol_name.to_string())
}

pub(crate) fn escape_shardy_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
