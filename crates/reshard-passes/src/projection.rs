//! Sharding projections.
//!
//! A [`ShardingProjection`] projects the shardings of the operands and results of an operation onto the factors of
//! its [`OpShardingRule`]. For every tensor, each factor that the tensor maps to is assigned the (sub-)axes that
//! shard it. For example, with a mesh `<["x"=4, "y"=2]>` and a dimension of size `8` that is mapped to factors
//! `i=2` and `j=4` and sharded along `{"x", "y"}`:
//!
//! ```text
//! i -> ["x":(1)2]
//! j -> ["x":(2)2, "y"]
//! ```
//!
//! Axes that shard a dimension beyond what its factors can absorb are recorded as _overflow axes_.

use std::collections::{BTreeMap, VecDeque};
use std::ops::BitOrAssign;

use reshard_core::{AxisRef, DimensionSharding, Mesh, OpShardingRule, ShardingError, TensorMapping, TensorSharding};
use reshard_ir::{Function, OperationId};

/// Axes assigned to one factor of one tensor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FactorSharding {
    /// Axes that shard this factor, major to minor.
    pub axis_refs: Vec<AxisRef>,

    /// Axes that shard the dimension of this factor beyond the factor itself.
    pub overflow_axes: Vec<AxisRef>,

    /// Whether the dimension this factor belongs to is closed.
    pub is_closed: bool,

    /// Whether this factor is the minor-most factor of its dimension.
    pub is_minor_most: bool,
}

/// Factor shardings of a single operand or result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TensorFactorShardings {
    factor_shardings: BTreeMap<usize, FactorSharding>,
    replicated_axes: Vec<AxisRef>,
}

impl TensorFactorShardings {
    /// Projects `sharding` (or a fully open sharding, if it is missing) onto the factors of `mapping`.
    pub fn build(
        sharding: Option<&TensorSharding>,
        mapping: &TensorMapping,
        factor_sizes: &[usize],
        mesh: &Mesh,
    ) -> Result<Self, ShardingError> {
        let factor_count = factor_sizes.len();
        let mut factor_shardings = BTreeMap::new();
        for (dimension, dim_mapping) in mapping.dim_mappings().iter().enumerate() {
            let (axes, is_closed) = sharding
                .and_then(|sharding| sharding.dim_sharding(dimension))
                .map_or((&[][..], false), |dim| (dim.axes(), dim.is_closed()));
            let mut pending_axes = axes.iter().cloned().collect::<VecDeque<_>>();
            let factor_indices = dim_mapping.factor_indices();
            for (position, &factor_index) in factor_indices.iter().enumerate() {
                let factor_size = *factor_sizes
                    .get(factor_index)
                    .ok_or(ShardingError::UnknownFactor { factor_index, factor_count })?;
                let is_minor_most = position + 1 == factor_indices.len();
                let mut factor_sharding =
                    FactorSharding { is_closed, is_minor_most, ..FactorSharding::default() };
                let mut remaining_size = factor_size;
                while remaining_size > 1 {
                    let Some(axis) = pending_axes.pop_front() else {
                        break;
                    };
                    let axis_size = axis.size(mesh);
                    if remaining_size % axis_size == 0 {
                        remaining_size /= axis_size;
                        factor_sharding.axis_refs.push(axis);
                        continue;
                    }
                    let common_size = gcd(remaining_size, axis_size);
                    if common_size > 1 {
                        let (major, minor) = axis.split(common_size, mesh);
                        remaining_size /= common_size;
                        factor_sharding.axis_refs.push(major);
                        pending_axes.push_front(minor);
                    } else {
                        pending_axes.push_front(axis);
                    }
                    break;
                }
                if is_minor_most || remaining_size > 1 {
                    factor_sharding.overflow_axes.extend(pending_axes.drain(..));
                }
                factor_shardings.insert(factor_index, factor_sharding);
            }
        }
        let replicated_axes = sharding.map(|sharding| sharding.replicated_axes().to_vec()).unwrap_or_default();
        Ok(Self { factor_shardings, replicated_axes })
    }

    /// Returns the factor shardings of this tensor, keyed by factor index.
    pub fn factor_shardings(&self) -> &BTreeMap<usize, FactorSharding> {
        &self.factor_shardings
    }

    pub fn factor_sharding(&self, factor_index: usize) -> Option<&FactorSharding> {
        self.factor_shardings.get(&factor_index)
    }

    pub fn replicated_axes(&self) -> &[AxisRef] {
        self.replicated_axes.as_slice()
    }

    /// Sets the axes and overflow axes of `factor_index`, if this tensor maps to that factor. Returns `true` if that
    /// changed the sharding of this tensor.
    pub fn update_sharding_axes(
        &mut self,
        factor_index: usize,
        axis_refs: Vec<AxisRef>,
        overflow_axes: Vec<AxisRef>,
    ) -> bool {
        let Some(factor_sharding) = self.factor_shardings.get_mut(&factor_index) else {
            return false;
        };
        let is_updated = factor_sharding.axis_refs != axis_refs || factor_sharding.overflow_axes != overflow_axes;
        factor_sharding.axis_refs = axis_refs;
        factor_sharding.overflow_axes = overflow_axes;
        is_updated
    }

    /// Materializes the tensor sharding that corresponds to the current factor shardings of this tensor. Adjacent
    /// sub-axes of the same axis are merged.
    pub fn create_tensor_sharding<N: Into<String>>(
        &self,
        mapping: &TensorMapping,
        mesh_name: N,
        mesh: &Mesh,
    ) -> TensorSharding {
        let dim_shardings = mapping
            .dim_mappings()
            .iter()
            .map(|dim_mapping| {
                let mut axes: Vec<AxisRef> = Vec::new();
                let mut is_closed = false;
                for factor_index in dim_mapping.factor_indices() {
                    let Some(factor_sharding) = self.factor_shardings.get(factor_index) else {
                        continue;
                    };
                    is_closed |= factor_sharding.is_closed;
                    for axis in factor_sharding.axis_refs.iter().chain(&factor_sharding.overflow_axes) {
                        match axes.last_mut() {
                            Some(last) if last.can_merge(axis) => *last = last.merge(axis, mesh),
                            _ => axes.push(axis.clone()),
                        }
                    }
                }
                DimensionSharding::new(axes, is_closed)
            })
            .collect();
        TensorSharding::with_replicated_axes(mesh_name, dim_shardings, self.replicated_axes.clone())
    }
}

/// Which operands and results of an operation had their shardings changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateTensorShardings {
    updated_operands: Vec<bool>,
    updated_results: Vec<bool>,
}

impl UpdateTensorShardings {
    pub fn new(num_operands: usize, num_results: usize) -> Self {
        Self { updated_operands: vec![false; num_operands], updated_results: vec![false; num_results] }
    }

    /// Returns the indices of the updated operands, in increasing order.
    pub fn updated_operands(&self) -> impl Iterator<Item = usize> + '_ {
        self.updated_operands.iter().enumerate().filter(|&(_, &is_updated)| is_updated).map(|(index, _)| index)
    }

    /// Returns the indices of the updated results, in increasing order.
    pub fn updated_results(&self) -> impl Iterator<Item = usize> + '_ {
        self.updated_results.iter().enumerate().filter(|&(_, &is_updated)| is_updated).map(|(index, _)| index)
    }

    /// Returns `true` if no operand or result was updated.
    pub fn is_empty(&self) -> bool {
        !self.updated_operands.iter().chain(&self.updated_results).any(|&is_updated| is_updated)
    }
}

impl BitOrAssign for UpdateTensorShardings {
    fn bitor_assign(&mut self, rhs: Self) {
        debug_assert_eq!(self.updated_operands.len(), rhs.updated_operands.len());
        debug_assert_eq!(self.updated_results.len(), rhs.updated_results.len());
        for (lhs, rhs) in self.updated_operands.iter_mut().zip(rhs.updated_operands) {
            *lhs |= rhs;
        }
        for (lhs, rhs) in self.updated_results.iter_mut().zip(rhs.updated_results) {
            *lhs |= rhs;
        }
    }
}

/// Factor shardings of all operands and results of an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardingProjection {
    operands: Vec<TensorFactorShardings>,
    results: Vec<TensorFactorShardings>,
}

impl ShardingProjection {
    /// Projects the operand and result shardings of `operation` onto the factors of `rule`.
    pub fn build(
        function: &Function,
        operation: OperationId,
        rule: &OpShardingRule,
        mesh: &Mesh,
    ) -> Result<Self, ShardingError> {
        let op = function.operation(operation);
        let operand_ranks = op.operands().iter().map(|&value| function.value_type(value).rank()).collect::<Vec<_>>();
        let result_ranks = op.results().iter().map(|&value| function.value_type(value).rank()).collect::<Vec<_>>();
        rule.validate(&operand_ranks, &result_ranks)?;
        let project = |values: &[reshard_ir::ValueId], mappings: &[TensorMapping]| {
            values
                .iter()
                .zip(mappings)
                .map(|(&value, mapping)| {
                    TensorFactorShardings::build(function.sharding(value), mapping, rule.factor_sizes(), mesh)
                })
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            operands: project(op.operands(), rule.operand_mappings())?,
            results: project(op.results(), rule.result_mappings())?,
        })
    }

    pub fn operands(&self) -> &[TensorFactorShardings] {
        self.operands.as_slice()
    }

    pub fn results(&self) -> &[TensorFactorShardings] {
        self.results.as_slice()
    }

    pub fn operand(&self, index: usize) -> Option<&TensorFactorShardings> {
        self.operands.get(index)
    }

    pub fn result(&self, index: usize) -> Option<&TensorFactorShardings> {
        self.results.get(index)
    }

    /// Returns an iterator over the factor shardings of all operands followed by those of all results.
    pub fn tensors(&self) -> impl Iterator<Item = &TensorFactorShardings> {
        self.operands.iter().chain(&self.results)
    }

    /// Sets the sharding of `factor_index` in every tensor that maps to it, returning which tensors changed.
    pub fn update_sharding(
        &mut self,
        factor_index: usize,
        axis_refs: &[AxisRef],
        overflow_axes: &[AxisRef],
    ) -> UpdateTensorShardings {
        let mut updates = UpdateTensorShardings::new(self.operands.len(), self.results.len());
        for (tensor, is_updated) in self.operands.iter_mut().zip(updates.updated_operands.iter_mut()) {
            *is_updated = tensor.update_sharding_axes(factor_index, axis_refs.to_vec(), overflow_axes.to_vec());
        }
        for (tensor, is_updated) in self.results.iter_mut().zip(updates.updated_results.iter_mut()) {
            *is_updated = tensor.update_sharding_axes(factor_index, axis_refs.to_vec(), overflow_axes.to_vec());
        }
        updates
    }
}

fn gcd(mut lhs: usize, mut rhs: usize) -> usize {
    while rhs != 0 {
        (lhs, rhs) = (rhs, lhs % rhs);
    }
    lhs
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use reshard_core::DimMapping;

    use super::*;

    fn mesh() -> Mesh {
        Mesh::from_axes([("x", 4), ("y", 2)]).unwrap()
    }

    fn x() -> AxisRef {
        AxisRef::new("x")
    }

    fn y() -> AxisRef {
        AxisRef::new("y")
    }

    #[test]
    fn test_build_one_factor_per_dimension() {
        let sharding = TensorSharding::new(
            "mesh",
            vec![DimensionSharding::sharded_by(["x"]), DimensionSharding::new(vec![y()], false)],
        );
        let mapping = TensorMapping::from_factors([0, 2]);
        let shardings = TensorFactorShardings::build(Some(&sharding), &mapping, &[8, 16, 32], &mesh()).unwrap();
        assert_eq!(
            shardings.factor_sharding(0),
            Some(&FactorSharding { axis_refs: vec![x()], overflow_axes: Vec::new(), is_closed: true, is_minor_most: true })
        );
        assert_eq!(
            shardings.factor_sharding(2),
            Some(&FactorSharding { axis_refs: vec![y()], overflow_axes: Vec::new(), is_closed: false, is_minor_most: true })
        );
        assert_eq!(shardings.factor_sharding(1), None);
    }

    #[test]
    fn test_build_missing_sharding() {
        let mapping = TensorMapping::from_factors([0, 1]);
        let shardings = TensorFactorShardings::build(None, &mapping, &[8, 16], &mesh()).unwrap();
        assert_eq!(shardings.factor_shardings().len(), 2);
        assert!(shardings.factor_shardings().values().all(|sharding| sharding.axis_refs.is_empty() && !sharding.is_closed));
    }

    #[test]
    fn test_build_splits_axes_across_factors() {
        let sharding = TensorSharding::new("mesh", vec![DimensionSharding::sharded_by(["x", "y"])]);
        let mapping = TensorMapping::new(vec![DimMapping::new(vec![0, 1])]);
        let shardings = TensorFactorShardings::build(Some(&sharding), &mapping, &[2, 4], &mesh()).unwrap();
        assert_eq!(shardings.factor_sharding(0).unwrap().axis_refs, vec![AxisRef::sub_axis("x", 1, 2)]);
        assert!(!shardings.factor_sharding(0).unwrap().is_minor_most);
        assert_eq!(shardings.factor_sharding(1).unwrap().axis_refs, vec![AxisRef::sub_axis("x", 2, 2), y()]);
        assert!(shardings.factor_sharding(1).unwrap().overflow_axes.is_empty());

        let recreated = shardings.create_tensor_sharding(&mapping, "mesh", &mesh());
        assert_eq!(recreated, sharding);
    }

    #[test]
    fn test_build_overflow_axes() {
        let sharding = TensorSharding::new("mesh", vec![DimensionSharding::sharded_by(["x", "y"])]);
        let mapping = TensorMapping::from_factors([0]);
        let shardings = TensorFactorShardings::build(Some(&sharding), &mapping, &[4], &mesh()).unwrap();
        assert_eq!(shardings.factor_sharding(0).unwrap().axis_refs, vec![x()]);
        assert_eq!(shardings.factor_sharding(0).unwrap().overflow_axes, vec![y()]);

        let shardings = TensorFactorShardings::build(Some(&sharding), &mapping, &[3], &mesh()).unwrap();
        assert_eq!(shardings.factor_sharding(0).unwrap().axis_refs, Vec::new());
        assert_eq!(shardings.factor_sharding(0).unwrap().overflow_axes, vec![x(), y()]);

        let recreated = shardings.create_tensor_sharding(&mapping, "mesh", &mesh());
        assert_eq!(recreated, sharding);
    }

    #[test]
    fn test_update_sharding_axes() {
        let mapping = TensorMapping::from_factors([0, 1]);
        let mut shardings = TensorFactorShardings::build(None, &mapping, &[8, 16], &mesh()).unwrap();
        assert!(shardings.update_sharding_axes(0, vec![x()], Vec::new()));
        assert!(!shardings.update_sharding_axes(0, vec![x()], Vec::new()));
        assert!(!shardings.update_sharding_axes(2, vec![y()], Vec::new()));
        assert_eq!(
            shardings.create_tensor_sharding(&mapping, "mesh", &mesh()).to_string(),
            "#sdy.sharding<@mesh, [{\"x\", ?}, {?}]>",
        );
    }

    #[test]
    fn test_create_tensor_sharding_merges_sub_axes() {
        let mapping = TensorMapping::new(vec![DimMapping::new(vec![0, 1])]);
        let sharding = TensorSharding::new("mesh", vec![DimensionSharding::replicated()]);
        let mut shardings = TensorFactorShardings::build(Some(&sharding), &mapping, &[2, 2], &mesh()).unwrap();
        shardings.update_sharding_axes(0, vec![AxisRef::sub_axis("x", 1, 2)], Vec::new());
        shardings.update_sharding_axes(1, vec![AxisRef::sub_axis("x", 2, 2)], Vec::new());
        assert_eq!(
            shardings.create_tensor_sharding(&mapping, "mesh", &mesh()),
            TensorSharding::new("mesh", vec![DimensionSharding::sharded_by(["x"])]),
        );
    }

    #[test]
    fn test_update_tensor_shardings() {
        let mut updates = UpdateTensorShardings::new(2, 1);
        assert!(updates.is_empty());
        let mut other = UpdateTensorShardings::new(2, 1);
        other.updated_operands[1] = true;
        updates |= other;
        let mut other = UpdateTensorShardings::new(2, 1);
        other.updated_results[0] = true;
        updates |= other;
        assert!(!updates.is_empty());
        assert_eq!(updates.updated_operands().collect::<Vec<_>>(), vec![1]);
        assert_eq!(updates.updated_results().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(6, 4), 2);
        assert_eq!(gcd(3, 4), 1);
        assert_eq!(gcd(8, 8), 8);
    }
}
