//! Majority-vote resolution of conflicting factor shardings.
//!
//! Every axis sequence that some tensor of an operation uses for a factor (and every prefix of such a sequence that
//! another tensor uses) becomes a candidate for that factor. Candidates are then committed greedily: the candidate
//! used by the most tensors wins, with ties broken by the larger sharding size. Committing a candidate discards the
//! candidates of other factors that overlap it, and narrows the candidates of the same factor to those that extend it.

use std::cmp::Ordering;

use indexmap::{IndexMap, IndexSet};
use reshard_core::Mesh;

use super::axes::{AxesWithTail, FactorAxesPair};
use crate::projection::ShardingProjection;

/// Candidate axis sequence for a factor, together with the number of tensors that support it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FactorAxesCandidate<'a> {
    pub factor_axes: FactorAxesPair<'a>,

    /// Number of tensors whose sharding of the factor is, or extends, these axes.
    pub count: usize,

    /// Sharding size of the axes. Once a prefix of the axes has been committed for the factor, this is only the
    /// size beyond that prefix.
    pub sharding_size: usize,
}

impl<'a> FactorAxesCandidate<'a> {
    fn new(factor_axes: FactorAxesPair<'a>, sharding_size: usize) -> Self {
        Self { factor_axes, count: 0, sharding_size }
    }
}

impl PartialOrd for FactorAxesCandidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FactorAxesCandidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| self.sharding_size.cmp(&other.sharding_size))
            .then_with(|| self.factor_axes.cmp(&other.factor_axes))
    }
}

/// Collects the candidates for all factors of `projection`, in discovery order.
pub fn find_factor_axes_candidates<'a>(
    projection: &'a ShardingProjection,
    num_factors: usize,
    mesh: &Mesh,
) -> Vec<FactorAxesCandidate<'a>> {
    // Every non-empty sequence obtained by dropping axes from the end of some tensor's sharding of each factor.
    let mut factor_axes_sets: Vec<IndexSet<AxesWithTail<'a>>> = (0..num_factors).map(|_| IndexSet::new()).collect();
    for tensor in projection.tensors() {
        for (&factor_index, factor_sharding) in tensor.factor_shardings() {
            let Some(axes_set) = factor_axes_sets.get_mut(factor_index) else {
                continue;
            };
            let mut axes = factor_sharding.axis_refs.as_slice();
            while !axes.is_empty() {
                axes_set.insert(AxesWithTail::new(axes));
                axes = &axes[..axes.len() - 1];
            }
        }
    }

    let mut candidates: IndexMap<FactorAxesPair<'a>, FactorAxesCandidate<'a>> = IndexMap::new();
    let mut register = |factor_axes: FactorAxesPair<'a>| {
        candidates
            .entry(factor_axes)
            .or_insert_with(|| FactorAxesCandidate::new(factor_axes, factor_axes.axes.sharding_size(mesh)))
            .count += 1;
    };
    for tensor in projection.tensors() {
        for (&factor_index, factor_sharding) in tensor.factor_shardings() {
            if factor_sharding.axis_refs.is_empty() {
                continue;
            }
            let axes = AxesWithTail::new(&factor_sharding.axis_refs);
            register(FactorAxesPair::new(factor_index, axes));
            let Some(axes_set) = factor_axes_sets.get(factor_index) else {
                continue;
            };
            for prefix in axes_set {
                if prefix.strict_prefix_of(&axes) {
                    register(FactorAxesPair::new(factor_index, *prefix));
                }
            }
        }
    }
    candidates.into_values().collect()
}

/// Resolves a single axis sequence for every factor of `projection` by majority vote. Factors that no tensor shards
/// are resolved to the empty sequence. The returned sequences of distinct factors never overlap.
pub fn find_common_axes<'a>(
    projection: &'a ShardingProjection,
    num_factors: usize,
    mesh: &Mesh,
) -> Vec<AxesWithTail<'a>> {
    let mut candidates = find_factor_axes_candidates(projection, num_factors, mesh);
    let mut factor_axes = vec![AxesWithTail::empty(); num_factors];
    let mut best: Option<FactorAxesPair<'a>> = None;
    while !candidates.is_empty() {
        if let Some(best) = best {
            debug_assert!(
                factor_axes.iter().enumerate().all(|(factor_index, axes)| {
                    factor_index == best.factor_index || !axes.overlaps(&best.axes)
                }),
                "committed axes {best} overlap the axes of another factor",
            );
            debug_assert!(
                factor_axes[best.factor_index].strict_prefix_of(&best.axes),
                "committed axes {best} do not extend the axes committed earlier for the same factor",
            );
            factor_axes[best.factor_index] = best.axes;
            tracing::trace!(factor_axes = %best, "committed factor axes");
        }

        let mut next_best: Option<FactorAxesCandidate<'a>> = None;
        let mut candidate_index = 0;
        while candidate_index < candidates.len() {
            let candidate = &mut candidates[candidate_index];
            if let Some(best) = best {
                if candidate.factor_axes.factor_index == best.factor_index {
                    if !best.axes.strict_prefix_of(&candidate.factor_axes.axes) {
                        candidates.swap_remove(candidate_index);
                        continue;
                    }
                    debug_assert!(best.axes.strict_prefix_of(&candidate.factor_axes.axes));
                    candidate.sharding_size = candidate.factor_axes.axes.sharding_size_excluding(mesh, &best.axes);
                } else if candidate.factor_axes.overlaps(&best) {
                    candidates.swap_remove(candidate_index);
                    continue;
                }
            }
            let candidate = *candidate;
            // Ties are impossible because the ordering includes the factor axes, so only strictly better candidates
            // replace the current one.
            match next_best {
                Some(next_best) if next_best >= candidate => {}
                _ => next_best = Some(candidate),
            }
            candidate_index += 1;
        }
        best = next_best.map(|candidate| candidate.factor_axes);
    }
    factor_axes
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use reshard_core::{AxisRef, DimensionSharding, OpShardingRule, TensorMapping, TensorSharding};
    use reshard_ir::{Function, OperationKind, TensorType};

    use super::*;

    fn mesh() -> Mesh {
        Mesh::from_axes([("x", 4), ("y", 2)]).unwrap()
    }

    fn dim(axes: &[AxisRef]) -> DimensionSharding {
        DimensionSharding::closed(axes.to_vec())
    }

    /// Builds the projection of a matrix product `([i, k], [k, j])->([i, j]) {i=8, j=16, k=32}`.
    fn matmul_projection(
        lhs: [&[AxisRef]; 2],
        rhs: [&[AxisRef]; 2],
        result: [&[AxisRef]; 2],
    ) -> (ShardingProjection, OpShardingRule) {
        let sharding = |dims: [&[AxisRef]; 2]| Some(TensorSharding::new("mesh", vec![dim(dims[0]), dim(dims[1])]));
        let mut function = Function::new("main");
        let lhs = function.add_argument(TensorType::f32(&[8, 32]), sharding(lhs));
        let rhs = function.add_argument(TensorType::f32(&[32, 16]), sharding(rhs));
        let dot =
            function.append_operation(OperationKind::Dot, vec![lhs, rhs], vec![TensorType::f32(&[8, 16])]).unwrap();
        let dot_result = function.operation(dot).results()[0];
        function.set_sharding(dot_result, sharding(result)).unwrap();
        let rule = OpShardingRule::new(
            vec![8, 16, 32],
            vec![TensorMapping::from_factors([0, 2]), TensorMapping::from_factors([2, 1])],
            vec![TensorMapping::from_factors([0, 1])],
        )
        .unwrap();
        let projection = ShardingProjection::build(&function, dot, &rule, &mesh()).unwrap();
        (projection, rule)
    }

    fn render(axes: &[AxesWithTail<'_>]) -> Vec<String> {
        axes.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_candidates_count_prefixes() {
        let x = AxisRef::new("x");
        let y = AxisRef::new("y");
        let x_1_2 = AxisRef::sub_axis("x", 1, 2);
        let (projection, _) = matmul_projection([&[x.clone(), y.clone()], &[]], [&[], &[]], [&[x_1_2.clone()], &[]]);
        let mesh = mesh();
        let candidates = find_factor_axes_candidates(&projection, 3, &mesh);
        let summary = candidates
            .iter()
            .map(|candidate| (candidate.factor_axes.to_string(), candidate.count, candidate.sharding_size))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                ("#0 -> [\"x\", \"y\"]".to_string(), 1, 8),
                ("#0 -> [\"x\"]".to_string(), 1, 4),
                ("#0 -> [\"x\":(1)2]".to_string(), 2, 2),
            ],
        );
    }

    #[test]
    fn test_common_axes_majority_wins() {
        let x = AxisRef::new("x");
        let y = AxisRef::new("y");
        // i: [x] in lhs and result. k: [y] in lhs and rhs. j: [x] in rhs.
        let (projection, rule) =
            matmul_projection([&[x.clone()], &[y.clone()]], [&[y.clone()], &[x.clone()]], [&[x.clone()], &[]]);
        let common_axes = find_common_axes(&projection, rule.num_factors(), &mesh());
        assert_eq!(render(&common_axes), vec!["[\"x\"]", "[]", "[\"y\"]"]);
    }

    #[test]
    fn test_common_axes_sharding_size_breaks_count_ties() {
        let x = AxisRef::new("x");
        let y = AxisRef::new("y");
        // i: [y] in lhs. j: [x, y] in rhs. Both have one vote, but j shards more.
        let (projection, rule) = matmul_projection([&[y.clone()], &[]], [&[], &[x.clone(), y.clone()]], [&[], &[]]);
        let common_axes = find_common_axes(&projection, rule.num_factors(), &mesh());
        assert_eq!(render(&common_axes), vec!["[]", "[\"x\", \"y\"]", "[]"]);
    }

    #[test]
    fn test_common_axes_full_ties_prefer_larger_factor_index() {
        let x = AxisRef::new("x");
        // i: [x] in lhs. j: [x] in rhs.
        let (projection, rule) = matmul_projection([&[x.clone()], &[]], [&[], &[x.clone()]], [&[], &[]]);
        let common_axes = find_common_axes(&projection, rule.num_factors(), &mesh());
        assert_eq!(render(&common_axes), vec!["[]", "[\"x\"]", "[]"]);
    }

    #[test]
    fn test_common_axes_non_overlapping_sub_axes() {
        let x_1_2 = AxisRef::sub_axis("x", 1, 2);
        let x_2_2 = AxisRef::sub_axis("x", 2, 2);
        let y = AxisRef::new("y");
        let (projection, rule) = matmul_projection(
            [&[x_1_2.clone()], &[y.clone()]],
            [&[y.clone()], &[x_2_2.clone()]],
            [&[x_1_2.clone()], &[x_2_2.clone()]],
        );
        let common_axes = find_common_axes(&projection, rule.num_factors(), &mesh());
        assert_eq!(render(&common_axes), vec!["[\"x\":(1)2]", "[\"x\":(2)2]", "[\"y\"]"]);
    }

    #[test]
    fn test_common_axes_extends_committed_prefix() {
        let x = AxisRef::new("x");
        let y = AxisRef::new("y");
        let x_1_2 = AxisRef::sub_axis("x", 1, 2);
        // i: [x:(1)2] in lhs, [x, y] in result. The common prefix x:(1)2 wins first, then extends to [x, y].
        let (projection, rule) =
            matmul_projection([&[x_1_2.clone()], &[]], [&[], &[]], [&[x.clone(), y.clone()], &[]]);
        let common_axes = find_common_axes(&projection, rule.num_factors(), &mesh());
        assert_eq!(render(&common_axes), vec!["[\"x\", \"y\"]", "[]", "[]"]);

        // i: [x] in lhs, [x, y] in result. [x] wins first, then extends to [x, y].
        let (projection, rule) = matmul_projection([&[x.clone()], &[]], [&[], &[]], [&[x, y], &[]]);
        let common_axes = find_common_axes(&projection, rule.num_factors(), &mesh());
        assert_eq!(render(&common_axes), vec!["[\"x\", \"y\"]", "[]", "[]"]);
    }

    #[test]
    fn test_common_axes_without_shardings() {
        let (projection, rule) = matmul_projection([&[], &[]], [&[], &[]], [&[], &[]]);
        let common_axes = find_common_axes(&projection, rule.num_factors(), &mesh());
        assert!(common_axes.iter().all(AxesWithTail::is_empty));
        assert_eq!(common_axes.len(), 3);
    }
}
