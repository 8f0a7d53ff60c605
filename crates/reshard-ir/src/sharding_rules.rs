//! Sharding rule registry.
//!
//! Operations either carry an explicit [`OpShardingRule`] or get one synthesized from their [`OperationKind`] and the
//! shapes of their operands and results. Operations for which no rule can be derived (e.g., custom calls without an
//! explicit rule, reshards, and returns) are not subject to sharding-rule-based transformations.

use reshard_core::{OpShardingRule, TensorMapping, TensorSharding};

use crate::functions::Function;
use crate::operations::{DotDimensionNumbers, OperationId, OperationKind};

/// Returns the sharding rule of `operation`: its explicit rule if it has one, and a rule synthesized from its kind
/// otherwise. Returns [`None`] if `operation` has no applicable rule or if its operand and result shapes do not match
/// what its kind expects.
pub fn get_or_create_sharding_rule(function: &Function, operation: OperationId) -> Option<OpShardingRule> {
    let op = function.operation(operation);
    if let Some(rule) = op.sharding_rule() {
        return Some(rule.clone());
    }
    let operand_shapes = op.operands().iter().map(|&value| function.value_type(value).shape()).collect::<Vec<_>>();
    let result_shapes = op.results().iter().map(|&value| function.value_type(value).shape()).collect::<Vec<_>>();
    match op.kind() {
        kind if kind.is_elementwise() => elementwise_rule(&operand_shapes, &result_shapes),
        OperationKind::Dot => dot_rule(&operand_shapes, &result_shapes),
        OperationKind::DotGeneral { dimension_numbers } => {
            dot_general_rule(dimension_numbers, &operand_shapes, &result_shapes)
        }
        OperationKind::Transpose { permutation } => transpose_rule(permutation, &operand_shapes, &result_shapes),
        _ => None,
    }
}

/// Returns the name of the mesh shared by all present `operand_shardings` and `result_shardings`. Returns [`None`] if
/// none of them is present or if they refer to different meshes.
pub fn common_mesh_name<'s>(
    operand_shardings: &[Option<&'s TensorSharding>],
    result_shardings: &[Option<&'s TensorSharding>],
) -> Option<&'s str> {
    let mut mesh_name = None;
    for sharding in operand_shardings.iter().chain(result_shardings).flatten().copied() {
        match mesh_name {
            None => mesh_name = Some(sharding.mesh_name()),
            Some(name) if name != sharding.mesh_name() => return None,
            Some(_) => {}
        }
    }
    mesh_name
}

fn elementwise_rule(operand_shapes: &[&[usize]], result_shapes: &[&[usize]]) -> Option<OpShardingRule> {
    let [result_shape] = result_shapes else {
        return None;
    };
    if operand_shapes.is_empty() || operand_shapes.iter().any(|shape| shape != result_shape) {
        return None;
    }
    let mapping = TensorMapping::from_factors(0..result_shape.len());
    OpShardingRule::new(result_shape.to_vec(), vec![mapping.clone(); operand_shapes.len()], vec![mapping]).ok()
}

fn dot_rule(operand_shapes: &[&[usize]], result_shapes: &[&[usize]]) -> Option<OpShardingRule> {
    let ([lhs_shape, rhs_shape], [result_shape]) = (operand_shapes, result_shapes) else {
        return None;
    };
    // Factors are ordered as lhs non-contracting, rhs non-contracting, and contracting.
    let (factor_sizes, lhs, rhs, result) = match (*lhs_shape, *rhs_shape) {
        (&[m, k], &[rhs_k, n]) if k == rhs_k => (vec![m, n, k], vec![0, 2], vec![2, 1], vec![0, 1]),
        (&[m, k], &[rhs_k]) if k == rhs_k => (vec![m, k], vec![0, 1], vec![1], vec![0]),
        (&[k], &[rhs_k, n]) if k == rhs_k => (vec![n, k], vec![1], vec![1, 0], vec![0]),
        (&[k], &[rhs_k]) if k == rhs_k => (vec![k], vec![0], vec![0], Vec::new()),
        _ => return None,
    };
    let result_dimension_sizes = result.iter().map(|&factor| factor_sizes[factor]).collect::<Vec<_>>();
    if result_dimension_sizes.as_slice() != *result_shape {
        return None;
    }
    let contracting_factor = factor_sizes.len() - 1;
    OpShardingRule::new(
        factor_sizes,
        vec![TensorMapping::from_factors(lhs), TensorMapping::from_factors(rhs)],
        vec![TensorMapping::from_factors(result)],
    )
    .and_then(|rule| rule.with_reduction_factors(vec![contracting_factor]))
    .ok()
}

fn dot_general_rule(
    dimension_numbers: &DotDimensionNumbers,
    operand_shapes: &[&[usize]],
    result_shapes: &[&[usize]],
) -> Option<OpShardingRule> {
    let ([lhs_shape, rhs_shape], [result_shape]) = (operand_shapes, result_shapes) else {
        return None;
    };
    let DotDimensionNumbers {
        lhs_batching_dimensions,
        rhs_batching_dimensions,
        lhs_contracting_dimensions,
        rhs_contracting_dimensions,
    } = dimension_numbers;
    if lhs_batching_dimensions.len() != rhs_batching_dimensions.len()
        || lhs_contracting_dimensions.len() != rhs_contracting_dimensions.len()
    {
        return None;
    }

    let lhs_free = free_dimensions(lhs_shape.len(), lhs_batching_dimensions, lhs_contracting_dimensions);
    let rhs_free = free_dimensions(rhs_shape.len(), rhs_batching_dimensions, rhs_contracting_dimensions);

    let mut factor_sizes = Vec::new();
    let mut lhs_factors = vec![None; lhs_shape.len()];
    let mut rhs_factors = vec![None; rhs_shape.len()];
    let mut result_factors = Vec::new();
    for (&lhs_dimension, &rhs_dimension) in lhs_batching_dimensions.iter().zip(rhs_batching_dimensions) {
        let size = *lhs_shape.get(lhs_dimension)?;
        if rhs_shape.get(rhs_dimension) != Some(&size) {
            return None;
        }
        *lhs_factors.get_mut(lhs_dimension)? = Some(factor_sizes.len());
        *rhs_factors.get_mut(rhs_dimension)? = Some(factor_sizes.len());
        result_factors.push(factor_sizes.len());
        factor_sizes.push(size);
    }
    for &dimension in &lhs_free {
        lhs_factors[dimension] = Some(factor_sizes.len());
        result_factors.push(factor_sizes.len());
        factor_sizes.push(lhs_shape[dimension]);
    }
    for &dimension in &rhs_free {
        rhs_factors[dimension] = Some(factor_sizes.len());
        result_factors.push(factor_sizes.len());
        factor_sizes.push(rhs_shape[dimension]);
    }
    let mut reduction_factors = Vec::new();
    for (&lhs_dimension, &rhs_dimension) in lhs_contracting_dimensions.iter().zip(rhs_contracting_dimensions) {
        let size = *lhs_shape.get(lhs_dimension)?;
        if rhs_shape.get(rhs_dimension) != Some(&size) {
            return None;
        }
        *lhs_factors.get_mut(lhs_dimension)? = Some(factor_sizes.len());
        *rhs_factors.get_mut(rhs_dimension)? = Some(factor_sizes.len());
        reduction_factors.push(factor_sizes.len());
        factor_sizes.push(size);
    }

    let result_dimension_sizes = result_factors.iter().map(|&factor| factor_sizes[factor]).collect::<Vec<_>>();
    if result_dimension_sizes.as_slice() != *result_shape {
        return None;
    }
    let lhs_factors = lhs_factors.into_iter().collect::<Option<Vec<_>>>()?;
    let rhs_factors = rhs_factors.into_iter().collect::<Option<Vec<_>>>()?;
    OpShardingRule::new(
        factor_sizes,
        vec![TensorMapping::from_factors(lhs_factors), TensorMapping::from_factors(rhs_factors)],
        vec![TensorMapping::from_factors(result_factors)],
    )
    .and_then(|rule| rule.with_reduction_factors(reduction_factors))
    .ok()
}

/// Returns the dimensions of a `dot_general` operand that are neither batching nor contracting dimensions.
fn free_dimensions(rank: usize, batching_dimensions: &[usize], contracting_dimensions: &[usize]) -> Vec<usize> {
    (0..rank)
        .filter(|dimension| !batching_dimensions.contains(dimension) && !contracting_dimensions.contains(dimension))
        .collect()
}

fn transpose_rule(
    permutation: &[usize],
    operand_shapes: &[&[usize]],
    result_shapes: &[&[usize]],
) -> Option<OpShardingRule> {
    let ([operand_shape], [result_shape]) = (operand_shapes, result_shapes) else {
        return None;
    };
    if permutation.len() != operand_shape.len() || result_shape.len() != operand_shape.len() {
        return None;
    }
    let mut is_used = vec![false; permutation.len()];
    for (result_dimension, &operand_dimension) in permutation.iter().enumerate() {
        let operand_size = *operand_shape.get(operand_dimension)?;
        if is_used[operand_dimension] || result_shape[result_dimension] != operand_size {
            return None;
        }
        is_used[operand_dimension] = true;
    }
    OpShardingRule::new(
        operand_shape.to_vec(),
        vec![TensorMapping::from_factors(0..operand_shape.len())],
        vec![TensorMapping::from_factors(permutation.iter().copied())],
    )
    .ok()
}
