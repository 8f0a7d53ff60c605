//! Insertion of explicit reshards.
//!
//! An operation with a sharding rule can only be partitioned if every factor of the rule is sharded the same way in
//! all operands and results that refer to it. This pass finds operations for which that is not the case, resolves a
//! common sharding for every factor by majority vote, and inserts `sdy.reshard` operations for every operand and
//! result whose sharding had to change:
//!
//!   - operands are resharded right before the operation, to the resolved sharding;
//!   - results get the resolved sharding, and are resharded right after the operation back to their original
//!     sharding, so that all other users keep observing the original sharding.
//!
//! Values returned from a function are also resharded to the declared result shardings of the function.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Display;

use reshard_core::{Mesh, OpShardingRule, TensorSharding};
use reshard_ir::{
    Function, OperationId, OperationKind, SymbolTable, ValueId, common_mesh_name, get_or_create_sharding_rule,
};

use crate::errors::PassError;
use crate::pass::Pass;
use crate::projection::{ShardingProjection, UpdateTensorShardings};

pub mod axes;
pub mod majority_vote;

pub use axes::{AxesWithTail, FactorAxesPair};
pub use majority_vote::{FactorAxesCandidate, find_common_axes, find_factor_axes_candidates};

/// What [`insert_explicit_reshards`] did with a single operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperationOutcome {
    /// The operation is a function terminator, whose operands were matched against the function result shardings.
    ExitHandled,

    /// The operation has no sharding rule.
    NoShardingRule,

    /// The operands and results of the operation have no shardings, or have shardings on different meshes.
    NoCommonMesh,

    /// Some factor of the operation is sharded along overflow axes.
    OverflowAxes,

    /// All factors of the operation are already sharded the same way everywhere.
    AlreadyCompatible,

    /// The factor shardings of the operation were resolved and reshards were inserted where needed.
    Rewritten,
}

impl Display for OperationOutcome {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ExitHandled => "exit-handled",
            Self::NoShardingRule => "no-sharding-rule",
            Self::NoCommonMesh => "no-common-mesh",
            Self::OverflowAxes => "overflow-axes",
            Self::AlreadyCompatible => "already-compatible",
            Self::Rewritten => "rewritten",
        };
        formatter.write_str(name)
    }
}

/// Counters accumulated by [`insert_explicit_reshards`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct InsertExplicitReshardsStatistics {
    pub operations_visited: usize,
    pub exits_handled: usize,
    pub skipped_without_sharding_rule: usize,
    pub skipped_without_common_mesh: usize,
    pub skipped_with_overflow_axes: usize,
    pub skipped_as_compatible: usize,
    pub operations_rewritten: usize,
    pub reshards_inserted: usize,
}

impl InsertExplicitReshardsStatistics {
    fn record(&mut self, outcome: OperationOutcome) {
        self.operations_visited += 1;
        let counter = match outcome {
            OperationOutcome::ExitHandled => &mut self.exits_handled,
            OperationOutcome::NoShardingRule => &mut self.skipped_without_sharding_rule,
            OperationOutcome::NoCommonMesh => &mut self.skipped_without_common_mesh,
            OperationOutcome::OverflowAxes => &mut self.skipped_with_overflow_axes,
            OperationOutcome::AlreadyCompatible => &mut self.skipped_as_compatible,
            OperationOutcome::Rewritten => &mut self.operations_rewritten,
        };
        *counter += 1;
    }

    fn merge(&mut self, other: &Self) {
        self.operations_visited += other.operations_visited;
        self.exits_handled += other.exits_handled;
        self.skipped_without_sharding_rule += other.skipped_without_sharding_rule;
        self.skipped_without_common_mesh += other.skipped_without_common_mesh;
        self.skipped_with_overflow_axes += other.skipped_with_overflow_axes;
        self.skipped_as_compatible += other.skipped_as_compatible;
        self.operations_rewritten += other.operations_rewritten;
        self.reshards_inserted += other.reshards_inserted;
    }
}

/// [`Pass`] that inserts explicit reshards wherever the factor shardings of an operation are incompatible.
#[derive(Clone, Debug, Default)]
pub struct InsertExplicitReshardsPass {
    statistics: InsertExplicitReshardsStatistics,
}

impl InsertExplicitReshardsPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counters accumulated over all runs of this pass.
    pub fn insert_explicit_reshards_statistics(&self) -> &InsertExplicitReshardsStatistics {
        &self.statistics
    }
}

impl Pass for InsertExplicitReshardsPass {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed("InsertExplicitReshardsPass")
    }

    fn argument(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed("sdy-insert-explicit-reshards"))
    }

    fn description(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(
            "Inserts explicit reshards to make all operations have compatible shardings, i.e., to make every factor \
             sharded the same way across all operands and results of an operation.",
        ))
    }

    fn run_on_function(&mut self, function: &mut Function, symbol_table: &SymbolTable) -> Result<(), PassError> {
        let statistics = insert_explicit_reshards(function, symbol_table)?;
        self.statistics.merge(&statistics);
        Ok(())
    }

    fn statistics(&self) -> Vec<(&'static str, usize)> {
        let statistics = &self.statistics;
        vec![
            ("operations-visited", statistics.operations_visited),
            ("exits-handled", statistics.exits_handled),
            ("skipped-without-sharding-rule", statistics.skipped_without_sharding_rule),
            ("skipped-without-common-mesh", statistics.skipped_without_common_mesh),
            ("skipped-with-overflow-axes", statistics.skipped_with_overflow_axes),
            ("skipped-as-compatible", statistics.skipped_as_compatible),
            ("operations-rewritten", statistics.operations_rewritten),
            ("reshards-inserted", statistics.reshards_inserted),
        ]
    }
}

/// Inserts explicit reshards into `function`, visiting its operations in order. Operations inserted by this function
/// are not visited themselves.
///
/// Returns [`PassError::UnknownMesh`] if some operation refers to a mesh that `symbol_table` does not declare.
#[tracing::instrument(skip_all, fields(function = function.name()))]
pub fn insert_explicit_reshards(
    function: &mut Function,
    symbol_table: &SymbolTable,
) -> Result<InsertExplicitReshardsStatistics, PassError> {
    let mut statistics = InsertExplicitReshardsStatistics::default();
    let operations = function.operations().to_vec();
    for operation in operations {
        let outcome = if function.operation(operation).is_return() {
            statistics.reshards_inserted += insert_return_reshards(function, operation)?;
            OperationOutcome::ExitHandled
        } else {
            process_operation(function, operation, symbol_table, &mut statistics)?
        };
        tracing::trace!(%operation, kind = function.operation(operation).kind().name(), %outcome, "visited operation");
        statistics.record(outcome);
    }
    Ok(statistics)
}

/// Reshards every value returned by `terminator` whose sharding differs from the declared sharding of the
/// corresponding function result. Returns the number of inserted reshards.
fn insert_return_reshards(function: &mut Function, terminator: OperationId) -> Result<usize, PassError> {
    let mut reshards_inserted = 0;
    let returned_values = function.operation(terminator).operands().to_vec();
    for (index, value) in returned_values.into_iter().enumerate() {
        let result_sharding = function.result_sharding(index);
        let value_sharding = function.sharding(value);
        if TensorSharding::is_fully_replicated(value_sharding) && TensorSharding::is_fully_replicated(result_sharding)
        {
            continue;
        }
        if result_sharding == value_sharding {
            continue;
        }
        let target_sharding = match (result_sharding, value_sharding) {
            (Some(result_sharding), _) => result_sharding.clone(),
            (None, Some(value_sharding)) => value_sharding.fully_closed_like(),
            (None, None) => continue,
        };
        let reshard = insert_reshard_before(function, terminator, value, target_sharding)?;
        function.set_operand(terminator, index, reshard)?;
        reshards_inserted += 1;
    }
    Ok(reshards_inserted)
}

fn process_operation(
    function: &mut Function,
    operation: OperationId,
    symbol_table: &SymbolTable,
    statistics: &mut InsertExplicitReshardsStatistics,
) -> Result<OperationOutcome, PassError> {
    let Some(rule) = get_or_create_sharding_rule(function, operation) else {
        return Ok(OperationOutcome::NoShardingRule);
    };
    let mesh_name = {
        let operand_shardings = function.operand_shardings(operation);
        let result_shardings = function.result_shardings(operation);
        match common_mesh_name(&operand_shardings, &result_shardings) {
            Some(mesh_name) => mesh_name.to_string(),
            None => return Ok(OperationOutcome::NoCommonMesh),
        }
    };
    let mesh = symbol_table.lookup_mesh(&mesh_name).ok_or_else(|| PassError::UnknownMesh {
        mesh_name: mesh_name.clone(),
        function_name: function.name().to_string(),
        operation: function.operation(operation).kind().name().to_string(),
    })?;

    let mut projection = ShardingProjection::build(function, operation, &rule, mesh)?;
    if has_overflow_axes(&projection) {
        return Ok(OperationOutcome::OverflowAxes);
    }
    if has_compatible_factor_shardings(&projection) {
        return Ok(OperationOutcome::AlreadyCompatible);
    }

    let common_axes = find_common_axes(&projection, rule.num_factors(), mesh)
        .into_iter()
        .map(|axes| axes.to_vec())
        .collect::<Vec<_>>();
    let mut updates = UpdateTensorShardings::new(rule.num_operands(), rule.num_results());
    for (factor_index, axes) in common_axes.iter().enumerate() {
        tracing::debug!(factor_index, axes = ?axes, "resolved factor sharding");
        updates |= projection.update_sharding(factor_index, axes, &[]);
    }
    statistics.reshards_inserted +=
        insert_reshards(function, operation, &projection, &updates, &rule, &mesh_name, mesh)?;
    Ok(OperationOutcome::Rewritten)
}

/// Returns `true` if any factor of any tensor of `projection` has overflow axes.
pub fn has_overflow_axes(projection: &ShardingProjection) -> bool {
    projection
        .tensors()
        .flat_map(|tensor| tensor.factor_shardings().values())
        .any(|factor_sharding| !factor_sharding.overflow_axes.is_empty())
}

/// Returns `true` if every factor is sharded along the same axes in all tensors of `projection` that refer to it.
pub fn has_compatible_factor_shardings(projection: &ShardingProjection) -> bool {
    let mut factor_axes = HashMap::new();
    for tensor in projection.tensors() {
        for (&factor_index, factor_sharding) in tensor.factor_shardings() {
            let axes = factor_axes.entry(factor_index).or_insert(&factor_sharding.axis_refs);
            if *axes != &factor_sharding.axis_refs {
                return false;
            }
        }
    }
    true
}

/// Inserts reshards for the operands and results of `operation` that `updates` marks as changed, materializing the
/// new shardings from `projection`. Returns the number of inserted reshards.
fn insert_reshards(
    function: &mut Function,
    operation: OperationId,
    projection: &ShardingProjection,
    updates: &UpdateTensorShardings,
    rule: &OpShardingRule,
    mesh_name: &str,
    mesh: &Mesh,
) -> Result<usize, PassError> {
    let mut reshards_inserted = 0;
    for operand_index in updates.updated_operands() {
        let op = function.operation(operation);
        let (Some(operand), Some(tensor), Some(mapping)) =
            (op.operand(operand_index), projection.operand(operand_index), rule.operand_mapping(operand_index))
        else {
            continue;
        };
        let target_sharding = tensor.create_tensor_sharding(mapping, mesh_name, mesh);
        let reshard = insert_reshard_before(function, operation, operand, target_sharding)?;
        function.set_operand(operation, operand_index, reshard)?;
        reshards_inserted += 1;
    }
    // Result reshards follow the operation in result order.
    let mut anchor = operation;
    for result_index in updates.updated_results() {
        let op = function.operation(operation);
        let (Some(result), Some(tensor), Some(mapping)) =
            (op.result(result_index), projection.result(result_index), rule.result_mapping(result_index))
        else {
            continue;
        };
        let new_sharding = tensor.create_tensor_sharding(mapping, mesh_name, mesh);
        let original_sharding = function
            .sharding(result)
            .cloned()
            .unwrap_or_else(|| TensorSharding::fully_open(mesh_name, function.value_type(result).rank()));
        let result_type = function.value_type(result).clone();
        let reshard_operation =
            function.insert_operation_after(anchor, OperationKind::Reshard, vec![result], vec![result_type])?;
        anchor = reshard_operation;
        let reshard = function.operation(reshard_operation).results()[0];
        tracing::debug!(%result, sharding = %original_sharding, "inserted reshard after operation");
        function.set_sharding(reshard, Some(original_sharding))?;
        function.replace_uses_except(result, reshard, reshard_operation)?;
        function.set_sharding(result, Some(new_sharding))?;
        reshards_inserted += 1;
    }
    Ok(reshards_inserted)
}

/// Inserts a reshard of `value` to `sharding` right before `anchor` and returns the resharded value.
fn insert_reshard_before(
    function: &mut Function,
    anchor: OperationId,
    value: ValueId,
    sharding: TensorSharding,
) -> Result<ValueId, PassError> {
    let value_type = function.value_type(value).clone();
    let reshard_operation =
        function.insert_operation_before(anchor, OperationKind::Reshard, vec![value], vec![value_type])?;
    let reshard = function.operation(reshard_operation).results()[0];
    tracing::debug!(%value, %sharding, "inserted reshard before operation");
    function.set_sharding(reshard, Some(sharding))?;
    Ok(reshard)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use reshard_core::{AxisRef, DimensionSharding, TensorMapping};
    use reshard_ir::TensorType;

    use super::*;

    fn symbol_table() -> SymbolTable {
        let mut symbol_table = SymbolTable::new();
        symbol_table.insert_mesh("mesh", Mesh::from_axes([("x", 4), ("y", 2)]).unwrap()).unwrap();
        symbol_table
    }

    fn sharding(dim_shardings: Vec<DimensionSharding>) -> Option<TensorSharding> {
        Some(TensorSharding::new("mesh", dim_shardings))
    }

    fn sharded_by(axes: &[AxisRef]) -> DimensionSharding {
        DimensionSharding::closed(axes.to_vec())
    }

    /// Builds `return dot(lhs, rhs)` for `lhs: tensor<8x32xf32>` and `rhs: tensor<32x16xf32>`, where the function
    /// result is declared with the same sharding as the product.
    fn matmul_function(
        lhs_sharding: Option<TensorSharding>,
        rhs_sharding: Option<TensorSharding>,
        result_sharding: Option<TensorSharding>,
    ) -> Function {
        let mut function = Function::new("main");
        let lhs = function.add_argument(TensorType::f32(&[8, 32]), lhs_sharding);
        let rhs = function.add_argument(TensorType::f32(&[32, 16]), rhs_sharding);
        function.add_result(TensorType::f32(&[8, 16]), result_sharding.clone());
        let dot =
            function.append_operation(OperationKind::Dot, vec![lhs, rhs], vec![TensorType::f32(&[8, 16])]).unwrap();
        let product = function.operation(dot).results()[0];
        function.set_sharding(product, result_sharding).unwrap();
        function.append_operation(OperationKind::Return, vec![product], Vec::new()).unwrap();
        function
    }

    #[test]
    fn test_operand_reshard_for_conflicting_factor() {
        let x = AxisRef::new("x");
        let y = AxisRef::new("y");
        let mut function = matmul_function(
            sharding(vec![sharded_by(&[x.clone()]), sharded_by(&[y.clone()])]),
            sharding(vec![sharded_by(&[y]), sharded_by(&[x.clone()])]),
            sharding(vec![sharded_by(&[x]), DimensionSharding::replicated()]),
        );
        let statistics = insert_explicit_reshards(&mut function, &symbol_table()).unwrap();
        assert_eq!(
            function.to_string(),
            indoc! {r#"
                func.func @main(%arg0: tensor<8x32xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"x"}, {"y"}]>}, %arg1: tensor<32x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"y"}, {"x"}]>}) -> (tensor<8x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"x"}, {}]>}) {
                  %0 = sdy.reshard %arg1 <@mesh, [{"y"}, {}]> : tensor<32x16xf32>
                  %1 = stablehlo.dot %arg0, %0 {sdy.sharding = #sdy.sharding_per_value<[<@mesh, [{"x"}, {}]>]>} : (tensor<8x32xf32>, tensor<32x16xf32>) -> tensor<8x16xf32>
                  return %1 : tensor<8x16xf32>
                }
            "#},
        );
        assert_eq!(
            statistics,
            InsertExplicitReshardsStatistics {
                operations_visited: 2,
                exits_handled: 1,
                operations_rewritten: 1,
                reshards_inserted: 1,
                ..InsertExplicitReshardsStatistics::default()
            },
        );
    }

    #[test]
    fn test_operand_and_result_reshards_for_sub_axes() {
        let y = AxisRef::new("y");
        let mut function = matmul_function(
            sharding(vec![sharded_by(&[AxisRef::sub_axis("x", 1, 2)]), sharded_by(&[y.clone()])]),
            sharding(vec![sharded_by(&[y]), DimensionSharding::replicated()]),
            sharding(vec![DimensionSharding::replicated(), sharded_by(&[AxisRef::sub_axis("x", 2, 2)])]),
        );
        let statistics = insert_explicit_reshards(&mut function, &symbol_table()).unwrap();
        assert_eq!(
            function.to_string(),
            indoc! {r#"
                func.func @main(%arg0: tensor<8x32xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"x":(1)2}, {"y"}]>}, %arg1: tensor<32x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"y"}, {}]>}) -> (tensor<8x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{}, {"x":(2)2}]>}) {
                  %0 = sdy.reshard %arg1 <@mesh, [{"y"}, {"x":(2)2}]> : tensor<32x16xf32>
                  %1 = stablehlo.dot %arg0, %0 {sdy.sharding = #sdy.sharding_per_value<[<@mesh, [{"x":(1)2}, {"x":(2)2}]>]>} : (tensor<8x32xf32>, tensor<32x16xf32>) -> tensor<8x16xf32>
                  %2 = sdy.reshard %1 <@mesh, [{}, {"x":(2)2}]> : tensor<8x16xf32>
                  return %2 : tensor<8x16xf32>
                }
            "#},
        );
        assert_eq!(statistics.reshards_inserted, 2);
        assert_eq!(function.verify(&symbol_table()), Ok(()));
    }

    #[test]
    fn test_result_reshard_rewires_uses() {
        let x = AxisRef::new("x");
        let y = AxisRef::new("y");
        let mut function = Function::new("main");
        let lhs = function.add_argument(
            TensorType::f32(&[8, 16]),
            sharding(vec![sharded_by(&[x.clone()]), DimensionSharding::replicated()]),
        );
        let rhs = function.add_argument(
            TensorType::f32(&[8, 16]),
            sharding(vec![sharded_by(&[x]), DimensionSharding::replicated()]),
        );
        let result_sharding = sharding(vec![sharded_by(&[y]), DimensionSharding::replicated()]);
        function.add_result(TensorType::f32(&[8, 16]), result_sharding.clone());
        let add =
            function.append_operation(OperationKind::Add, vec![lhs, rhs], vec![TensorType::f32(&[8, 16])]).unwrap();
        let sum = function.operation(add).results()[0];
        function.set_sharding(sum, result_sharding).unwrap();
        let terminator = function.append_operation(OperationKind::Return, vec![sum], Vec::new()).unwrap();

        let statistics = insert_explicit_reshards(&mut function, &symbol_table()).unwrap();
        assert_eq!(
            function.to_string(),
            indoc! {r#"
                func.func @main(%arg0: tensor<8x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"x"}, {}]>}, %arg1: tensor<8x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"x"}, {}]>}) -> (tensor<8x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"y"}, {}]>}) {
                  %0 = stablehlo.add %arg0, %arg1 {sdy.sharding = #sdy.sharding_per_value<[<@mesh, [{"x"}, {}]>]>} : tensor<8x16xf32>
                  %1 = sdy.reshard %0 <@mesh, [{"y"}, {}]> : tensor<8x16xf32>
                  return %1 : tensor<8x16xf32>
                }
            "#},
        );
        assert_eq!(statistics.reshards_inserted, 1);

        // The only use of the original result is the reshard itself.
        let uses = function.uses(sum);
        assert_eq!(uses.len(), 1);
        assert!(function.operation(uses[0].operation).is_reshard());
        assert_ne!(function.operation(terminator).operands(), &[sum]);
    }

    #[test]
    fn test_result_reshards_follow_result_order() {
        let mut function = Function::new("main");
        let argument = function.add_argument(
            TensorType::f32(&[8, 16]),
            sharding(vec![sharded_by(&[AxisRef::new("x")]), DimensionSharding::replicated()]),
        );
        function.add_result(TensorType::f32(&[8, 16]), Some(TensorSharding::fully_replicated("mesh", 2)));
        function.add_result(TensorType::f32(&[8, 16]), Some(TensorSharding::fully_replicated("mesh", 2)));
        let custom = function
            .append_operation(
                OperationKind::Custom { name: "foo".to_string() },
                vec![argument],
                vec![TensorType::f32(&[8, 16]), TensorType::f32(&[8, 16])],
            )
            .unwrap();
        let mapping = TensorMapping::from_factors([0, 1]);
        let rule = OpShardingRule::new(vec![8, 16], vec![mapping.clone()], vec![mapping.clone(), mapping]).unwrap();
        function.set_sharding_rule(custom, Some(rule)).unwrap();
        let results = function.operation(custom).results().to_vec();
        for &result in &results {
            function.set_sharding(result, Some(TensorSharding::fully_replicated("mesh", 2))).unwrap();
        }
        function.append_operation(OperationKind::Return, results.clone(), Vec::new()).unwrap();

        let statistics = insert_explicit_reshards(&mut function, &symbol_table()).unwrap();
        assert_eq!(statistics.reshards_inserted, 2);
        assert_eq!(function.verify(&symbol_table()), Ok(()));

        let operations = function.operations().to_vec();
        assert_eq!(operations.len(), 4);
        assert_eq!(operations[0], custom);
        let resharded = operations[1..3]
            .iter()
            .map(|&operation| {
                assert!(function.operation(operation).is_reshard());
                function.operation(operation).operands()[0]
            })
            .collect::<Vec<_>>();
        assert_eq!(resharded, results);
        let reshard_results = operations[1..3]
            .iter()
            .map(|&operation| function.operation(operation).results()[0])
            .collect::<Vec<_>>();
        assert_eq!(function.operation(operations[3]).operands(), reshard_results.as_slice());
        for &result in &results {
            assert_eq!(
                function.sharding(result),
                sharding(vec![sharded_by(&[AxisRef::new("x")]), DimensionSharding::replicated()]).as_ref(),
            );
        }
    }

    #[test]
    fn test_missing_result_sharding_is_resharded_from_fully_open() {
        let mut function = Function::new("main");
        let argument = function.add_argument(
            TensorType::f32(&[8, 16]),
            sharding(vec![sharded_by(&[AxisRef::new("x")]), DimensionSharding::replicated()]),
        );
        function.add_result(TensorType::f32(&[8, 16]), None);
        let negate =
            function.append_operation(OperationKind::Negate, vec![argument], vec![TensorType::f32(&[8, 16])]).unwrap();
        let negated = function.operation(negate).results()[0];
        function.append_operation(OperationKind::Return, vec![negated], Vec::new()).unwrap();

        let statistics = insert_explicit_reshards(&mut function, &symbol_table()).unwrap();
        assert_eq!(statistics.reshards_inserted, 1);
        assert_eq!(
            function.to_string(),
            indoc! {r#"
                func.func @main(%arg0: tensor<8x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"x"}, {}]>}) -> tensor<8x16xf32> {
                  %0 = stablehlo.negate %arg0 {sdy.sharding = #sdy.sharding_per_value<[<@mesh, [{"x", ?}, {?}]>]>} : tensor<8x16xf32>
                  %1 = sdy.reshard %0 <@mesh, [{?}, {?}]> : tensor<8x16xf32>
                  return %1 : tensor<8x16xf32>
                }
            "#},
        );
    }

    #[test]
    fn test_return_reshards() {
        let mut function = Function::new("main");
        let replicated =
            function.add_argument(TensorType::f32(&[8, 16]), Some(TensorSharding::fully_replicated("mesh", 2)));
        let sharded = function.add_argument(
            TensorType::f32(&[8, 16]),
            sharding(vec![sharded_by(&[AxisRef::new("y")]), DimensionSharding::replicated()]),
        );
        let unsharded = function.add_argument(TensorType::f32(&[8, 16]), None);
        function.add_result(
            TensorType::f32(&[8, 16]),
            sharding(vec![sharded_by(&[AxisRef::new("x")]), DimensionSharding::replicated()]),
        );
        function.add_result(TensorType::f32(&[8, 16]), None);
        function.add_result(TensorType::f32(&[8, 16]), Some(TensorSharding::fully_replicated("mesh", 2)));
        function
            .append_operation(OperationKind::Return, vec![replicated, sharded, unsharded], Vec::new())
            .unwrap();

        let statistics = insert_explicit_reshards(&mut function, &symbol_table()).unwrap();
        assert_eq!(
            function.to_string(),
            indoc! {r#"
                func.func @main(%arg0: tensor<8x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{}, {}]>}, %arg1: tensor<8x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"y"}, {}]>}, %arg2: tensor<8x16xf32>) -> (tensor<8x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"x"}, {}]>}, tensor<8x16xf32>, tensor<8x16xf32> {sdy.sharding = #sdy.sharding<@mesh, [{}, {}]>}) {
                  %0 = sdy.reshard %arg0 <@mesh, [{"x"}, {}]> : tensor<8x16xf32>
                  %1 = sdy.reshard %arg1 <@mesh, [{}, {}]> : tensor<8x16xf32>
                  return %0, %1, %arg2 : tensor<8x16xf32>, tensor<8x16xf32>, tensor<8x16xf32>
                }
            "#},
        );
        assert_eq!(
            statistics,
            InsertExplicitReshardsStatistics {
                operations_visited: 1,
                exits_handled: 1,
                reshards_inserted: 2,
                ..InsertExplicitReshardsStatistics::default()
            },
        );
    }

    #[test]
    fn test_skipped_operations_are_left_untouched() {
        let mut symbol_table = symbol_table();
        symbol_table.insert_mesh("other_mesh", Mesh::from_axes([("z", 2)]).unwrap()).unwrap();
        let x = AxisRef::new("x");

        let mut function = Function::new("main");
        let sharded = function.add_argument(
            TensorType::f32(&[8, 16]),
            sharding(vec![sharded_by(&[x.clone()]), DimensionSharding::replicated()]),
        );
        let unsharded = function.add_argument(TensorType::f32(&[8, 16]), None);
        let other = function.add_argument(
            TensorType::f32(&[8, 16]),
            Some(TensorSharding::new(
                "other_mesh",
                vec![DimensionSharding::sharded_by(["z"]), DimensionSharding::replicated()],
            )),
        );
        let small = function.add_argument(TensorType::f32(&[2]), sharding(vec![sharded_by(&[x.clone()])]));
        function.add_result(TensorType::f32(&[8, 16]), None);
        let types = || vec![TensorType::f32(&[8, 16])];

        // No sharding rule.
        function.append_operation(OperationKind::Custom { name: "foo".to_string() }, vec![sharded], types()).unwrap();
        // No sharding at all.
        function.append_operation(OperationKind::Negate, vec![unsharded], types()).unwrap();
        // Shardings on different meshes.
        function.append_operation(OperationKind::Add, vec![sharded, other], types()).unwrap();
        // "x" does not fit into a dimension of size 2.
        function.append_operation(OperationKind::Abs, vec![small], vec![TensorType::f32(&[2])]).unwrap();
        // Already compatible.
        let negate = function.append_operation(OperationKind::Negate, vec![sharded], types()).unwrap();
        let negated = function.operation(negate).results()[0];
        function
            .set_sharding(negated, sharding(vec![sharded_by(&[x]), DimensionSharding::replicated()]))
            .unwrap();
        function.append_operation(OperationKind::Return, vec![unsharded], Vec::new()).unwrap();

        let before = function.to_string();
        let statistics = insert_explicit_reshards(&mut function, &symbol_table).unwrap();
        assert_eq!(function.to_string(), before);
        assert_eq!(
            statistics,
            InsertExplicitReshardsStatistics {
                operations_visited: 6,
                exits_handled: 1,
                skipped_without_sharding_rule: 1,
                skipped_without_common_mesh: 2,
                skipped_with_overflow_axes: 1,
                skipped_as_compatible: 1,
                ..InsertExplicitReshardsStatistics::default()
            },
        );
    }

    #[test]
    fn test_unknown_mesh() {
        let mut function = Function::new("main");
        let argument = function.add_argument(
            TensorType::f32(&[8]),
            Some(TensorSharding::new("missing", vec![DimensionSharding::sharded_by(["x"])])),
        );
        function.add_result(TensorType::f32(&[8]), None);
        let negate =
            function.append_operation(OperationKind::Negate, vec![argument], vec![TensorType::f32(&[8])]).unwrap();
        let negated = function.operation(negate).results()[0];
        function.append_operation(OperationKind::Return, vec![negated], Vec::new()).unwrap();
        assert_eq!(
            insert_explicit_reshards(&mut function, &symbol_table()),
            Err(PassError::UnknownMesh {
                mesh_name: "missing".to_string(),
                function_name: "main".to_string(),
                operation: "stablehlo.negate".to_string(),
            }),
        );
    }

    #[test]
    fn test_insert_explicit_reshards_is_idempotent() {
        let x = AxisRef::new("x");
        let y = AxisRef::new("y");
        let mut function = matmul_function(
            sharding(vec![sharded_by(&[x.clone()]), sharded_by(&[y.clone()])]),
            sharding(vec![sharded_by(&[y]), sharded_by(&[x.clone()])]),
            sharding(vec![sharded_by(&[x]), DimensionSharding::replicated()]),
        );
        insert_explicit_reshards(&mut function, &symbol_table()).unwrap();
        let once = function.to_string();
        let statistics = insert_explicit_reshards(&mut function, &symbol_table()).unwrap();
        assert_eq!(function.to_string(), once);
        assert_eq!(statistics.reshards_inserted, 0);
        assert_eq!(statistics.skipped_as_compatible, 1);
        assert_eq!(statistics.skipped_without_sharding_rule, 1);

        // A dimension sharded along all of "x" is written as "x", never as its two halves.
        let x = AxisRef::new("x");
        let y = AxisRef::new("y");
        let mut function = matmul_function(
            sharding(vec![sharded_by(&[y.clone()]), sharded_by(&[x.clone()])]),
            sharding(vec![sharded_by(&[x.clone(), y.clone()]), DimensionSharding::replicated()]),
            sharding(vec![sharded_by(&[x, y]), DimensionSharding::replicated()]),
        );
        assert_eq!(function.verify(&symbol_table()), Ok(()));
        insert_explicit_reshards(&mut function, &symbol_table()).unwrap();
        assert_eq!(function.verify(&symbol_table()), Ok(()));
        let once = function.to_string();
        let statistics = insert_explicit_reshards(&mut function, &symbol_table()).unwrap();
        assert_eq!(function.to_string(), once);
        assert_eq!(statistics.reshards_inserted, 0);
    }

    #[test]
    fn test_compatibility_checks() {
        let x = AxisRef::new("x");
        let function = matmul_function(
            sharding(vec![sharded_by(&[x.clone()]), DimensionSharding::replicated()]),
            None,
            sharding(vec![sharded_by(&[x]), DimensionSharding::open()]),
        );
        let dot = function.operations()[0];
        let rule = get_or_create_sharding_rule(&function, dot).unwrap();
        let mesh = Mesh::from_axes([("x", 4), ("y", 2)]).unwrap();
        let projection = ShardingProjection::build(&function, dot, &rule, &mesh).unwrap();
        assert!(!has_overflow_axes(&projection));
        assert!(has_compatible_factor_shardings(&projection));

        let y = AxisRef::new("y");
        let function = matmul_function(
            sharding(vec![sharded_by(&[y.clone()]), DimensionSharding::replicated()]),
            None,
            sharding(vec![sharded_by(&[y, AxisRef::new("x")]), DimensionSharding::open()]),
        );
        let dot = function.operations()[0];
        let projection = ShardingProjection::build(&function, dot, &rule, &mesh).unwrap();
        assert!(!has_overflow_axes(&projection));
        assert!(!has_compatible_factor_shardings(&projection));
    }

    #[test]
    fn test_pass() {
        let x = AxisRef::new("x");
        let y = AxisRef::new("y");
        let mut function = matmul_function(
            sharding(vec![sharded_by(&[x.clone()]), sharded_by(&[y.clone()])]),
            sharding(vec![sharded_by(&[y]), sharded_by(&[x.clone()])]),
            sharding(vec![sharded_by(&[x]), DimensionSharding::replicated()]),
        );
        let mut pass = InsertExplicitReshardsPass::new();
        assert_eq!(pass.name(), "InsertExplicitReshardsPass");
        assert_eq!(pass.argument(), Some(Cow::Borrowed("sdy-insert-explicit-reshards")));
        assert!(pass.description().is_some());
        assert_eq!(pass.run_on_function(&mut function, &symbol_table()), Ok(()));
        assert_eq!(pass.run_on_function(&mut function, &symbol_table()), Ok(()));
        assert_eq!(pass.insert_explicit_reshards_statistics().operations_visited, 5);
        assert_eq!(pass.insert_explicit_reshards_statistics().reshards_inserted, 1);
        let statistics = pass.statistics();
        assert_eq!(statistics.len(), 8);
        assert_eq!(statistics[0], ("operations-visited", 5));
        assert_eq!(statistics[7], ("reshards-inserted", 1));
    }
}
