//! Operation sharding rules.
//!
//! An [`OpShardingRule`] describes how the dimensions of the operands and results of an operation correspond to each
//! other, by mapping every tensor dimension to a list of shared symbolic _factors_. For example, the rule of a matrix
//! product with operands of shape `[8, 32]` and `[32, 16]` is:
//!
//! ```text
//! #sdy.op_sharding_rule<([i, k], [k, j])->([i, j]) {i=8, j=16, k=32}, reduction={k}>
//! ```
//!
//! A dimension can be mapped to more than one factor (e.g., the result dimension of a reshape that merges two
//! dimensions), in which case the factors are listed major to minor. A dimension mapped to no factors is rendered as
//! `[]` for that dimension position.

use std::fmt::Display;

use crate::errors::ShardingError;

/// Factors that a single tensor dimension is mapped to, major to minor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DimMapping {
    factor_indices: Vec<usize>,
}

impl DimMapping {
    /// Creates a dimension mapping.
    pub fn new(factor_indices: Vec<usize>) -> Self {
        Self { factor_indices }
    }

    /// Creates a dimension mapping with a single factor.
    pub fn single(factor_index: usize) -> Self {
        Self::new(vec![factor_index])
    }

    /// Returns the factors of this dimension, major to minor.
    pub fn factor_indices(&self) -> &[usize] {
        self.factor_indices.as_slice()
    }

    /// Returns `true` if this dimension is not mapped to any factor.
    pub fn is_empty(&self) -> bool {
        self.factor_indices.is_empty()
    }
}

/// Dimension mappings of a single operand or result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TensorMapping {
    dim_mappings: Vec<DimMapping>,
}

impl TensorMapping {
    /// Creates a tensor mapping.
    pub fn new(dim_mappings: Vec<DimMapping>) -> Self {
        Self { dim_mappings }
    }

    /// Creates a tensor mapping in which every dimension is mapped to exactly one factor.
    pub fn from_factors<I: IntoIterator<Item = usize>>(factor_indices: I) -> Self {
        Self::new(factor_indices.into_iter().map(DimMapping::single).collect())
    }

    /// Returns the per-dimension mappings.
    pub fn dim_mappings(&self) -> &[DimMapping] {
        self.dim_mappings.as_slice()
    }

    /// Rank of the tensor that this mapping applies to.
    pub fn rank(&self) -> usize {
        self.dim_mappings.len()
    }

    /// Returns `true` if some dimension of this tensor is mapped to `factor_index`.
    pub fn contains_factor(&self, factor_index: usize) -> bool {
        self.dim_mappings.iter().any(|dim| dim.factor_indices.contains(&factor_index))
    }
}

/// Sharding rule of an operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpShardingRule {
    factor_sizes: Vec<usize>,
    operand_mappings: Vec<TensorMapping>,
    result_mappings: Vec<TensorMapping>,
    reduction_factors: Vec<usize>,
    is_custom_rule: bool,
}

impl OpShardingRule {
    /// Creates a sharding rule, checking that every referenced factor is declared.
    pub fn new(
        factor_sizes: Vec<usize>,
        operand_mappings: Vec<TensorMapping>,
        result_mappings: Vec<TensorMapping>,
    ) -> Result<Self, ShardingError> {
        let factor_count = factor_sizes.len();
        let referenced_factors = operand_mappings
            .iter()
            .chain(result_mappings.iter())
            .flat_map(|mapping| mapping.dim_mappings.iter())
            .flat_map(|dim| dim.factor_indices.iter().copied());
        for factor_index in referenced_factors {
            if factor_index >= factor_count {
                return Err(ShardingError::UnknownFactor { factor_index, factor_count });
            }
        }
        Ok(Self { factor_sizes, operand_mappings, result_mappings, reduction_factors: Vec::new(), is_custom_rule: false })
    }

    /// Marks `reduction_factors` as reduction factors of this rule.
    pub fn with_reduction_factors(mut self, reduction_factors: Vec<usize>) -> Result<Self, ShardingError> {
        let factor_count = self.factor_sizes.len();
        if let Some(&factor_index) = reduction_factors.iter().find(|&&factor_index| factor_index >= factor_count) {
            return Err(ShardingError::UnknownFactor { factor_index, factor_count });
        }
        self.reduction_factors = reduction_factors;
        Ok(self)
    }

    /// Marks this rule as user-provided.
    pub fn with_custom_rule(mut self, is_custom_rule: bool) -> Self {
        self.is_custom_rule = is_custom_rule;
        self
    }

    /// Returns the size of every factor.
    pub fn factor_sizes(&self) -> &[usize] {
        self.factor_sizes.as_slice()
    }

    /// Returns the size of factor `factor_index`.
    pub fn factor_size(&self, factor_index: usize) -> Option<usize> {
        self.factor_sizes.get(factor_index).copied()
    }

    pub fn num_factors(&self) -> usize {
        self.factor_sizes.len()
    }

    pub fn num_operands(&self) -> usize {
        self.operand_mappings.len()
    }

    pub fn num_results(&self) -> usize {
        self.result_mappings.len()
    }

    pub fn operand_mappings(&self) -> &[TensorMapping] {
        self.operand_mappings.as_slice()
    }

    pub fn result_mappings(&self) -> &[TensorMapping] {
        self.result_mappings.as_slice()
    }

    pub fn operand_mapping(&self, operand_index: usize) -> Option<&TensorMapping> {
        self.operand_mappings.get(operand_index)
    }

    pub fn result_mapping(&self, result_index: usize) -> Option<&TensorMapping> {
        self.result_mappings.get(result_index)
    }

    pub fn reduction_factors(&self) -> &[usize] {
        self.reduction_factors.as_slice()
    }

    /// Checks that this rule has one mapping per operand and per result and that every mapping has the rank of the
    /// tensor it describes.
    pub fn validate(&self, operand_ranks: &[usize], result_ranks: &[usize]) -> Result<(), ShardingError> {
        validate_mappings("operand", &self.operand_mappings, operand_ranks)?;
        validate_mappings("result", &self.result_mappings, result_ranks)
    }

    /// Renders this rule as a Shardy `#sdy.op_sharding_rule` attribute.
    pub fn to_shardy_attribute(&self) -> String {
        self.to_string()
    }
}

impl Display for OpShardingRule {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_mappings(
            formatter: &mut std::fmt::Formatter<'_>,
            mappings: &[TensorMapping],
        ) -> std::fmt::Result {
            formatter.write_str("(")?;
            for (mapping_index, mapping) in mappings.iter().enumerate() {
                if mapping_index > 0 {
                    formatter.write_str(", ")?;
                }
                formatter.write_str("[")?;
                for (dimension, dim) in mapping.dim_mappings.iter().enumerate() {
                    if dimension > 0 {
                        formatter.write_str(", ")?;
                    }
                    for &factor_index in &dim.factor_indices {
                        formatter.write_str(factor_symbol(factor_index).as_str())?;
                    }
                }
                formatter.write_str("]")?;
            }
            formatter.write_str(")")
        }

        formatter.write_str("#sdy.op_sharding_rule<")?;
        write_mappings(formatter, &self.operand_mappings)?;
        formatter.write_str("->")?;
        write_mappings(formatter, &self.result_mappings)?;
        formatter.write_str(" {")?;
        for (factor_index, factor_size) in self.factor_sizes.iter().enumerate() {
            if factor_index > 0 {
                formatter.write_str(", ")?;
            }
            write!(formatter, "{}={factor_size}", factor_symbol(factor_index))?;
        }
        formatter.write_str("}")?;
        if !self.reduction_factors.is_empty() {
            formatter.write_str(", reduction={")?;
            for (position, &factor_index) in self.reduction_factors.iter().enumerate() {
                if position > 0 {
                    formatter.write_str(", ")?;
                }
                formatter.write_str(factor_symbol(factor_index).as_str())?;
            }
            formatter.write_str("}")?;
        }
        if self.is_custom_rule {
            formatter.write_str(", custom")?;
        }
        formatter.write_str(">")
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn validate_mappings(kind: &'static str, mappings: &[TensorMapping], ranks: &[usize]) -> Result<(), ShardingError> {
    if mappings.len() != ranks.len() {
        return Err(ShardingError::MappingCountMismatch { kind, expected: ranks.len(), actual: mappings.len() });
    }
    for (mapping, &tensor_rank) in mappings.iter().zip(ranks) {
        if mapping.rank() != tensor_rank {
            return Err(ShardingError::RankMismatch { sharding_rank: mapping.rank(), tensor_rank });
        }
    }
    Ok(())
}

/// Symbol used for factor `factor_index` when rendering rules: `i` through `z` first, then `z_1`, `z_2`, and so on.
fn factor_symbol(factor_index: usize) -> String {
    const SYMBOLS: &[u8] = b"ijklmnopqrstuvwxyz";
    match SYMBOLS.get(factor_index) {
        Some(&symbol) => char::from(symbol).to_string(),
        None => format!("z_{}", factor_index + 1 - SYMBOLS.len()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
