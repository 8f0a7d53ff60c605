//! Function bodies.
//!
//! A [`Function`] owns all of its values and operations in two arenas and keeps the order of its body as a separate
//! list of [`OperationId`]s. Values and operations are never removed, which means that handles stay valid while the
//! body is being rewritten (e.g., while new operations are inserted before or after existing ones).

use reshard_core::{OpShardingRule, TensorSharding};

use crate::errors::IrError;
use crate::operations::{Operation, OperationId, OperationKind};
use crate::types::TensorType;
use crate::values::{Use, ValueData, ValueDefinition, ValueId};

/// Declared result of a [`Function`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionResult {
    pub r#type: TensorType,
    pub sharding: Option<TensorSharding>,
}

/// Function consisting of a single block of operations that ends with a [`OperationKind::Return`] operation.
#[derive(Clone, Debug)]
pub struct Function {
    name: String,
    arguments: Vec<ValueId>,
    results: Vec<FunctionResult>,
    values: Vec<ValueData>,
    operations: Vec<Operation>,
    body: Vec<OperationId>,
}

impl Function {
    /// Creates an empty function named `name`.
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            results: Vec::new(),
            values: Vec::new(),
            operations: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Adds a new argument to this function and returns the value that represents it.
    pub fn add_argument(&mut self, r#type: TensorType, sharding: Option<TensorSharding>) -> ValueId {
        let index = self.arguments.len();
        let value = self.create_value(r#type, sharding, ValueDefinition::Argument { index });
        self.arguments.push(value);
        value
    }

    /// Declares a new result of this function and returns its index.
    pub fn add_result(&mut self, r#type: TensorType, sharding: Option<TensorSharding>) -> usize {
        self.results.push(FunctionResult { r#type, sharding });
        self.results.len() - 1
    }

    pub fn arguments(&self) -> &[ValueId] {
        self.arguments.as_slice()
    }

    pub fn results(&self) -> &[FunctionResult] {
        self.results.as_slice()
    }

    /// Returns the declared sharding of result `index` of this function, if any.
    pub fn result_sharding(&self, index: usize) -> Option<&TensorSharding> {
        self.results.get(index).and_then(|result| result.sharding.as_ref())
    }

    /// Appends a new operation at the end of the body of this function.
    pub fn append_operation(
        &mut self,
        kind: OperationKind,
        operands: Vec<ValueId>,
        result_types: Vec<TensorType>,
    ) -> Result<OperationId, IrError> {
        let operation = self.create_operation(kind, operands, result_types)?;
        self.body.push(operation);
        Ok(operation)
    }

    /// Inserts a new operation immediately before `anchor` in the body of this function.
    pub fn insert_operation_before(
        &mut self,
        anchor: OperationId,
        kind: OperationKind,
        operands: Vec<ValueId>,
        result_types: Vec<TensorType>,
    ) -> Result<OperationId, IrError> {
        let position = self.position(anchor)?;
        let operation = self.create_operation(kind, operands, result_types)?;
        self.body.insert(position, operation);
        Ok(operation)
    }

    /// Inserts a new operation immediately after `anchor` in the body of this function.
    pub fn insert_operation_after(
        &mut self,
        anchor: OperationId,
        kind: OperationKind,
        operands: Vec<ValueId>,
        result_types: Vec<TensorType>,
    ) -> Result<OperationId, IrError> {
        let position = self.position(anchor)?;
        let operation = self.create_operation(kind, operands, result_types)?;
        self.body.insert(position + 1, operation);
        Ok(operation)
    }

    /// Returns the operation that `operation` refers to.
    ///
    /// # Panics
    ///
    /// Panics if `operation` was not created by this function.
    pub fn operation(&self, operation: OperationId) -> &Operation {
        &self.operations[operation.0]
    }

    /// Returns the operations of the body of this function, in order.
    pub fn operations(&self) -> &[OperationId] {
        self.body.as_slice()
    }

    /// Returns the trailing [`OperationKind::Return`] operation of this function, if it has one.
    pub fn terminator(&self) -> Option<OperationId> {
        self.body.last().copied().filter(|&operation| self.operation(operation).is_return())
    }

    /// Returns the type of `value`.
    ///
    /// # Panics
    ///
    /// Panics if `value` was not created by this function.
    pub fn value_type(&self, value: ValueId) -> &TensorType {
        &self.values[value.0].r#type
    }

    pub fn value_definition(&self, value: ValueId) -> ValueDefinition {
        self.values[value.0].definition
    }

    /// Returns the sharding of `value`, if it has one.
    pub fn sharding(&self, value: ValueId) -> Option<&TensorSharding> {
        self.values[value.0].sharding.as_ref()
    }

    /// Sets (or clears) the sharding of `value`.
    pub fn set_sharding(&mut self, value: ValueId, sharding: Option<TensorSharding>) -> Result<(), IrError> {
        self.check_value(value)?;
        self.values[value.0].sharding = sharding;
        Ok(())
    }

    /// Returns the shardings of the operands of `operation`.
    pub fn operand_shardings(&self, operation: OperationId) -> Vec<Option<&TensorSharding>> {
        self.operation(operation).operands.iter().map(|&value| self.sharding(value)).collect()
    }

    /// Returns the shardings of the results of `operation`.
    pub fn result_shardings(&self, operation: OperationId) -> Vec<Option<&TensorSharding>> {
        self.operation(operation).results.iter().map(|&value| self.sharding(value)).collect()
    }

    /// Returns all uses of `value` by operations in the body of this function, in body order.
    pub fn uses(&self, value: ValueId) -> Vec<Use> {
        self.body
            .iter()
            .flat_map(|&operation| {
                self.operation(operation)
                    .operands
                    .iter()
                    .enumerate()
                    .filter(move |&(_, &operand)| operand == value)
                    .map(move |(operand_index, _)| Use { operation, operand_index })
            })
            .collect()
    }

    /// Makes operand `operand_index` of `operation` refer to `value`.
    pub fn set_operand(&mut self, operation: OperationId, operand_index: usize, value: ValueId) -> Result<(), IrError> {
        self.check_value(value)?;
        self.check_operation(operation)?;
        let operands = &mut self.operations[operation.0].operands;
        let operand_count = operands.len();
        let operand = operands
            .get_mut(operand_index)
            .ok_or(IrError::OperandIndexOutOfBounds { operation, operand_index, operand_count })?;
        *operand = value;
        Ok(())
    }

    /// Replaces all uses of `value` with `replacement`, except for uses by operation `except`.
    pub fn replace_uses_except(
        &mut self,
        value: ValueId,
        replacement: ValueId,
        except: OperationId,
    ) -> Result<(), IrError> {
        self.check_value(value)?;
        self.check_value(replacement)?;
        for &operation in &self.body {
            if operation == except {
                continue;
            }
            for operand in &mut self.operations[operation.0].operands {
                if *operand == value {
                    *operand = replacement;
                }
            }
        }
        Ok(())
    }

    /// Attaches an explicit sharding rule to `operation`, or removes it.
    pub fn set_sharding_rule(
        &mut self,
        operation: OperationId,
        sharding_rule: Option<OpShardingRule>,
    ) -> Result<(), IrError> {
        self.check_operation(operation)?;
        self.operations[operation.0].sharding_rule = sharding_rule;
        Ok(())
    }

    /// Returns the position of `operation` in the body of this function.
    pub(crate) fn position(&self, operation: OperationId) -> Result<usize, IrError> {
        self.body
            .iter()
            .position(|&candidate| candidate == operation)
            .ok_or_else(|| IrError::UnknownOperation { operation, function_name: self.name.clone() })
    }

    fn create_value(
        &mut self,
        r#type: TensorType,
        sharding: Option<TensorSharding>,
        definition: ValueDefinition,
    ) -> ValueId {
        self.values.push(ValueData { r#type, sharding, definition });
        ValueId(self.values.len() - 1)
    }

    fn create_operation(
        &mut self,
        kind: OperationKind,
        operands: Vec<ValueId>,
        result_types: Vec<TensorType>,
    ) -> Result<OperationId, IrError> {
        for &operand in &operands {
            self.check_value(operand)?;
        }
        let operation = OperationId(self.operations.len());
        let results = result_types
            .into_iter()
            .enumerate()
            .map(|(index, r#type)| self.create_value(r#type, None, ValueDefinition::Result { operation, index }))
            .collect();
        self.operations.push(Operation { kind, operands, results, sharding_rule: None });
        Ok(operation)
    }

    fn check_value(&self, value: ValueId) -> Result<(), IrError> {
        if value.0 < self.values.len() {
            Ok(())
        } else {
            Err(IrError::UnknownValue { value, function_name: self.name.clone() })
        }
    }

    fn check_operation(&self, operation: OperationId) -> Result<(), IrError> {
        if operation.0 < self.operations.len() {
            Ok(())
        } else {
            Err(IrError::UnknownOperation { operation, function_name: self.name.clone() })
        }
    }
}
