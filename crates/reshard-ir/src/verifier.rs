use std::collections::HashSet;

use reshard_core::TensorSharding;

use crate::errors::IrError;
use crate::functions::Function;
use crate::modules::SymbolTable;
use crate::values::ValueId;

impl Function {
    /// Verifies the structural invariants of this function:
    ///
    ///   - every operand is defined (as an argument or by an earlier operation) before it is used,
    ///   - the body ends with exactly one `return` operation whose operands match the declared results,
    ///   - every sharding refers to a mesh of `symbol_table` and is valid for that mesh and for the rank of the
    ///     tensor it is attached to.
    pub fn verify(&self, symbol_table: &SymbolTable) -> Result<(), IrError> {
        let mut defined_values = self.arguments().iter().copied().collect::<HashSet<ValueId>>();
        let terminator = self
            .terminator()
            .ok_or_else(|| IrError::MissingTerminator { function_name: self.name().to_string() })?;
        for &operation_id in self.operations() {
            let operation = self.operation(operation_id);
            if operation.is_return() && operation_id != terminator {
                return Err(IrError::MisplacedTerminator {
                    operation: operation_id,
                    function_name: self.name().to_string(),
                });
            }
            for &operand in operation.operands() {
                if !defined_values.contains(&operand) {
                    return Err(IrError::UseBeforeDefinition { value: operand, operation: operation_id });
                }
            }
            defined_values.extend(operation.results().iter().copied());
        }

        let returned_values = self.operation(terminator).operands();
        if returned_values.len() != self.results().len() {
            return Err(IrError::ResultCountMismatch {
                function_name: self.name().to_string(),
                expected: self.results().len(),
                actual: returned_values.len(),
            });
        }
        for (result_index, (&value, result)) in returned_values.iter().zip(self.results()).enumerate() {
            let value_type = self.value_type(value);
            if value_type != &result.r#type {
                return Err(IrError::ResultTypeMismatch {
                    function_name: self.name().to_string(),
                    result_index,
                    expected: result.r#type.to_string(),
                    actual: value_type.to_string(),
                });
            }
        }

        let mut values = defined_values.into_iter().collect::<Vec<_>>();
        values.sort();
        for value in values {
            if let Some(sharding) = self.sharding(value) {
                verify_sharding(sharding, self.value_type(value).rank(), symbol_table)?;
            }
        }
        for result in self.results() {
            if let Some(sharding) = &result.sharding {
                verify_sharding(sharding, result.r#type.rank(), symbol_table)?;
            }
        }
        Ok(())
    }
}

fn verify_sharding(sharding: &TensorSharding, rank: usize, symbol_table: &SymbolTable) -> Result<(), IrError> {
    let mesh = symbol_table.lookup_mesh(sharding.mesh_name()).ok_or_else(|| IrError::UnknownMesh {
        mesh_name: sharding.mesh_name().to_string(),
        sharding: sharding.to_string(),
    })?;
    sharding
        .validate(mesh, rank)
        .map_err(|source| IrError::InvalidSharding { sharding: sharding.to_string(), source })
}
