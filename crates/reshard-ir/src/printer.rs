//! MLIR-like textual rendering of [`Function`]s and [`Module`]s.
//!
//! The output follows the syntax of the StableHLO and Shardy dialects closely enough to be read (and diffed) like the
//! output of the corresponding MLIR passes, e.g.:
//!
//! ```mlir
//! module {
//!   sdy.mesh @mesh = <["x"=4, "y"=2]>
//!   func.func @main(%arg0: tensor<8x32xf32> {sdy.sharding = #sdy.sharding<@mesh, [{"x"}, {}]>}) -> tensor<8x32xf32> {
//!     %0 = sdy.reshard %arg0 <@mesh, [{}, {}]> : tensor<8x32xf32>
//!     return %0 : tensor<8x32xf32>
//!   }
//! }
//! ```
//!
//! Parsing this format is not supported.

use std::collections::HashMap;
use std::fmt::{Display, Write};

use reshard_core::TensorSharding;

use crate::functions::Function;
use crate::modules::Module;
use crate::operations::{OperationId, OperationKind};
use crate::values::ValueId;

impl Display for Function {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        FunctionPrinter::new(self).print(formatter, "")
    }
}

impl Display for Module {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(formatter, "module {{")?;
        for (name, mesh) in self.symbol_table().meshes() {
            let declaration = mesh.to_shardy_mesh_operation(name).map_err(|_| std::fmt::Error)?;
            writeln!(formatter, "  {declaration}")?;
        }
        for function in self.functions() {
            FunctionPrinter::new(function).print(formatter, "  ")?;
        }
        writeln!(formatter, "}}")
    }
}

struct FunctionPrinter<'f> {
    function: &'f Function,
    value_names: HashMap<ValueId, String>,
}

impl<'f> FunctionPrinter<'f> {
    fn new(function: &'f Function) -> Self {
        let mut value_names = HashMap::new();
        for (index, &argument) in function.arguments().iter().enumerate() {
            value_names.insert(argument, format!("%arg{index}"));
        }
        let mut next_result_index = 0;
        for &operation in function.operations() {
            let results = function.operation(operation).results();
            match results {
                [] => {}
                [result] => {
                    value_names.insert(*result, format!("%{next_result_index}"));
                }
                results => {
                    for (index, &result) in results.iter().enumerate() {
                        value_names.insert(result, format!("%{next_result_index}#{index}"));
                    }
                }
            }
            if !results.is_empty() {
                next_result_index += 1;
            }
        }
        Self { function, value_names }
    }

    fn name(&self, value: ValueId) -> &str {
        self.value_names.get(&value).map_or("%<<UNKNOWN VALUE>>", String::as_str)
    }

    fn print(&self, formatter: &mut std::fmt::Formatter<'_>, indent: &str) -> std::fmt::Result {
        let function = self.function;
        write!(formatter, "{indent}func.func @{}(", function.name())?;
        for (index, &argument) in function.arguments().iter().enumerate() {
            if index > 0 {
                formatter.write_str(", ")?;
            }
            write!(formatter, "{}: {}", self.name(argument), function.value_type(argument))?;
            write_sharding_attribute(formatter, function.sharding(argument))?;
        }
        formatter.write_str(") -> ")?;
        match function.results() {
            [result] if result.sharding.is_none() => write!(formatter, "{}", result.r#type)?,
            results => {
                formatter.write_str("(")?;
                for (index, result) in results.iter().enumerate() {
                    if index > 0 {
                        formatter.write_str(", ")?;
                    }
                    write!(formatter, "{}", result.r#type)?;
                    write_sharding_attribute(formatter, result.sharding.as_ref())?;
                }
                formatter.write_str(")")?;
            }
        }
        writeln!(formatter, " {{")?;
        for &operation in function.operations() {
            write!(formatter, "{indent}  ")?;
            self.print_operation(formatter, operation)?;
            writeln!(formatter)?;
        }
        writeln!(formatter, "{indent}}}")
    }

    fn print_operation(&self, formatter: &mut std::fmt::Formatter<'_>, operation_id: OperationId) -> std::fmt::Result {
        let function = self.function;
        let operation = function.operation(operation_id);
        match operation.results() {
            [] => {}
            [result] => write!(formatter, "{} = ", self.name(*result))?,
            results => {
                let name = self.name(results[0]);
                let name = name.split('#').next().unwrap_or(name);
                write!(formatter, "{name}:{} = ", results.len())?;
            }
        }
        formatter.write_str(operation.kind().name())?;

        let operands = operation.operands().iter().map(|&operand| self.name(operand)).collect::<Vec<_>>().join(", ");
        let operand_types = operation
            .operands()
            .iter()
            .map(|&operand| function.value_type(operand).to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let result_types = operation
            .results()
            .iter()
            .map(|&result| function.value_type(result).to_string())
            .collect::<Vec<_>>()
            .join(", ");

        match operation.kind() {
            OperationKind::Return => {
                if !operands.is_empty() {
                    write!(formatter, " {operands} : {operand_types}")?;
                }
                return Ok(());
            }
            OperationKind::Reshard => {
                write!(formatter, " {operands}")?;
                if let Some(sharding) = operation.result(0).and_then(|result| function.sharding(result)) {
                    write!(formatter, " {}", sharding.to_shardy_short_literal())?;
                }
                return write!(formatter, " : {result_types}");
            }
            OperationKind::Transpose { permutation } => {
                write!(formatter, " {operands}, dims = {}", render_dimensions(permutation))?;
            }
            OperationKind::DotGeneral { dimension_numbers } => {
                write!(formatter, " {operands}")?;
                if !dimension_numbers.lhs_batching_dimensions.is_empty() {
                    write!(
                        formatter,
                        ", batching_dims = {} x {}",
                        render_dimensions(&dimension_numbers.lhs_batching_dimensions),
                        render_dimensions(&dimension_numbers.rhs_batching_dimensions),
                    )?;
                }
                write!(
                    formatter,
                    ", contracting_dims = {} x {}",
                    render_dimensions(&dimension_numbers.lhs_contracting_dimensions),
                    render_dimensions(&dimension_numbers.rhs_contracting_dimensions),
                )?;
            }
            OperationKind::Custom { name } => write!(formatter, " @{name}({operands})")?,
            _ => write!(formatter, " {operands}")?,
        }

        let mut attributes = Vec::new();
        if let Some(sharding_per_value) = self.sharding_per_value(operation_id) {
            attributes.push(format!("sdy.sharding = {sharding_per_value}"));
        }
        if let Some(rule) = operation.sharding_rule() {
            attributes.push(format!("sdy.sharding_rule = {rule}"));
        }
        if !attributes.is_empty() {
            write!(formatter, " {{{}}}", attributes.join(", "))?;
        }

        if operation.kind().is_elementwise() {
            write!(formatter, " : {result_types}")
        } else if operation.num_results() == 1 {
            write!(formatter, " : ({operand_types}) -> {result_types}")
        } else {
            write!(formatter, " : ({operand_types}) -> ({result_types})")
        }
    }

    /// Renders the `#sdy.sharding_per_value` attribute of an operation, if any of its results is sharded. Results
    /// without a sharding are rendered as fully open on the mesh of the first sharded result.
    fn sharding_per_value(&self, operation: OperationId) -> Option<String> {
        let function = self.function;
        let shardings = function.result_shardings(operation);
        let mesh_name = shardings.iter().flatten().next()?.mesh_name().to_string();
        let mut literal = String::from("#sdy.sharding_per_value<[");
        for (index, (&result, sharding)) in function.operation(operation).results().iter().zip(shardings).enumerate() {
            if index > 0 {
                literal.push_str(", ");
            }
            let sharding = match sharding {
                Some(sharding) => sharding.to_shardy_short_literal(),
                None => {
                    TensorSharding::fully_open(mesh_name.as_str(), function.value_type(result).rank())
                        .to_shardy_short_literal()
                }
            };
            literal.push_str(sharding.as_str());
        }
        literal.push_str("]>");
        Some(literal)
    }
}

fn write_sharding_attribute(
    formatter: &mut std::fmt::Formatter<'_>,
    sharding: Option<&TensorSharding>,
) -> std::fmt::Result {
    match sharding {
        Some(sharding) => write!(formatter, " {{sdy.sharding = {sharding}}}"),
        None => Ok(()),
    }
}

fn render_dimensions(dimensions: &[usize]) -> String {
    let mut rendered = String::from("[");
    for (index, dimension) in dimensions.iter().enumerate() {
        if index > 0 {
            rendered.push_str(", ");
        }
        let _ = write!(rendered, "{dimension}");
    }
    rendered.push(']');
    rendered
}
