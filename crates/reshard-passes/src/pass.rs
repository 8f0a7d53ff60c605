//! Pass infrastructure.
//!
//! [`Pass`]es transform one [`Function`] at a time and are scheduled by a [`PassManager`], which runs each pass over
//! every function of a [`Module`] in order. The pass manager can optionally print the IR around every pass (through
//! [`tracing`], at the `DEBUG` level) and verify the module after every pass.

use std::borrow::Cow;

use reshard_ir::{Function, Module, SymbolTable};

use crate::errors::PassError;

/// Transformation over [`Function`]s. Refer to [`ClosurePass`] for a pass that wraps a Rust closure.
pub trait Pass {
    /// Returns the name of this [`Pass`].
    fn name(&self) -> Cow<'_, str>;

    /// Returns the optional command-line argument used to refer to this [`Pass`].
    fn argument(&self) -> Option<Cow<'_, str>>;

    /// Returns the optional command-line description of this [`Pass`].
    fn description(&self) -> Option<Cow<'_, str>>;

    /// Runs this [`Pass`] on `function`. Meshes referenced by the shardings in `function` are resolved through
    /// `symbol_table`.
    fn run_on_function(&mut self, function: &mut Function, symbol_table: &SymbolTable) -> Result<(), PassError>;

    /// Returns named counters that this [`Pass`] accumulated over all of its runs so far.
    fn statistics(&self) -> Vec<(&'static str, usize)> {
        Vec::new()
    }
}

/// [`Pass`] that wraps a Rust closure, which is invoked on every [`Function`] that the pass is run on.
#[derive(Clone)]
pub struct ClosurePass<F: FnMut(&mut Function, &SymbolTable) -> Result<(), PassError>> {
    /// Name of this [`ClosurePass`].
    pub name: String,

    /// Optional command-line argument of this [`ClosurePass`].
    pub argument: Option<String>,

    /// Optional command-line description of this [`ClosurePass`].
    pub description: Option<String>,

    /// Closure that implements this [`ClosurePass`].
    pub closure: F,
}

impl<F: FnMut(&mut Function, &SymbolTable) -> Result<(), PassError>> Pass for ClosurePass<F> {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.name.as_str())
    }

    fn argument(&self) -> Option<Cow<'_, str>> {
        self.argument.as_ref().map(|string| Cow::Borrowed(string.as_str()))
    }

    fn description(&self) -> Option<Cow<'_, str>> {
        self.description.as_ref().map(|string| Cow::Borrowed(string.as_str()))
    }

    fn run_on_function(&mut self, function: &mut Function, symbol_table: &SymbolTable) -> Result<(), PassError> {
        (self.closure)(function, symbol_table)
    }
}

/// Controls settings for printing IR during [`PassManager::run`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassIrPrintingOptions {
    /// If `true`, the IR will be printed before all [`Pass`]es.
    pub print_before_all_passes: bool,

    /// If `true`, the IR will be printed after all [`Pass`]es.
    pub print_after_all_passes: bool,

    /// If `true`, then IR will only be printed after [`Pass`]es that changed it.
    pub print_only_on_change: bool,
}

impl Default for PassIrPrintingOptions {
    fn default() -> Self {
        Self { print_before_all_passes: true, print_after_all_passes: true, print_only_on_change: true }
    }
}

/// Configuration of a [`PassManager`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PassManagerOptions {
    /// If `true`, the module is verified after every [`Pass`] and verification failures abort the run.
    pub verify_after_each_pass: bool,

    /// If set, the IR is printed around [`Pass`]es according to these options.
    pub ir_printing: Option<PassIrPrintingOptions>,

    /// If `true`, the statistics of every [`Pass`] are logged at the end of [`PassManager::run`].
    pub print_statistics: bool,
}

impl Default for PassManagerOptions {
    fn default() -> Self {
        Self { verify_after_each_pass: true, ir_printing: None, print_statistics: false }
    }
}

/// Schedules a pipeline of [`Pass`]es over the functions of a [`Module`].
#[derive(Default)]
pub struct PassManager {
    options: PassManagerOptions,
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new(options: PassManagerOptions) -> Self {
        Self { options, passes: Vec::new() }
    }

    pub fn options(&self) -> &PassManagerOptions {
        &self.options
    }

    /// Appends `pass` to the pipeline of this [`PassManager`].
    pub fn add_pass<P: Pass + 'static>(&mut self, pass: P) {
        self.passes.push(Box::new(pass));
    }

    /// Returns the passes of this [`PassManager`], in pipeline order.
    pub fn passes(&self) -> impl Iterator<Item = &(dyn Pass + 'static)> {
        self.passes.iter().map(|pass| pass.as_ref())
    }

    /// Runs every pass of this [`PassManager`] over every function of `module`, in order. The first error aborts the
    /// run, leaving `module` in whatever state the failing pass left it.
    #[tracing::instrument(skip_all, fields(passes = self.passes.len(), functions = module.functions().len()))]
    pub fn run(&mut self, module: &mut Module) -> Result<(), PassError> {
        for pass in &mut self.passes {
            let pass_name = pass.name().into_owned();
            let (symbol_table, functions) = module.symbol_table_and_functions_mut();
            for function in functions.iter_mut() {
                let printing = self.options.ir_printing.as_ref();
                let ir_before = printing.map(|_| function.to_string());
                if let (Some(printing), Some(ir_before)) = (printing, &ir_before) {
                    if printing.print_before_all_passes {
                        tracing::debug!(pass = %pass_name, function = function.name(), "IR before pass:\n{ir_before}");
                    }
                }
                pass.run_on_function(function, symbol_table)?;
                if let (Some(printing), Some(ir_before)) = (printing, ir_before) {
                    let ir_after = function.to_string();
                    if printing.print_after_all_passes && (!printing.print_only_on_change || ir_after != ir_before) {
                        tracing::debug!(pass = %pass_name, function = function.name(), "IR after pass:\n{ir_after}");
                    }
                }
            }
            if self.options.verify_after_each_pass {
                module.verify().map_err(|source| PassError::VerificationFailed { pass_name, source })?;
            }
        }
        if self.options.print_statistics {
            for pass in &self.passes {
                for (statistic, value) in pass.statistics() {
                    tracing::info!(pass = %pass.name(), statistic, value, "pass statistic");
                }
            }
        }
        Ok(())
    }
}
