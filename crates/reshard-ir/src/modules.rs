use indexmap::IndexMap;
use reshard_core::Mesh;

use crate::errors::IrError;
use crate::functions::Function;

/// Table of the meshes that are declared in a [`Module`], keyed by their symbol names (without the leading `@`).
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    meshes: IndexMap<String, Mesh>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `mesh` under `name`. Returns an error if a mesh with the same name has already been declared.
    pub fn insert_mesh<N: Into<String>>(&mut self, name: N, mesh: Mesh) -> Result<(), IrError> {
        let name = name.into();
        let name = name.strip_prefix('@').map(str::to_string).unwrap_or(name);
        if self.meshes.contains_key(&name) {
            return Err(IrError::DuplicateMesh { mesh_name: name });
        }
        self.meshes.insert(name, mesh);
        Ok(())
    }

    /// Returns the mesh declared under `name`, if any.
    pub fn lookup_mesh<S: AsRef<str>>(&self, name: S) -> Option<&Mesh> {
        let name = name.as_ref();
        self.meshes.get(name.strip_prefix('@').unwrap_or(name))
    }

    /// Returns an iterator over all declared meshes and their names, in declaration order.
    pub fn meshes(&self) -> impl Iterator<Item = (&str, &Mesh)> {
        self.meshes.iter().map(|(name, mesh)| (name.as_str(), mesh))
    }
}

/// Collection of [`Function`]s together with the [`SymbolTable`] of the meshes that their shardings refer to.
#[derive(Clone, Debug, Default)]
pub struct Module {
    symbol_table: SymbolTable,
    functions: Vec<Function>,
}

impl Module {
    pub fn new(symbol_table: SymbolTable) -> Self {
        Self { symbol_table, functions: Vec::new() }
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    pub fn symbol_table_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbol_table
    }

    /// Adds `function` to this module. Function names must be unique within a module.
    pub fn add_function(&mut self, function: Function) -> Result<(), IrError> {
        if self.function(function.name()).is_some() {
            return Err(IrError::DuplicateFunction { function_name: function.name().to_string() });
        }
        self.functions.push(function);
        Ok(())
    }

    pub fn functions(&self) -> &[Function] {
        self.functions.as_slice()
    }

    pub fn function<S: AsRef<str>>(&self, name: S) -> Option<&Function> {
        self.functions.iter().find(|function| function.name() == name.as_ref())
    }

    pub fn function_mut<S: AsRef<str>>(&mut self, name: S) -> Option<&mut Function> {
        self.functions.iter_mut().find(|function| function.name() == name.as_ref())
    }

    /// Returns the symbol table of this module together with mutable access to its functions, which is what
    /// function-level passes operate on.
    pub fn symbol_table_and_functions_mut(&mut self) -> (&SymbolTable, &mut [Function]) {
        (&self.symbol_table, self.functions.as_mut_slice())
    }

    /// Verifies all functions of this module.
    pub fn verify(&self) -> Result<(), IrError> {
        self.functions.iter().try_for_each(|function| function.verify(&self.symbol_table))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_symbol_table() {
        let mut symbol_table = SymbolTable::new();
        let mesh = Mesh::from_axes([("x", 4), ("y", 2)]).unwrap();
        symbol_table.insert_mesh("mesh", mesh.clone()).unwrap();
        assert_eq!(symbol_table.lookup_mesh("mesh"), Some(&mesh));
        assert_eq!(symbol_table.lookup_mesh("@mesh"), Some(&mesh));
        assert_eq!(symbol_table.lookup_mesh("other"), None);
        assert_eq!(
            symbol_table.insert_mesh("@mesh", mesh.clone()),
            Err(IrError::DuplicateMesh { mesh_name: "mesh".to_string() }),
        );
        assert_eq!(symbol_table.meshes().map(|(name, _)| name).collect::<Vec<_>>(), vec!["mesh"]);
    }

    #[test]
    fn test_module_functions() {
        let mut module = Module::default();
        module.add_function(Function::new("main")).unwrap();
        module.add_function(Function::new("helper")).unwrap();
        assert_eq!(
            module.add_function(Function::new("main")),
            Err(IrError::DuplicateFunction { function_name: "main".to_string() }),
        );
        assert_eq!(module.functions().iter().map(Function::name).collect::<Vec<_>>(), vec!["main", "helper"]);
        assert!(module.function("helper").is_some());
        assert!(module.function_mut("missing").is_none());
        let (_, functions) = module.symbol_table_and_functions_mut();
        assert_eq!(functions.len(), 2);
    }
}
