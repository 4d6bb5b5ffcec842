//! Lexically scoped symbol table
//!
//! A stack of frames mapping names to their declarations. `find` searches
//! innermost-out; `find_dup` only the innermost frame, for duplicate
//! detection. Foreign type names registered by foreign imports live in a
//! separate flat namespace. The table also carries the module name used to
//! build FQTNs for records declared in this module.

use crate::ast::DeclId;
use crate::types::Type;
use std::collections::HashMap;

/// What a name stands for at its declaration site.
#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Local { decl: DeclId, ty: Type },
    GlobalVar { decl: DeclId, ty: Type },
    GlobalFunc { decl: DeclId, ty: Type },
    Module { decl: DeclId, ty: Type },
    Foreign { decl: DeclId, ty: Type },
    /// A record name in value position (holder of the `new` constructor).
    Type { decl: DeclId, ty: Type },
}

impl Symbol {
    pub fn ty(&self) -> &Type {
        match self {
            Symbol::Local { ty, .. }
            | Symbol::GlobalVar { ty, .. }
            | Symbol::GlobalFunc { ty, .. }
            | Symbol::Module { ty, .. }
            | Symbol::Foreign { ty, .. }
            | Symbol::Type { ty, .. } => ty,
        }
    }

    pub fn decl(&self) -> DeclId {
        match self {
            Symbol::Local { decl, .. }
            | Symbol::GlobalVar { decl, .. }
            | Symbol::GlobalFunc { decl, .. }
            | Symbol::Module { decl, .. }
            | Symbol::Foreign { decl, .. }
            | Symbol::Type { decl, .. } => *decl,
        }
    }
}

pub struct SymbolTable {
    frames: Vec<HashMap<String, Symbol>>,
    foreign_types: HashMap<String, Type>,
    module_name: String,
}

impl SymbolTable {
    pub fn new(module_name: impl Into<String>) -> Self {
        SymbolTable {
            frames: vec![HashMap::new()],
            foreign_types: HashMap::new(),
            module_name: module_name.into(),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Build the fully qualified type name for a record declared here.
    pub fn fqtn(&self, record_name: &str) -> String {
        format!("{}.{}", self.module_name, record_name)
    }

    pub fn open_scope(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn close_scope(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot close the top-level scope");
        self.frames.pop();
    }

    /// Bind `name` in the innermost frame, shadowing any outer binding.
    pub fn add(&mut self, name: impl Into<String>, symbol: Symbol) {
        self.frames
            .last_mut()
            .expect("symbol table always has a frame")
            .insert(name.into(), symbol);
    }

    /// Look up a name, innermost scope first.
    pub fn find(&self, name: &str) -> Option<&Symbol> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Look up a name in the innermost frame only.
    pub fn find_dup(&self, name: &str) -> Option<&Symbol> {
        self.frames
            .last()
            .expect("symbol table always has a frame")
            .get(name)
    }

    pub fn add_foreign_type(&mut self, name: impl Into<String>, ty: Type) {
        self.foreign_types.insert(name.into(), ty);
    }

    pub fn find_foreign_type(&self, name: &str) -> Option<&Type> {
        self.foreign_types.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_and_scope_exit() {
        let mut table = SymbolTable::new("m");
        table.add("x", Symbol::GlobalVar { decl: 0, ty: Type::Integer });
        table.open_scope();
        table.add("x", Symbol::Local { decl: 1, ty: Type::Float });

        assert_eq!(table.find("x").unwrap().decl(), 1);
        table.close_scope();
        assert_eq!(table.find("x").unwrap().decl(), 0);
    }

    #[test]
    fn test_find_dup_only_sees_innermost() {
        let mut table = SymbolTable::new("m");
        table.add("x", Symbol::GlobalVar { decl: 0, ty: Type::Integer });
        table.open_scope();
        assert!(table.find_dup("x").is_none());
        assert!(table.find("x").is_some());
        table.add("x", Symbol::Local { decl: 1, ty: Type::Integer });
        assert!(table.find_dup("x").is_some());
    }

    #[test]
    fn test_foreign_types_are_a_separate_namespace() {
        let mut table = SymbolTable::new("m");
        table.add_foreign_type("FILE", Type::ForeignModule("stdio.h".into()));
        assert!(table.find("FILE").is_none());
        assert!(table.find_foreign_type("FILE").is_some());
    }

    #[test]
    fn test_fqtn_uses_module_name() {
        let table = SymbolTable::new("foo.bar");
        assert_eq!(table.fqtn("Point"), "foo.bar.Point");
    }
}
