//! Upvalues and globals layout pass
//!
//! Runs after a clean check. Every top-level value declaration (variable
//! or function, local or not) gets a slot in the module's globals table,
//! assigned monotonically after a fixed prefix reserved for internal
//! literals the emitted module needs at runtime. String literals used
//! inside function bodies are interned into a per-module pool and share
//! slots, so the collector keeps them alive for the module's lifetime.
//!
//! The pass annotates `global_index` on the top-level nodes and returns
//! everything else as a [`GlobalLayout`] side table keyed by declaration
//! id, leaving the AST otherwise untouched.

use crate::ast::{
    Block, CallKind, DeclId, Exp, ExpKind, DotRef, NameRef, Program, Stat, TopLevel, Var,
};
use crate::types::{ModuleMember, ModuleType, Type};
use std::collections::{BTreeSet, HashMap};

/// Globals-table slots reserved ahead of user values:
/// slot 0 holds the module name string, slot 1 the type-string the loader
/// reads back.
pub const RESERVED_SLOTS: usize = 2;

#[derive(Debug, Default)]
pub struct GlobalLayout {
    /// Declaration id -> globals-table slot, for every top-level value.
    pub slot_of_decl: HashMap<DeclId, usize>,
    /// Interned string literals in first-appearance order.
    pub literals: Vec<Vec<u8>>,
    /// Literal bytes -> its slot (shared between occurrences).
    pub literal_slots: HashMap<Vec<u8>, usize>,
    /// Function declaration id -> slots of the top-level values its body
    /// references.
    pub referenced: HashMap<DeclId, BTreeSet<usize>>,
    /// Total slot count of the globals table.
    pub slot_count: usize,
}

impl GlobalLayout {
    pub fn literal_slot(&self, bytes: &[u8]) -> Option<usize> {
        self.literal_slots.get(bytes).copied()
    }
}

/// Assign slots and intern literals. The program must have been checked.
pub fn assign_globals(program: &mut Program) -> GlobalLayout {
    let mut layout = GlobalLayout::default();
    let mut next_slot = RESERVED_SLOTS;

    for item in &mut program.items {
        match item {
            TopLevel::Var(var) => {
                var.global_index = Some(next_slot);
                layout.slot_of_decl.insert(var.id, next_slot);
                next_slot += 1;
            }
            TopLevel::Func(func) => {
                func.global_index = Some(next_slot);
                layout.slot_of_decl.insert(func.id, next_slot);
                next_slot += 1;
            }
            _ => {}
        }
    }

    // Literal pool: string literals and the record field names functions
    // touch, in first-appearance order so emission is deterministic.
    for item in &program.items {
        if let TopLevel::Func(func) = item {
            collect_block_literals(&func.block, &mut layout, &mut next_slot);
        }
    }

    // Per-function reference sets over the slots assigned above.
    for item in &program.items {
        if let TopLevel::Func(func) = item {
            let mut refs = BTreeSet::new();
            collect_block_refs(&func.block, &layout.slot_of_decl, &mut refs);
            layout.referenced.insert(func.id, refs);
        }
    }

    layout.slot_count = next_slot;
    layout
}

/// Build the module's exported type: every non-local top-level value plus
/// record types (carrying their constructor's slot).
pub fn module_type(program: &Program, layout: &GlobalLayout) -> ModuleType {
    let mut module = ModuleType::new(program.module_name.clone());
    for item in &program.items {
        match item {
            TopLevel::Var(var) if !var.islocal => {
                module.members.insert(
                    var.decl.name.clone(),
                    ModuleMember {
                        ty: var.decl.ty.clone(),
                        slot: var.global_index.unwrap_or(0),
                    },
                );
            }
            TopLevel::Func(func) if !func.islocal && !func.name.contains('.') => {
                module.members.insert(
                    func.name.clone(),
                    ModuleMember {
                        ty: func.ty.clone(),
                        slot: func.global_index.unwrap_or(0),
                    },
                );
            }
            TopLevel::Record(record) => {
                let fqtn = format!("{}.{}", program.module_name, record.name);
                let ctor_slot = program
                    .find_func(&format!("{}.new", record.name))
                    .and_then(|f| f.global_index)
                    .unwrap_or(0);
                module.members.insert(
                    record.name.clone(),
                    ModuleMember {
                        ty: Type::TypeOf(Box::new(Type::Nominal(fqtn))),
                        slot: ctor_slot,
                    },
                );
            }
            _ => {}
        }
    }
    module
}

fn intern(bytes: &[u8], layout: &mut GlobalLayout, next_slot: &mut usize) {
    if layout.literal_slots.contains_key(bytes) {
        return;
    }
    layout.literal_slots.insert(bytes.to_vec(), *next_slot);
    layout.literals.push(bytes.to_vec());
    *next_slot += 1;
}

/// What the AST walker hands to its visitor: expressions and the variable
/// nodes of both read and write sites.
enum Visit<'a> {
    Exp(&'a Exp),
    Var(&'a Var),
}

fn collect_block_literals(block: &Block, layout: &mut GlobalLayout, next_slot: &mut usize) {
    for stat in &block.stats {
        collect_stat(stat, &mut |node| match node {
            Visit::Exp(exp) => match &exp.kind {
                ExpKind::Str(bytes) => intern(bytes, layout, next_slot),
                ExpKind::InitList(fields) => {
                    for field in fields {
                        if let Some(name) = &field.name {
                            intern(name.as_bytes(), layout, next_slot);
                        }
                    }
                }
                _ => {}
            },
            // Record field access goes through an interned key string,
            // on reads and writes alike.
            Visit::Var(Var::Dot { refkind, name, .. }) => {
                if matches!(refkind, Some(DotRef::RecordField { .. })) {
                    intern(name.as_bytes(), layout, next_slot);
                }
            }
            Visit::Var(_) => {}
        });
    }
}

fn collect_block_refs(
    block: &Block,
    slots: &HashMap<DeclId, usize>,
    refs: &mut BTreeSet<usize>,
) {
    for stat in &block.stats {
        collect_stat(stat, &mut |node| {
            let decl = match node {
                Visit::Var(Var::Name { refkind, .. }) => match refkind {
                    Some(NameRef::GlobalVar(decl)) | Some(NameRef::GlobalFunc(decl)) => {
                        Some(*decl)
                    }
                    _ => None,
                },
                Visit::Var(Var::Dot { refkind, .. }) => match refkind {
                    Some(DotRef::Constructor { decl, .. }) => Some(*decl),
                    _ => None,
                },
                _ => None,
            };
            if let Some(decl) = decl {
                if let Some(slot) = slots.get(&decl) {
                    refs.insert(*slot);
                }
            }
        });
    }
}

/// Drive `visit` over every expression and variable under a statement, in
/// source order.
fn collect_stat(stat: &Stat, visit: &mut dyn FnMut(Visit<'_>)) {
    match stat {
        Stat::Block { block, .. } => {
            for s in &block.stats {
                collect_stat(s, visit);
            }
        }
        Stat::While { cond, block, .. } => {
            collect_exp(cond, visit);
            for s in &block.stats {
                collect_stat(s, visit);
            }
        }
        Stat::Repeat { block, cond, .. } => {
            for s in &block.stats {
                collect_stat(s, visit);
            }
            collect_exp(cond, visit);
        }
        Stat::If {
            clauses,
            else_block,
            ..
        } => {
            for clause in clauses {
                collect_exp(&clause.cond, visit);
                for s in &clause.block.stats {
                    collect_stat(s, visit);
                }
            }
            if let Some(block) = else_block {
                for s in &block.stats {
                    collect_stat(s, visit);
                }
            }
        }
        Stat::For {
            start,
            end,
            step,
            block,
            ..
        } => {
            collect_exp(start, visit);
            collect_exp(end, visit);
            if let Some(step) = step {
                collect_exp(step, visit);
            }
            for s in &block.stats {
                collect_stat(s, visit);
            }
        }
        Stat::Decl { exps, .. } => {
            for exp in exps {
                collect_exp(exp, visit);
            }
        }
        Stat::Assign { vars, exps, .. } => {
            for var in vars {
                collect_var(var, visit);
            }
            for exp in exps {
                collect_exp(exp, visit);
            }
        }
        Stat::Call { call, .. } => collect_exp(call, visit),
        Stat::Return { exps, .. } => {
            for exp in exps {
                collect_exp(exp, visit);
            }
        }
        Stat::Break { .. } => {}
    }
}

fn collect_exp(exp: &Exp, visit: &mut dyn FnMut(Visit<'_>)) {
    visit(Visit::Exp(exp));
    match &exp.kind {
        ExpKind::InitList(fields) => {
            for field in fields {
                collect_exp(&field.exp, visit);
            }
        }
        ExpKind::Var(var) => collect_var(var, visit),
        ExpKind::Unop(_, operand) => collect_exp(operand, visit),
        ExpKind::Binop(_, lhs, rhs) => {
            collect_exp(lhs, visit);
            collect_exp(rhs, visit);
        }
        ExpKind::Concat(operands) => {
            for operand in operands {
                collect_exp(operand, visit);
            }
        }
        ExpKind::Call(call) => {
            match &call.kind {
                CallKind::Function { func } => collect_exp(func, visit),
                CallKind::Method { exp, .. } => collect_exp(exp, visit),
            }
            for arg in &call.args {
                collect_exp(arg, visit);
            }
        }
        ExpKind::Cast { exp: inner, .. } => collect_exp(inner, visit),
        ExpKind::Adjust(inner) => collect_exp(inner, visit),
        ExpKind::Nil
        | ExpKind::Bool(_)
        | ExpKind::Integer(_)
        | ExpKind::Float(_)
        | ExpKind::Str(_)
        | ExpKind::Extra { .. } => {}
    }
}

fn collect_var(var: &Var, visit: &mut dyn FnMut(Visit<'_>)) {
    visit(Visit::Var(var));
    match var {
        Var::Name { .. } => {}
        Var::Dot { exp, .. } => collect_exp(exp, visit),
        Var::Bracket { array, index, .. } => {
            collect_exp(array, visit);
            collect_exp(index, visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryLoader;
    use crate::types::Session;

    fn checked(source: &str) -> Program {
        let tokens = crate::lexer::lex(source).unwrap();
        let mut program = crate::parser::parse_program("test.titan", "test", tokens).unwrap();
        let mut session = Session::new();
        let mut loader = InMemoryLoader::new();
        let diagnostics = crate::checker::check_program(&mut program, &mut session, &mut loader);
        assert!(diagnostics.is_empty(), "diagnostics: {:?}", diagnostics);
        program
    }

    #[test]
    fn test_slots_start_after_reserved_prefix() {
        let mut program = checked("a = 1\nb = 2\nfunction f(): integer return a end");
        let layout = assign_globals(&mut program);
        let slots: Vec<usize> = program
            .items
            .iter()
            .filter_map(|item| match item {
                TopLevel::Var(v) => v.global_index,
                TopLevel::Func(f) => f.global_index,
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![RESERVED_SLOTS, RESERVED_SLOTS + 1, RESERVED_SLOTS + 2]);
        assert_eq!(layout.slot_count, RESERVED_SLOTS + 3);
    }

    #[test]
    fn test_string_literals_share_slots() {
        let mut program = checked(
            "function f(): string return \"hello\" end\n\
             function g(): string return \"hello\" end\n\
             function h(): string return \"world\" end",
        );
        let layout = assign_globals(&mut program);
        assert_eq!(layout.literals.len(), 2);
        let hello = layout.literal_slot(b"hello").unwrap();
        let world = layout.literal_slot(b"world").unwrap();
        assert_ne!(hello, world);
        // Literal slots come after the three function slots.
        assert_eq!(hello, RESERVED_SLOTS + 3);
    }

    #[test]
    fn test_referenced_upvalues_per_function() {
        let mut program = checked(
            "a = 1\n\
             b = 2\n\
             function f(): integer return a end\n\
             function g(): integer return a + b + f() end",
        );
        let layout = assign_globals(&mut program);
        let f = program.find_func("f").unwrap();
        let g = program.find_func("g").unwrap();
        let a_slot = RESERVED_SLOTS;
        let b_slot = RESERVED_SLOTS + 1;
        let f_slot = f.global_index.unwrap();
        assert_eq!(
            layout.referenced[&f.id].iter().copied().collect::<Vec<_>>(),
            vec![a_slot]
        );
        assert_eq!(
            layout.referenced[&g.id].iter().copied().collect::<Vec<_>>(),
            vec![a_slot, b_slot, f_slot]
        );
    }

    #[test]
    fn test_record_field_names_are_interned() {
        let mut program = checked(
            "record P x: float end\n\
             function get(p: P): float return p.x end",
        );
        let layout = assign_globals(&mut program);
        assert!(layout.literal_slot(b"x").is_some());
    }

    #[test]
    fn test_module_type_exports() {
        let mut program = checked(
            "local hidden = 1\n\
             visible = 2\n\
             record P x: float end\n\
             local function internal() end\n\
             function api(): integer return visible end",
        );
        let layout = assign_globals(&mut program);
        let module = module_type(&program, &layout);
        assert!(module.member("visible").is_some());
        assert!(module.member("api").is_some());
        assert!(module.member("hidden").is_none());
        assert!(module.member("internal").is_none());
        let p = module.member("P").unwrap();
        assert_eq!(
            p.ty,
            Type::TypeOf(Box::new(Type::Nominal("test.P".into())))
        );
        // The record member's slot is its constructor's.
        let ctor = program.find_func("P.new").unwrap();
        assert_eq!(p.slot, ctor.global_index.unwrap());
    }
}
