//! C code generation
//!
//! Emits one C translation unit per Titan module, targeting the memory
//! layout, garbage-collector barriers and calling conventions of the Lua
//! 5.3 runtime. For every exported function two symbols come out:
//!
//! - `<module>_<name>_titan` — the native entry: parameters lowered to
//!   their C representations, the host state first, a reserved prefix of
//!   GC-visible stack slots for every live collectable temporary.
//! - `<module>_<name>_lua` — the host adapter: reads arguments from the
//!   host stack at fixed offsets, type-checks them, calls the native
//!   entry and pushes the results back.
//!
//! Module initialization builds the globals table (one slot per top-level
//! value, after a reserved literal prefix), wraps every function in a C
//!   closure carrying that table as its single upvalue, and returns a
//! proxy table whose `__index`/`__newindex` dispatch by member name so
//! module variables are read- and write-through.
//!
//! # Module structure
//!
//! - `error.rs`: the `CodeGenError` type
//! - `runtime.rs`: C preamble and the on-demand helper library
//! - `functions.rs`: native entries and host adapters
//! - `statements.rs`: statement emission
//! - `exprs.rs`: expression emission and coercion lowering

mod error;
mod exprs;
mod functions;
mod runtime;
mod statements;

pub use error::CodeGenError;

use crate::ast::{DeclId, Program, TopLevel};
use crate::types::{FunctionType, ModuleType, Session, Type};
use crate::upvalues::GlobalLayout;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

/// Generate the complete C translation unit for a checked module.
pub fn generate(
    program: &Program,
    layout: &GlobalLayout,
    session: &Session,
    module_type: &ModuleType,
) -> Result<String, CodeGenError> {
    let mut codegen = CodeGen::new(program, layout, session);
    let mut body = String::new();

    codegen.emit_import_decls(&mut body)?;
    codegen.emit_forward_decls(&mut body)?;
    for item in &program.items {
        if let TopLevel::Func(func) = item {
            codegen.emit_function(&mut body, func)?;
        }
    }
    codegen.emit_index_fn(&mut body, module_type)?;
    codegen.emit_newindex_fn(&mut body, module_type)?;
    codegen.emit_types_fn(&mut body, module_type)?;
    codegen.emit_luaopen(&mut body, module_type)?;

    let mut unit = String::new();
    writeln!(unit, "/* {}: generated by the Titan compiler. */", program.module_name)?;
    runtime::emit_preamble(&mut unit, &codegen.helpers)?;
    unit.push_str(&body);
    Ok(crate::pretty::reindent(&unit))
}

pub struct CodeGen<'a> {
    program: &'a Program,
    layout: &'a GlobalLayout,
    session: &'a Session,
    /// Mangled module prefix (`foo.bar` -> `foo_bar`).
    mangled: String,
    /// Runtime helpers this unit actually uses, in emission order.
    helpers: BTreeSet<&'static str>,

    // Per-function state.
    temp_counter: usize,
    nslots: usize,
    local_names: HashMap<DeclId, String>,
    /// Reserved stack slot of each GC-typed local, for re-mirroring on
    /// assignment.
    local_slots: HashMap<DeclId, usize>,
    func_rets: Vec<Type>,
    /// C temporaries holding the extra results of the last emitted
    /// multi-valued call, indexed by result position.
    pending_extras: Vec<String>,
}

impl<'a> CodeGen<'a> {
    fn new(program: &'a Program, layout: &'a GlobalLayout, session: &'a Session) -> Self {
        CodeGen {
            program,
            layout,
            session,
            mangled: mangle_name(&program.module_name),
            helpers: BTreeSet::new(),
            temp_counter: 0,
            nslots: 0,
            local_names: HashMap::new(),
            local_slots: HashMap::new(),
            func_rets: Vec::new(),
            pending_extras: Vec::new(),
        }
    }

    pub(super) fn need(&mut self, helper: &'static str) {
        self.helpers.insert(helper);
        for dep in runtime::helper_deps(helper) {
            self.helpers.insert(dep);
        }
    }

    pub(super) fn fresh_temp(&mut self) -> String {
        let n = self.temp_counter;
        self.temp_counter += 1;
        format!("_t{}", n)
    }

    /// Reserve one GC-visible stack slot in the current function.
    pub(super) fn alloc_slot(&mut self) -> usize {
        let slot = self.nslots;
        self.nslots += 1;
        slot
    }

    pub(super) fn local_name(&self, decl: DeclId) -> Result<String, CodeGenError> {
        self.local_names
            .get(&decl)
            .cloned()
            .ok_or_else(|| CodeGenError::MissingSlot(format!("no C name for declaration {}", decl)))
    }

    pub(super) fn slot_of(&self, decl: DeclId) -> Result<usize, CodeGenError> {
        self.layout
            .slot_of_decl
            .get(&decl)
            .copied()
            .ok_or_else(|| CodeGenError::MissingSlot(format!("no globals slot for declaration {}", decl)))
    }

    pub(super) fn literal_slot(&self, bytes: &[u8]) -> Result<usize, CodeGenError> {
        self.layout
            .literal_slot(bytes)
            .ok_or_else(|| CodeGenError::MissingSlot("string literal missing from pool".to_string()))
    }

    /// The native-ABI C symbol of a top-level function.
    pub(super) fn titan_entry(&self, name: &str) -> String {
        format!("{}_{}_titan", self.mangled, mangle_name(name))
    }

    fn lua_entry(&self, name: &str) -> String {
        format!("{}_{}_lua", self.mangled, mangle_name(name))
    }

    fn find_func_by_decl(&self, decl: DeclId) -> Result<&'a crate::ast::TopLevelFunc, CodeGenError> {
        self.program
            .items
            .iter()
            .find_map(|item| match item {
                TopLevel::Func(f) if f.id == decl => Some(f),
                _ => None,
            })
            .ok_or_else(|| CodeGenError::UncheckedNode(format!("declaration {} is not a function", decl)))
    }

    // ------------------------------------------------------------------
    // Imports
    // ------------------------------------------------------------------

    /// File-scope state per import: the imported module's globals table, a
    /// function pointer per function member, a slot pointer per variable
    /// member, and the loader that fills them in.
    fn emit_import_decls(&mut self, out: &mut String) -> Result<(), CodeGenError> {
        for item in &self.program.items {
            let TopLevel::Import(import) = item else { continue };
            let Type::Module(module) = &import.ty else { continue };
            let imp = mangle_name(&module.name);
            self.need("open_module");
            self.need("sym");

            writeln!(out, "/* import \"{}\" */", module.name)?;
            writeln!(out, "static Table *{}_imp_{} = NULL;", self.mangled, imp)?;
            for (member_name, member) in &module.members {
                match &member.ty {
                    Type::Function(ft) => {
                        writeln!(
                            out,
                            "static {} (*{}_fn_{}_{})({}) = NULL;",
                            c_ret_type(ft),
                            self.mangled,
                            imp,
                            mangle_name(member_name),
                            c_param_types(ft).join(", ")
                        )?;
                    }
                    Type::TypeOf(_) => {
                        // Record member: its constructor is callable.
                        let ctor = self.imported_ctor_type(&module.name, member_name)?;
                        writeln!(
                            out,
                            "static {} (*{}_fn_{}_{}_new)({}) = NULL;",
                            c_ret_type(&ctor),
                            self.mangled,
                            imp,
                            mangle_name(member_name),
                            c_param_types(&ctor).join(", ")
                        )?;
                    }
                    _ => {
                        writeln!(
                            out,
                            "static TValue *{}_var_{}_{} = NULL;",
                            self.mangled,
                            imp,
                            mangle_name(member_name)
                        )?;
                    }
                }
            }

            writeln!(out, "static void {}_load_{} (lua_State *L) {{", self.mangled, imp)?;
            writeln!(out, "void *_h;")?;
            writeln!(out, "int (*_open)(lua_State *);")?;
            writeln!(out, "Table **_g;")?;
            writeln!(out, "if ({}_imp_{} != NULL) return;", self.mangled, imp)?;
            writeln!(out, "_h = titan_open_module(L, \"{}\");", module.name)?;
            writeln!(
                out,
                "_open = (int (*)(lua_State *))titan_sym(L, _h, \"luaopen_{}\");",
                imp
            )?;
            writeln!(out, "luaL_requiref(L, \"{}\", _open, 0);", module.name)?;
            writeln!(out, "lua_pop(L, 1);")?;
            writeln!(
                out,
                "_g = (Table **)titan_sym(L, _h, \"{}_titan_globals\");",
                imp
            )?;
            writeln!(out, "{}_imp_{} = *_g;", self.mangled, imp)?;
            for (member_name, member) in &module.members {
                match &member.ty {
                    Type::Function(ft) => {
                        writeln!(
                            out,
                            "{}_fn_{}_{} = ({} (*)({}))titan_sym(L, _h, \"{}_{}_titan\");",
                            self.mangled,
                            imp,
                            mangle_name(member_name),
                            c_ret_type(ft),
                            c_param_types(ft).join(", "),
                            imp,
                            mangle_name(member_name)
                        )?;
                    }
                    Type::TypeOf(_) => {
                        let ctor = self.imported_ctor_type(&module.name, member_name)?;
                        writeln!(
                            out,
                            "{}_fn_{}_{}_new = ({} (*)({}))titan_sym(L, _h, \"{}_{}_new_titan\");",
                            self.mangled,
                            imp,
                            mangle_name(member_name),
                            c_ret_type(&ctor),
                            c_param_types(&ctor).join(", "),
                            imp,
                            mangle_name(member_name)
                        )?;
                    }
                    _ => {
                        writeln!(
                            out,
                            "{}_var_{}_{} = &{}_imp_{}->array[{}];",
                            self.mangled,
                            imp,
                            mangle_name(member_name),
                            self.mangled,
                            imp,
                            member.slot
                        )?;
                    }
                }
            }
            writeln!(out, "}}")?;
            writeln!(out)?;
        }
        Ok(())
    }

    /// Reconstruct an imported record's constructor signature from the
    /// registry shape.
    fn imported_ctor_type(
        &self,
        module: &str,
        record: &str,
    ) -> Result<FunctionType, CodeGenError> {
        let fqtn = format!("{}.{}", module, record);
        let rec = self
            .session
            .record(&fqtn)
            .ok_or_else(|| CodeGenError::UncheckedNode(format!("record '{}' not in registry", fqtn)))?;
        Ok(FunctionType::new(
            rec.fields.iter().map(|(_, ty)| ty.clone()).collect(),
            vec![Type::Nominal(fqtn)],
        ))
    }

    /// Mutually recursive functions need the native entries declared ahead
    /// of every body.
    fn emit_forward_decls(&mut self, out: &mut String) -> Result<(), CodeGenError> {
        for item in &self.program.items {
            let TopLevel::Func(func) = item else { continue };
            let Type::Function(ft) = &func.ty else { continue };
            let storage = if func.islocal { "static " } else { "" };
            writeln!(
                out,
                "{}{} {} ({});",
                storage,
                c_ret_type(ft),
                self.titan_entry(&func.name),
                self.c_titan_params(ft).join(", ")
            )?;
            writeln!(
                out,
                "static int {} (lua_State *L);",
                self.lua_entry(&func.name)
            )?;
        }
        writeln!(out)?;
        Ok(())
    }

    /// Full parameter list of a native entry: state, module globals, the
    /// lowered parameters, then one out-pointer per extra return value.
    pub(super) fn c_titan_params(&self, ft: &FunctionType) -> Vec<String> {
        let mut params = vec!["lua_State *L".to_string(), "Table *_G".to_string()];
        for (i, ty) in ft.params.iter().enumerate() {
            params.push(format!("{} _param{}", c_type(ty), i));
        }
        for (i, ty) in ft.rets.iter().enumerate().skip(1) {
            params.push(format!("{} *_out{}", c_type(ty), i));
        }
        params
    }

    // ------------------------------------------------------------------
    // Module initialization
    // ------------------------------------------------------------------

    fn emit_luaopen(
        &mut self,
        out: &mut String,
        module_type: &ModuleType,
    ) -> Result<(), CodeGenError> {
        let mangled = self.mangled.clone();
        writeln!(out, "Table *{}_titan_globals = NULL;", mangled)?;
        writeln!(out)?;
        writeln!(out, "int luaopen_{} (lua_State *L) {{", mangled)?;
        writeln!(out, "Table *_G;")?;
        writeln!(
            out,
            "lua_createtable(L, {}, 0);",
            self.layout.slot_count
        )?;
        writeln!(out, "_G = hvalue(L->top - 1);")?;
        writeln!(out, "luaH_resizearray(L, _G, {});", self.layout.slot_count)?;
        writeln!(out, "{}_titan_globals = _G;", mangled)?;

        // Reserved prefix: slot 0 the module name, slot 1 the type string.
        writeln!(out, "/* reserved literals */")?;
        self.emit_init_string(out, 0, self.program.module_name.as_bytes().to_vec())?;
        self.emit_init_string(
            out,
            1,
            module_type.serialize_with(self.session).into_bytes(),
        )?;

        // Interned literal pool.
        if !self.layout.literals.is_empty() {
            writeln!(out, "/* string literal pool */")?;
            for literal in self.layout.literals.clone() {
                let slot = self.literal_slot(&literal)?;
                self.emit_init_string(out, slot, literal)?;
            }
        }

        // Imported modules load before anything that may call into them.
        for item in &self.program.items {
            let TopLevel::Import(import) = item else { continue };
            let Type::Module(module) = &import.ty else { continue };
            writeln!(out, "{}_load_{}(L);", mangled, mangle_name(&module.name))?;
        }

        // Function slots: C closures over the host adapter, the globals
        // table as the single upvalue.
        writeln!(out, "/* function slots */")?;
        for item in &self.program.items {
            let TopLevel::Func(func) = item else { continue };
            let slot = func
                .global_index
                .ok_or_else(|| CodeGenError::MissingSlot("function without a slot".to_string()))?;
            writeln!(out, "lua_pushvalue(L, -1);")?;
            writeln!(
                out,
                "lua_pushcclosure(L, {}, 1);",
                self.lua_entry(&func.name)
            )?;
            writeln!(out, "setobj2t(L, &_G->array[{}], L->top - 1);", slot)?;
            writeln!(out, "luaC_barrierback(L, _G, L->top - 1);")?;
            writeln!(out, "lua_pop(L, 1);")?;
        }

        // Variable slots: evaluated constant initializers.
        writeln!(out, "/* variable slots */")?;
        for item in &self.program.items {
            let TopLevel::Var(var) = item else { continue };
            let slot = var
                .global_index
                .ok_or_else(|| CodeGenError::MissingSlot("variable without a slot".to_string()))?;
            let dst = format!("&_G->array[{}]", slot);
            self.emit_init_value(out, &var.value, &dst, "_G")?;
        }

        // The module table is a proxy: reads and writes dispatch through
        // the globals table by member name.
        writeln!(out, "/* module proxy */")?;
        writeln!(out, "lua_createtable(L, 0, 0);")?;
        writeln!(out, "lua_createtable(L, 0, 2);")?;
        writeln!(out, "lua_pushvalue(L, -3);")?;
        writeln!(out, "lua_pushcclosure(L, {}_index_lua, 1);", mangled)?;
        writeln!(out, "lua_setfield(L, -2, \"__index\");")?;
        writeln!(out, "lua_pushvalue(L, -3);")?;
        writeln!(out, "lua_pushcclosure(L, {}_newindex_lua, 1);", mangled)?;
        writeln!(out, "lua_setfield(L, -2, \"__newindex\");")?;
        writeln!(out, "lua_setmetatable(L, -2);")?;
        writeln!(out, "lua_remove(L, -2);")?;
        writeln!(out, "return 1;")?;
        writeln!(out, "}}")?;
        writeln!(out)?;
        Ok(())
    }

    fn emit_init_string(
        &mut self,
        out: &mut String,
        slot: usize,
        bytes: Vec<u8>,
    ) -> Result<(), CodeGenError> {
        let temp = self.fresh_temp();
        writeln!(out, "{{")?;
        writeln!(
            out,
            "TString *{} = luaS_newlstr(L, {}, {});",
            temp,
            c_string_literal(&bytes),
            bytes.len()
        )?;
        writeln!(out, "setsvalue(L, &_G->array[{}], {});", slot, temp)?;
        writeln!(out, "luaC_barrierback(L, _G, &_G->array[{}]);", slot)?;
        writeln!(out, "}}")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Proxy dispatch and the types function
    // ------------------------------------------------------------------

    fn emit_index_fn(
        &mut self,
        out: &mut String,
        module_type: &ModuleType,
    ) -> Result<(), CodeGenError> {
        writeln!(out, "static int {}_index_lua (lua_State *L) {{", self.mangled)?;
        writeln!(out, "Table *_G = hvalue(&clCvalue(L->ci->func)->upvalue[0]);")?;
        writeln!(out, "const char *_k = lua_tostring(L, 2);")?;
        writeln!(out, "if (_k == NULL)")?;
        writeln!(
            out,
            "return luaL_error(L, \"invalid member access on module '{}'\");",
            self.program.module_name
        )?;
        for (name, member) in &module_type.members {
            writeln!(out, "if (strcmp(_k, \"{}\") == 0) {{", name)?;
            writeln!(out, "setobj2s(L, L->top, &_G->array[{}]);", member.slot)?;
            writeln!(out, "api_incr_top(L);")?;
            writeln!(out, "return 1;")?;
            writeln!(out, "}}")?;
        }
        writeln!(
            out,
            "return luaL_error(L, \"module '{}' has no member '%s'\", _k);",
            self.program.module_name
        )?;
        writeln!(out, "}}")?;
        writeln!(out)?;
        Ok(())
    }

    fn emit_newindex_fn(
        &mut self,
        out: &mut String,
        module_type: &ModuleType,
    ) -> Result<(), CodeGenError> {
        writeln!(
            out,
            "static int {}_newindex_lua (lua_State *L) {{",
            self.mangled
        )?;
        writeln!(out, "Table *_G = hvalue(&clCvalue(L->ci->func)->upvalue[0]);")?;
        writeln!(out, "TValue *_v = L->ci->func + 3;")?;
        writeln!(out, "const char *_k = lua_tostring(L, 2);")?;
        writeln!(out, "if (_k == NULL)")?;
        writeln!(
            out,
            "return luaL_error(L, \"invalid member access on module '{}'\");",
            self.program.module_name
        )?;
        for (name, member) in &module_type.members {
            match &member.ty {
                Type::Function(_) | Type::TypeOf(_) => {
                    writeln!(out, "if (strcmp(_k, \"{}\") == 0)", name)?;
                    writeln!(
                        out,
                        "return luaL_error(L, \"cannot assign to '{}' in module '{}'\");",
                        name, self.program.module_name
                    )?;
                }
                ty => {
                    // Write-through with the declared type check.
                    writeln!(out, "if (strcmp(_k, \"{}\") == 0) {{", name)?;
                    self.emit_member_write_check(out, name, ty)?;
                    writeln!(out, "setobj2t(L, &_G->array[{}], _v);", member.slot)?;
                    writeln!(out, "luaC_barrierback(L, _G, _v);")?;
                    writeln!(out, "return 0;")?;
                    writeln!(out, "}}")?;
                }
            }
        }
        writeln!(
            out,
            "return luaL_error(L, \"module '{}' has no member '%s'\", _k);",
            self.program.module_name
        )?;
        writeln!(out, "}}")?;
        writeln!(out)?;
        Ok(())
    }

    fn emit_member_write_check(
        &mut self,
        out: &mut String,
        name: &str,
        ty: &Type,
    ) -> Result<(), CodeGenError> {
        let check = match ty {
            Type::Integer => Some("ttisinteger(_v)".to_string()),
            Type::Float => {
                // Accept an integer and convert in place.
                writeln!(out, "if (ttisinteger(_v)) {{ setfltvalue(_v, cast_num(ivalue(_v))); }}")?;
                Some("ttisfloat(_v)".to_string())
            }
            Type::Boolean => Some("ttisboolean(_v)".to_string()),
            Type::Nil => Some("ttisnil(_v)".to_string()),
            Type::String => Some("ttisstring(_v)".to_string()),
            Type::Array(_) | Type::Map(_, _) | Type::Nominal(_) => {
                Some("ttistable(_v)".to_string())
            }
            Type::Option(base) => tag_check("_v", base).map(|c| format!("(ttisnil(_v) || {})", c)),
            Type::Value => None,
            other => {
                return Err(CodeGenError::UncheckedNode(format!(
                    "module variable '{}' of unexpected type {}",
                    name, other
                )))
            }
        };
        if let Some(check) = check {
            writeln!(out, "if (!({}))", check)?;
            writeln!(
                out,
                "return luaL_error(L, \"wrong type for module variable '{}', expected {} but found %s\", lua_typename(L, ttnov(_v)));",
                name, ty
            )?;
        }
        Ok(())
    }

    /// The serialized module type, readable by the loader without parsing
    /// this module's source again.
    fn emit_types_fn(
        &mut self,
        out: &mut String,
        module_type: &ModuleType,
    ) -> Result<(), CodeGenError> {
        let serialized = module_type.serialize_with(self.session);
        writeln!(out, "int {}_types (lua_State *L) {{", self.mangled)?;
        writeln!(
            out,
            "lua_pushstring(L, {});",
            c_string_literal(serialized.as_bytes())
        )?;
        writeln!(out, "return 1;")?;
        writeln!(out, "}}")?;
        writeln!(out)?;
        Ok(())
    }
}

/// Mangle a Titan name into a valid C identifier.
///
/// Dots (module separators, record constructors) become underscores;
/// anything else outside `[A-Za-z0-9_]` is hex-escaped.
pub fn mangle_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '.' => result.push('_'),
            '_' => result.push('_'),
            c if c.is_ascii_alphanumeric() => result.push(c),
            c => {
                let _ = write!(result, "_x{:02X}_", c as u32);
            }
        }
    }
    result
}

/// The C representation of a Titan type in the native calling convention.
pub(super) fn c_type(ty: &Type) -> &'static str {
    match ty {
        Type::Integer => "lua_Integer",
        Type::Float => "lua_Number",
        Type::Boolean | Type::Nil => "int",
        Type::String => "TString *",
        Type::Array(_) | Type::Map(_, _) => "Table *",
        _ => "TValue",
    }
}

/// Types represented as a whole `TValue` (boxed) in the native ABI.
pub(super) fn is_tvalue(ty: &Type) -> bool {
    matches!(
        ty,
        Type::Value | Type::Nominal(_) | Type::Option(_) | Type::Function(_)
    )
}

pub(super) fn c_ret_type(ft: &FunctionType) -> &'static str {
    match ft.rets.first() {
        Some(ty) => c_type(ty),
        None => "void",
    }
}

fn c_param_types(ft: &FunctionType) -> Vec<String> {
    let mut types = vec!["lua_State *".to_string(), "Table *".to_string()];
    for ty in &ft.params {
        types.push(c_type(ty).to_string());
    }
    for ty in ft.rets.iter().skip(1) {
        types.push(format!("{} *", c_type(ty)));
    }
    types
}

/// The tag predicate for a C `TValue *` expression, or `None` for types
/// accepting any tag.
pub(super) fn tag_check(value: &str, ty: &Type) -> Option<String> {
    match ty {
        Type::Integer => Some(format!("ttisinteger({})", value)),
        Type::Float => Some(format!("ttisnumber({})", value)),
        Type::Boolean => Some(format!("ttisboolean({})", value)),
        Type::Nil => Some(format!("ttisnil({})", value)),
        Type::String => Some(format!("ttisstring({})", value)),
        Type::Array(_) | Type::Map(_, _) | Type::Nominal(_) => {
            Some(format!("ttistable({})", value))
        }
        Type::Function(_) => Some(format!("ttisfunction({})", value)),
        Type::Option(base) => {
            tag_check(value, base).map(|c| format!("(ttisnil({}) || {})", value, c))
        }
        _ => None,
    }
}

/// Render bytes as a C string literal, escaping everything non-printable.
pub(super) fn c_string_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            // Three-digit octal escapes cannot swallow a following digit.
            _ => {
                let _ = write!(out, "\\{:03o}", b);
            }
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mangle_name() {
        assert_eq!(mangle_name("foo.bar"), "foo_bar");
        assert_eq!(mangle_name("Point.new"), "Point_new");
        assert_eq!(mangle_name("snake_case"), "snake_case");
    }

    #[test]
    fn test_c_string_literal_escapes() {
        assert_eq!(c_string_literal(b"ab"), "\"ab\"");
        assert_eq!(c_string_literal(b"a\"b"), "\"a\\\"b\"");
        assert_eq!(c_string_literal(b"a\nb"), "\"a\\nb\"");
        assert_eq!(c_string_literal(&[0xff, b'1']), "\"\\3771\"");
    }

    #[test]
    fn test_c_type_lowering() {
        assert_eq!(c_type(&Type::Integer), "lua_Integer");
        assert_eq!(c_type(&Type::Float), "lua_Number");
        assert_eq!(c_type(&Type::Boolean), "int");
        assert_eq!(c_type(&Type::String), "TString *");
        assert_eq!(c_type(&Type::Array(Box::new(Type::Integer))), "Table *");
        assert_eq!(c_type(&Type::Value), "TValue");
        assert_eq!(c_type(&Type::Nominal("m.R".into())), "TValue");
        assert_eq!(c_type(&Type::Option(Box::new(Type::Integer))), "TValue");
    }

    #[test]
    fn test_tag_check_for_options_accepts_nil() {
        let check = tag_check("_v", &Type::Option(Box::new(Type::Integer))).unwrap();
        assert!(check.contains("ttisnil(_v)"));
        assert!(check.contains("ttisinteger(_v)"));
    }
}
