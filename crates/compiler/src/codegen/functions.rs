//! Function emission
//!
//! Every top-level function yields two symbols. The native entry takes
//! the host state, the module globals table and the lowered parameters,
//! reserves `NSLOTS` GC-visible stack slots (nilled on entry) for its
//! collectable locals and temporaries, and shrinks the stack with a
//! collection checkpoint on the way out. The host adapter reads each
//! argument from the host stack at its fixed offset, type-checks it,
//! calls the native entry and pushes the results back.

use super::{c_ret_type, c_type, is_tvalue, CodeGen, CodeGenError};
use crate::ast::TopLevelFunc;
use crate::types::{FunctionType, Type};
use std::fmt::Write as _;

impl<'a> CodeGen<'a> {
    pub(super) fn emit_function(
        &mut self,
        out: &mut String,
        func: &TopLevelFunc,
    ) -> Result<(), CodeGenError> {
        let Type::Function(ft) = &func.ty else {
            return Err(CodeGenError::UncheckedNode(format!(
                "function '{}' with a non-function type",
                func.name
            )));
        };
        self.reset_function_state(ft);

        // Parameters register as locals; collectable ones get mirrored
        // into the reserved frame right at entry.
        let mut body = String::new();
        let mut param_names = Vec::with_capacity(func.params.len());
        for param in &func.params {
            let cname = format!("{}_{}", super::mangle_name(&param.name), param.id);
            self.local_names.insert(param.id, cname.clone());
            if param.ty.is_gc() {
                let slot = self.alloc_slot();
                self.local_slots.insert(param.id, slot);
                match &param.ty {
                    Type::String => writeln!(body, "setsvalue2s(L, _base + {}, {});", slot, cname)?,
                    Type::Array(_) | Type::Map(_, _) => {
                        writeln!(body, "sethvalue2s(L, _base + {}, {});", slot, cname)?
                    }
                    _ => writeln!(body, "setobj2s(L, _base + {}, &{});", slot, cname)?,
                }
            }
            param_names.push(cname);
        }
        for stat in &func.block.stats {
            self.emit_stat(&mut body, stat)?;
        }

        // The native entry.
        let storage = if func.islocal { "static " } else { "" };
        let mut signature = vec!["lua_State *L".to_string(), "Table *_G".to_string()];
        for (param, cname) in func.params.iter().zip(&param_names) {
            signature.push(format!("{} {}", c_type(&param.ty), cname));
        }
        for (i, ty) in ft.rets.iter().enumerate().skip(1) {
            signature.push(format!("{} *_out{}", c_type(ty), i));
        }
        if let Some(refs) = self.layout.referenced.get(&func.id) {
            if !refs.is_empty() {
                let slots: Vec<String> = refs.iter().map(|s| s.to_string()).collect();
                writeln!(out, "/* {}: upvalue slots {} */", func.name, slots.join(" "))?;
            }
        }
        writeln!(
            out,
            "{}{} {} ({}) {{",
            storage,
            c_ret_type(ft),
            self.titan_entry(&func.name),
            signature.join(", ")
        )?;
        writeln!(out, "TValue *_base = L->top;")?;
        if self.nslots > 0 {
            writeln!(out, "int _slot;")?;
            writeln!(out, "lua_checkstack(L, {});", self.nslots)?;
            writeln!(out, "L->top += {};", self.nslots)?;
            writeln!(
                out,
                "for (_slot = 0; _slot < {}; _slot++) setnilvalue(_base + _slot);",
                self.nslots
            )?;
        }
        out.push_str(&body);
        self.emit_fallthrough(out, ft)?;
        writeln!(out, "}}")?;
        writeln!(out)?;

        self.emit_adapter(out, func, ft)?;
        Ok(())
    }

    fn reset_function_state(&mut self, ft: &FunctionType) {
        self.temp_counter = 0;
        self.nslots = 0;
        self.local_names.clear();
        self.local_slots.clear();
        self.pending_extras.clear();
        self.func_rets = ft.rets.clone();
    }

    /// Terminate the function body: the regular epilogue for functions
    /// returning nothing, an unreachable default return otherwise (the
    /// checker proved every path returns, but the C compiler cannot).
    fn emit_fallthrough(
        &mut self,
        out: &mut String,
        ft: &FunctionType,
    ) -> Result<(), CodeGenError> {
        match ft.rets.first() {
            None => {
                writeln!(out, "luaC_checkGC(L);")?;
                writeln!(out, "L->top = _base;")?;
            }
            Some(ty) => {
                writeln!(out, "/* unreachable */")?;
                writeln!(out, "L->top = _base;")?;
                match ty {
                    Type::String | Type::Array(_) | Type::Map(_, _) => {
                        writeln!(out, "return NULL;")?
                    }
                    ty if is_tvalue(ty) => {
                        writeln!(out, "{{")?;
                        writeln!(out, "TValue _nil;")?;
                        writeln!(out, "setnilvalue(&_nil);")?;
                        writeln!(out, "return _nil;")?;
                        writeln!(out, "}}")?;
                    }
                    _ => writeln!(out, "return 0;")?,
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Host adapter
    // ------------------------------------------------------------------

    fn emit_adapter(
        &mut self,
        out: &mut String,
        func: &TopLevelFunc,
        ft: &FunctionType,
    ) -> Result<(), CodeGenError> {
        let line = func.loc.line;
        writeln!(
            out,
            "static int {}_{}_lua (lua_State *L) {{",
            self.mangled,
            super::mangle_name(&func.name)
        )?;
        writeln!(out, "Table *_G = hvalue(&clCvalue(L->ci->func)->upvalue[0]);")?;
        writeln!(out, "int _n = lua_gettop(L);")?;
        writeln!(out, "if (_n != {})", ft.params.len())?;
        writeln!(
            out,
            "return luaL_error(L, \"wrong number of arguments to '{}', expected {} but got %d\", _n);",
            func.name,
            ft.params.len()
        )?;

        // Arguments sit at fixed offsets above the function slot. No
        // mirroring is needed here: they stay anchored on the host stack.
        let mut arg_values = Vec::with_capacity(ft.params.len());
        for (i, param) in func.params.iter().enumerate() {
            let arg = format!("_arg{}", i);
            writeln!(out, "TValue *{} = L->ci->func + {};", arg, i + 1)?;
            let value = self.emit_adapter_arg(out, &param.name, &param.ty, &arg, line, i)?;
            arg_values.push(value);
        }

        let mut call_args = vec!["L".to_string(), "_G".to_string()];
        call_args.extend(arg_values);
        let mut outs = Vec::new();
        for (i, ty) in ft.rets.iter().enumerate().skip(1) {
            let name = format!("_o{}", i);
            writeln!(out, "{} {};", c_type(ty), name)?;
            call_args.push(format!("&{}", name));
            outs.push(name);
        }

        let entry = self.titan_entry(&func.name);
        match ft.rets.first() {
            None => {
                writeln!(out, "{}({});", entry, call_args.join(", "))?;
                writeln!(out, "return 0;")?;
            }
            Some(ret_ty) => {
                writeln!(
                    out,
                    "{} _ret = {}({});",
                    c_type(ret_ty),
                    entry,
                    call_args.join(", ")
                )?;
                writeln!(out, "lua_checkstack(L, {});", ft.rets.len())?;
                self.emit_push_result(out, ret_ty, "_ret")?;
                for (ty, name) in ft.rets.iter().skip(1).zip(&outs) {
                    self.emit_push_result(out, ty, name)?;
                }
                writeln!(out, "return {};", ft.rets.len())?;
            }
        }
        writeln!(out, "}}")?;
        writeln!(out)?;
        Ok(())
    }

    /// Read one adapter argument with its type check. Floats accept any
    /// number (integers convert up); everything else is strict on tags.
    fn emit_adapter_arg(
        &mut self,
        out: &mut String,
        name: &str,
        ty: &Type,
        arg: &str,
        line: u32,
        index: usize,
    ) -> Result<String, CodeGenError> {
        let value = format!("_p{}", index);
        let type_error = |out: &mut String, expected: &Type| -> Result<(), CodeGenError> {
            writeln!(
                out,
                "luaL_error(L, \"wrong type for argument '{}' at line %d, expected {} but found %s\", {}, lua_typename(L, ttnov({})));",
                name, expected, line, arg
            )?;
            Ok(())
        };
        match ty {
            Type::Integer => {
                writeln!(out, "lua_Integer {};", value)?;
                writeln!(out, "if (ttisinteger({})) {} = ivalue({});", arg, value, arg)?;
                writeln!(out, "else")?;
                type_error(out, ty)?;
            }
            Type::Float => {
                writeln!(out, "lua_Number {};", value)?;
                writeln!(out, "if (ttisfloat({})) {} = fltvalue({});", arg, value, arg)?;
                writeln!(
                    out,
                    "else if (ttisinteger({})) {} = cast_num(ivalue({}));",
                    arg, value, arg
                )?;
                writeln!(out, "else")?;
                type_error(out, ty)?;
            }
            Type::Boolean => {
                writeln!(out, "int {};", value)?;
                writeln!(out, "if (ttisboolean({})) {} = bvalue({});", arg, value, arg)?;
                writeln!(out, "else")?;
                type_error(out, ty)?;
            }
            Type::Nil => {
                writeln!(out, "int {} = 0;", value)?;
                writeln!(out, "if (!ttisnil({}))", arg)?;
                type_error(out, ty)?;
            }
            Type::String => {
                writeln!(out, "TString *{};", value)?;
                writeln!(out, "if (ttisstring({})) {} = tsvalue({});", arg, value, arg)?;
                writeln!(out, "else")?;
                type_error(out, ty)?;
            }
            Type::Array(_) | Type::Map(_, _) => {
                writeln!(out, "Table *{};", value)?;
                writeln!(out, "if (ttistable({})) {} = hvalue({});", arg, value, arg)?;
                writeln!(out, "else")?;
                type_error(out, ty)?;
            }
            Type::Value => {
                writeln!(out, "TValue {};", value)?;
                writeln!(out, "setobj(L, &{}, {});", value, arg)?;
            }
            ty if is_tvalue(ty) => {
                if let Some(check) = super::tag_check(arg, ty) {
                    writeln!(out, "if (!({}))", check)?;
                    type_error(out, ty)?;
                }
                writeln!(out, "TValue {};", value)?;
                writeln!(out, "setobj(L, &{}, {});", value, arg)?;
            }
            other => {
                return Err(CodeGenError::UncheckedNode(format!(
                    "parameter '{}' of unexpected type {}",
                    name, other
                )))
            }
        }
        Ok(value)
    }

    fn emit_push_result(
        &mut self,
        out: &mut String,
        ty: &Type,
        value: &str,
    ) -> Result<(), CodeGenError> {
        match ty {
            Type::Nil => writeln!(out, "lua_pushnil(L);")?,
            Type::Boolean => writeln!(out, "lua_pushboolean(L, {});", value)?,
            Type::Integer => writeln!(out, "lua_pushinteger(L, {});", value)?,
            Type::Float => writeln!(out, "lua_pushnumber(L, {});", value)?,
            Type::String => {
                writeln!(out, "setsvalue2s(L, L->top, {});", value)?;
                writeln!(out, "api_incr_top(L);")?;
            }
            Type::Array(_) | Type::Map(_, _) => {
                writeln!(out, "sethvalue2s(L, L->top, {});", value)?;
                writeln!(out, "api_incr_top(L);")?;
            }
            ty if is_tvalue(ty) => {
                writeln!(out, "setobj2s(L, L->top, &{});", value)?;
                writeln!(out, "api_incr_top(L);")?;
            }
            other => {
                return Err(CodeGenError::UncheckedNode(format!(
                    "cannot push a value of type {}",
                    other
                )))
            }
        }
        Ok(())
    }
}
