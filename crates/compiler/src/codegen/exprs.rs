//! Expression emission
//!
//! Every expression lowers to a C temporary (or literal) of its type's C
//! representation, with any prelude statements appended to the output
//! buffer first. The checker already made all conversions explicit, so
//! operands here are homogeneous and `Cast` nodes are the only place
//! coercion code comes out.
//!
//! GC discipline: a temporary holding a collectable value (or a `TValue`
//! that may) is mirrored into one of the function's reserved stack slots
//! as soon as it is produced, so a collection triggered by any later
//! allocation cannot reclaim it.

use super::{c_type, is_tvalue, mangle_name, CodeGen, CodeGenError};
use crate::ast::{Binop, Call, CallKind, DotRef, Exp, ExpKind, InitField, NameRef, Unop, Var};
use crate::types::{FunctionType, Type};
use std::fmt::Write as _;

impl<'a> CodeGen<'a> {
    pub(super) fn emit_exp(&mut self, out: &mut String, exp: &Exp) -> Result<String, CodeGenError> {
        match &exp.kind {
            ExpKind::Nil => Ok("0".to_string()),
            ExpKind::Bool(b) => Ok((if *b { "1" } else { "0" }).to_string()),
            ExpKind::Integer(n) => Ok(c_int_literal(*n)),
            ExpKind::Float(x) => Ok(c_float_literal(*x)),
            ExpKind::Str(bytes) => {
                let slot = self.literal_slot(bytes)?;
                let temp = self.fresh_temp();
                writeln!(
                    out,
                    "TString *{} = tsvalue(&_G->array[{}]);",
                    temp, slot
                )?;
                Ok(temp)
            }
            ExpKind::InitList(fields) => self.emit_init_list(out, fields, &exp.ty),
            ExpKind::Var(var) => self.emit_var_read(out, var, &exp.ty),
            ExpKind::Unop(op, operand) => self.emit_unop(out, *op, operand),
            ExpKind::Binop(op, lhs, rhs) => self.emit_binop(out, *op, lhs, rhs, &exp.ty),
            ExpKind::Concat(operands) => self.emit_concat(out, operands),
            ExpKind::Call(call) => self.emit_call(out, call, exp.loc.line),
            ExpKind::Cast { exp: inner, .. } => {
                let value = self.emit_exp(out, inner)?;
                self.emit_coercion(out, &value, &inner.ty, &exp.ty, exp.loc.line)
            }
            ExpKind::Adjust(inner) => self.emit_exp(out, inner),
            ExpKind::Extra { index } => self
                .pending_extras
                .get(*index)
                .cloned()
                .ok_or_else(|| {
                    CodeGenError::UncheckedNode("extra value without a preceding call".to_string())
                }),
        }
    }

    // ------------------------------------------------------------------
    // Temporaries and mirroring
    // ------------------------------------------------------------------

    fn declare_scalar(
        &mut self,
        out: &mut String,
        cty: &str,
        init: &str,
    ) -> Result<String, CodeGenError> {
        let temp = self.fresh_temp();
        writeln!(out, "{} {} = {};", cty, temp, init)?;
        Ok(temp)
    }

    /// Declare a raw GC pointer temporary and mirror it into a fresh
    /// reserved slot.
    fn declare_gc_ptr(
        &mut self,
        out: &mut String,
        ty: &Type,
        init: &str,
    ) -> Result<String, CodeGenError> {
        let temp = self.fresh_temp();
        writeln!(out, "{} {} = {};", c_type(ty), temp, init)?;
        self.mirror(out, ty, &temp)?;
        Ok(temp)
    }

    /// Mirror a live GC value into its reserved stack slot.
    pub(super) fn mirror(
        &mut self,
        out: &mut String,
        ty: &Type,
        name: &str,
    ) -> Result<(), CodeGenError> {
        let slot = self.alloc_slot();
        match ty {
            Type::String => writeln!(out, "setsvalue2s(L, _base + {}, {});", slot, name)?,
            Type::Array(_) | Type::Map(_, _) => {
                writeln!(out, "sethvalue2s(L, _base + {}, {});", slot, name)?
            }
            _ if is_tvalue(ty) => {
                writeln!(out, "setobj2s(L, _base + {}, &{});", slot, name)?
            }
            other => {
                return Err(CodeGenError::UncheckedNode(format!(
                    "mirroring a non-collectable value of type {}",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Box a C value of `ty` into a fresh `TValue` temporary.
    pub(super) fn box_value(
        &mut self,
        out: &mut String,
        ty: &Type,
        value: &str,
    ) -> Result<String, CodeGenError> {
        let temp = self.fresh_temp();
        writeln!(out, "TValue {};", temp)?;
        self.emit_set_tvalue(out, &format!("&{}", temp), ty, value)?;
        if ty.is_gc() {
            self.mirror(out, &Type::Value, &temp)?;
        }
        Ok(temp)
    }

    /// `set*value` into a `TValue *` destination from a C value of `ty`.
    pub(super) fn emit_set_tvalue(
        &mut self,
        out: &mut String,
        dst: &str,
        ty: &Type,
        value: &str,
    ) -> Result<(), CodeGenError> {
        match ty {
            Type::Nil => writeln!(out, "setnilvalue({});", dst)?,
            Type::Boolean => writeln!(out, "setbvalue({}, {});", dst, value)?,
            Type::Integer => writeln!(out, "setivalue({}, {});", dst, value)?,
            Type::Float => writeln!(out, "setfltvalue({}, {});", dst, value)?,
            Type::String => writeln!(out, "setsvalue(L, {}, {});", dst, value)?,
            Type::Array(_) | Type::Map(_, _) => {
                writeln!(out, "sethvalue(L, {}, {});", dst, value)?
            }
            _ if is_tvalue(ty) => writeln!(out, "setobj(L, {}, &{});", dst, value)?,
            other => {
                return Err(CodeGenError::UncheckedNode(format!(
                    "cannot box a value of type {}",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Extract a C value of `ty` from a `TValue *` expression, without a
    /// tag check.
    fn emit_extract(
        &mut self,
        out: &mut String,
        ty: &Type,
        src: &str,
    ) -> Result<String, CodeGenError> {
        match ty {
            Type::Nil => Ok("0".to_string()),
            Type::Boolean => self.declare_scalar(out, "int", &format!("bvalue({})", src)),
            Type::Integer => {
                self.declare_scalar(out, "lua_Integer", &format!("ivalue({})", src))
            }
            Type::Float => {
                self.declare_scalar(out, "lua_Number", &format!("fltvalue({})", src))
            }
            Type::String => {
                let init = format!("tsvalue({})", src);
                self.declare_gc_ptr(out, ty, &init)
            }
            Type::Array(_) | Type::Map(_, _) => {
                let init = format!("hvalue({})", src);
                self.declare_gc_ptr(out, ty, &init)
            }
            _ if is_tvalue(ty) => {
                let temp = self.fresh_temp();
                writeln!(out, "TValue {};", temp)?;
                writeln!(out, "setobj(L, &{}, {});", temp, src)?;
                self.mirror(out, &Type::Value, &temp)?;
                Ok(temp)
            }
            other => Err(CodeGenError::UncheckedNode(format!(
                "cannot extract a value of type {}",
                other
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    fn emit_var_read(
        &mut self,
        out: &mut String,
        var: &Var,
        ty: &Type,
    ) -> Result<String, CodeGenError> {
        match var {
            Var::Name { refkind, name, .. } => match refkind {
                Some(NameRef::Local(decl)) => self.local_name(*decl),
                Some(NameRef::GlobalVar(decl)) => {
                    let slot = self.slot_of(*decl)?;
                    let src = format!("&_G->array[{}]", slot);
                    self.emit_extract(out, ty, &src)
                }
                Some(NameRef::GlobalFunc(decl)) => {
                    // A top-level function read as a value: its closure.
                    let slot = self.slot_of(*decl)?;
                    let src = format!("&_G->array[{}]", slot);
                    self.emit_extract(out, &Type::Function(dummy_fn()), &src)
                }
                _ => Err(CodeGenError::UncheckedNode(format!(
                    "'{}' is not a first-class value",
                    name
                ))),
            },
            Var::Dot {
                exp, name, refkind, ..
            } => match refkind {
                Some(DotRef::ModuleMember {
                    module,
                    member,
                    slot,
                }) => {
                    let imp = mangle_name(module);
                    match ty {
                        Type::Function(_) => {
                            let src = format!(
                                "&{}_imp_{}->array[{}]",
                                self.mangled, imp, slot
                            );
                            self.emit_extract(out, ty, &src)
                        }
                        _ => {
                            let ptr = format!(
                                "{}_var_{}_{}",
                                self.mangled,
                                imp,
                                mangle_name(member)
                            );
                            self.emit_extract(out, ty, &ptr)
                        }
                    }
                }
                Some(DotRef::Constructor { decl, .. }) => {
                    let slot = self.slot_of(*decl)?;
                    let src = format!("&_G->array[{}]", slot);
                    self.emit_extract(out, &Type::Function(dummy_fn()), &src)
                }
                Some(DotRef::RecordField { field, .. }) => {
                    self.need("rec_get");
                    let rec = self.emit_exp(out, exp)?;
                    let key_slot = self.literal_slot(field.as_bytes())?;
                    let cell = self.fresh_temp();
                    writeln!(
                        out,
                        "const TValue *{} = titan_rec_get(L, hvalue(&{}), tsvalue(&_G->array[{}]));",
                        cell, rec, key_slot
                    )?;
                    self.emit_extract(out, ty, &cell)
                }
                None => Err(CodeGenError::UncheckedNode(format!(
                    "unresolved field access '.{}'",
                    name
                ))),
            },
            Var::Bracket { array, index, loc } => {
                let line = loc.line;
                match array.ty.clone() {
                    Type::Array(elem) => {
                        let table = self.emit_exp(out, array)?;
                        let idx = self.emit_exp(out, index)?;
                        let cell = self.fresh_temp();
                        if matches!(*elem, Type::Option(_) | Type::Value | Type::Nil) {
                            // nil is a legal element here; a missing slot
                            // reads as nil instead of trapping.
                            writeln!(
                                out,
                                "const TValue *{} = luaH_getint({}, {});",
                                cell, table, idx
                            )?;
                        } else {
                            self.need("arr_get");
                            writeln!(
                                out,
                                "const TValue *{} = titan_arr_get(L, {}, {}, {});",
                                cell, table, idx, line
                            )?;
                        }
                        self.emit_extract(out, ty, &cell)
                    }
                    Type::Map(key_ty, value_ty) => {
                        let table = self.emit_exp(out, array)?;
                        let key = self.emit_exp(out, index)?;
                        let boxed = self.box_value(out, &key_ty, &key)?;
                        let cell = self.fresh_temp();
                        if matches!(*value_ty, Type::Option(_) | Type::Value | Type::Nil) {
                            writeln!(
                                out,
                                "const TValue *{} = luaH_get({}, &{});",
                                cell, table, boxed
                            )?;
                        } else {
                            self.need("map_get");
                            writeln!(
                                out,
                                "const TValue *{} = titan_map_get(L, {}, &{}, {});",
                                cell, table, boxed, line
                            )?;
                        }
                        self.emit_extract(out, ty, &cell)
                    }
                    other => Err(CodeGenError::UncheckedNode(format!(
                        "indexing a value of type {}",
                        other
                    ))),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Stores
    // ------------------------------------------------------------------

    /// Store a C value into a variable. `value_ty` is the value's type
    /// (it differs from the target's only for nil deletions).
    pub(super) fn emit_store_var(
        &mut self,
        out: &mut String,
        var: &Var,
        value_ty: &Type,
        value: &str,
    ) -> Result<(), CodeGenError> {
        match var {
            Var::Name { refkind, name, .. } => match refkind {
                Some(NameRef::Local(decl)) => {
                    let cname = self.local_name(*decl)?;
                    if is_tvalue(value_ty) {
                        writeln!(out, "setobj(L, &{}, &{});", cname, value)?;
                    } else {
                        writeln!(out, "{} = {};", cname, value)?;
                    }
                    // Keep the local's reserved slot in sync.
                    if let Some(slot) = self.local_slots.get(decl).copied() {
                        self.mirror_into_slot(out, slot, value_ty, &cname)?;
                    }
                    Ok(())
                }
                Some(NameRef::GlobalVar(decl)) => {
                    let slot = self.slot_of(*decl)?;
                    let dst = format!("&_G->array[{}]", slot);
                    self.emit_set_tvalue(out, &dst, value_ty, value)?;
                    if value_ty.is_gc() {
                        writeln!(out, "luaC_barrierback(L, _G, {});", dst)?;
                    }
                    Ok(())
                }
                _ => Err(CodeGenError::UncheckedNode(format!("cannot assign to '{}'", name))),
            },
            Var::Dot {
                exp, refkind, name, ..
            } => match refkind {
                Some(DotRef::RecordField { field, .. }) => {
                    self.need("rec_set");
                    let rec = self.emit_exp(out, exp)?;
                    let boxed = self.box_value(out, value_ty, value)?;
                    let key_slot = self.literal_slot(field.as_bytes())?;
                    writeln!(
                        out,
                        "titan_rec_set(L, hvalue(&{}), tsvalue(&_G->array[{}]), &{});",
                        rec, key_slot, boxed
                    )?;
                    Ok(())
                }
                _ => Err(CodeGenError::UncheckedNode(format!("cannot assign to '.{}'", name))),
            },
            Var::Bracket { array, index, .. } => match array.ty.clone() {
                Type::Array(_) => {
                    self.need("arr_set");
                    let table = self.emit_exp(out, array)?;
                    let idx = self.emit_exp(out, index)?;
                    let boxed = self.box_value(out, value_ty, value)?;
                    writeln!(out, "titan_arr_set(L, {}, {}, &{});", table, idx, boxed)?;
                    Ok(())
                }
                Type::Map(key_ty, _) => {
                    self.need("map_set");
                    let table = self.emit_exp(out, array)?;
                    let key = self.emit_exp(out, index)?;
                    let boxed_key = self.box_value(out, &key_ty, &key)?;
                    let boxed_value = self.box_value(out, value_ty, value)?;
                    writeln!(
                        out,
                        "titan_map_set(L, {}, &{}, &{});",
                        table, boxed_key, boxed_value
                    )?;
                    Ok(())
                }
                other => Err(CodeGenError::UncheckedNode(format!(
                    "storing into a value of type {}",
                    other
                ))),
            },
        }
    }

    fn mirror_into_slot(
        &mut self,
        out: &mut String,
        slot: usize,
        ty: &Type,
        name: &str,
    ) -> Result<(), CodeGenError> {
        match ty {
            Type::String => writeln!(out, "setsvalue2s(L, _base + {}, {});", slot, name)?,
            Type::Array(_) | Type::Map(_, _) => {
                writeln!(out, "sethvalue2s(L, _base + {}, {});", slot, name)?
            }
            _ if is_tvalue(ty) => writeln!(out, "setobj2s(L, _base + {}, &{});", slot, name)?,
            _ => {}
        }
        Ok(())
    }

    /// Declare a local variable with its initial value, reserving and
    /// filling a stack slot when it holds a collectable.
    pub(super) fn emit_declare_local(
        &mut self,
        out: &mut String,
        decl_id: usize,
        decl_name: &str,
        ty: &Type,
        value: &str,
    ) -> Result<String, CodeGenError> {
        let cname = format!("{}_{}", mangle_name(decl_name), decl_id);
        if is_tvalue(ty) {
            writeln!(out, "TValue {};", cname)?;
            writeln!(out, "setobj(L, &{}, &{});", cname, value)?;
        } else {
            writeln!(out, "{} {} = {};", c_type(ty), cname, value)?;
        }
        if ty.is_gc() {
            let slot = self.alloc_slot();
            self.local_slots.insert(decl_id, slot);
            self.mirror_into_slot(out, slot, ty, &cname)?;
        }
        self.local_names.insert(decl_id, cname.clone());
        Ok(cname)
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    fn emit_unop(
        &mut self,
        out: &mut String,
        op: Unop,
        operand: &Exp,
    ) -> Result<String, CodeGenError> {
        let value = self.emit_exp(out, operand)?;
        match (op, &operand.ty) {
            (Unop::Neg, Type::Integer) => self.declare_scalar(
                out,
                "lua_Integer",
                &format!("(lua_Integer)(0u - (lua_Unsigned)({}))", value),
            ),
            (Unop::Neg, Type::Float) => {
                self.declare_scalar(out, "lua_Number", &format!("-({})", value))
            }
            (Unop::BNot, Type::Integer) => self.declare_scalar(
                out,
                "lua_Integer",
                &format!("(lua_Integer)(~(lua_Unsigned)({}))", value),
            ),
            (Unop::Not, _) => self.declare_scalar(out, "int", &format!("!({})", value)),
            (Unop::Len, Type::Array(_)) => self.declare_scalar(
                out,
                "lua_Integer",
                &format!("(lua_Integer)luaH_getn({})", value),
            ),
            (Unop::Len, Type::String) => self.declare_scalar(
                out,
                "lua_Integer",
                &format!("(lua_Integer)tsslen({})", value),
            ),
            (op, ty) => Err(CodeGenError::UncheckedNode(format!(
                "unary '{}' on a value of type {}",
                op, ty
            ))),
        }
    }

    fn emit_binop(
        &mut self,
        out: &mut String,
        op: Binop,
        lhs: &Exp,
        rhs: &Exp,
        result_ty: &Type,
    ) -> Result<String, CodeGenError> {
        if matches!(op, Binop::And | Binop::Or) {
            return self.emit_logical(out, op, lhs, rhs, result_ty);
        }
        let a = self.emit_exp(out, lhs)?;
        let b = self.emit_exp(out, rhs)?;
        let operand_ty = &lhs.ty;

        if op.is_comparison() {
            let test = match operand_ty {
                Type::Integer | Type::Float | Type::Boolean | Type::Nil => {
                    format!("(({}) {} ({}))", a, c_cmp_op(op), b)
                }
                Type::String => match op {
                    Binop::Eq => {
                        self.need("str_eq");
                        format!("titan_str_eq({}, {})", a, b)
                    }
                    Binop::Ne => {
                        self.need("str_eq");
                        format!("!titan_str_eq({}, {})", a, b)
                    }
                    _ => {
                        self.need("str_cmp");
                        format!("(titan_str_cmp({}, {}) {} 0)", a, b, c_cmp_op(op))
                    }
                },
                ty if is_tvalue(ty) => match op {
                    Binop::Eq => format!("luaV_equalobj(L, &{}, &{})", a, b),
                    Binop::Ne => format!("!luaV_equalobj(L, &{}, &{})", a, b),
                    _ => {
                        return Err(CodeGenError::UncheckedNode(format!(
                            "ordering on a value of type {}",
                            ty
                        )))
                    }
                },
                other => {
                    return Err(CodeGenError::UncheckedNode(format!(
                        "comparison on a value of type {}",
                        other
                    )))
                }
            };
            return self.declare_scalar(out, "int", &test);
        }

        match operand_ty {
            Type::Integer => {
                let init = match op {
                    Binop::Add => format!(
                        "(lua_Integer)((lua_Unsigned)({}) + (lua_Unsigned)({}))",
                        a, b
                    ),
                    Binop::Sub => format!(
                        "(lua_Integer)((lua_Unsigned)({}) - (lua_Unsigned)({}))",
                        a, b
                    ),
                    Binop::Mul => format!(
                        "(lua_Integer)((lua_Unsigned)({}) * (lua_Unsigned)({}))",
                        a, b
                    ),
                    Binop::IDiv => format!("luaV_div(L, {}, {})", a, b),
                    Binop::Mod => format!("luaV_mod(L, {}, {})", a, b),
                    Binop::BAnd => format!(
                        "(lua_Integer)((lua_Unsigned)({}) & (lua_Unsigned)({}))",
                        a, b
                    ),
                    Binop::BOr => format!(
                        "(lua_Integer)((lua_Unsigned)({}) | (lua_Unsigned)({}))",
                        a, b
                    ),
                    Binop::BXor => format!(
                        "(lua_Integer)((lua_Unsigned)({}) ^ (lua_Unsigned)({}))",
                        a, b
                    ),
                    Binop::Shl => format!("luaV_shiftl({}, {})", a, b),
                    Binop::Shr => format!(
                        "luaV_shiftl({}, (lua_Integer)(0u - (lua_Unsigned)({})))",
                        a, b
                    ),
                    other => {
                        return Err(CodeGenError::UncheckedNode(format!(
                            "integer operands for '{}'",
                            other
                        )))
                    }
                };
                self.declare_scalar(out, "lua_Integer", &init)
            }
            Type::Float => match op {
                Binop::Mod => {
                    let temp = self.fresh_temp();
                    writeln!(out, "lua_Number {};", temp)?;
                    writeln!(out, "luai_nummod(L, {}, {}, {});", a, b, temp)?;
                    Ok(temp)
                }
                _ => {
                    let init = match op {
                        Binop::Add => format!("({}) + ({})", a, b),
                        Binop::Sub => format!("({}) - ({})", a, b),
                        Binop::Mul => format!("({}) * ({})", a, b),
                        Binop::Div => format!("luai_numdiv(L, {}, {})", a, b),
                        Binop::IDiv => format!("luai_numidiv(L, {}, {})", a, b),
                        Binop::Pow => format!("luai_numpow(L, {}, {})", a, b),
                        other => {
                            return Err(CodeGenError::UncheckedNode(format!(
                                "float operands for '{}'",
                                other
                            )))
                        }
                    };
                    self.declare_scalar(out, "lua_Number", &init)
                }
            },
            other => Err(CodeGenError::UncheckedNode(format!(
                "arithmetic on values of type {}",
                other
            ))),
        }
    }

    /// Short-circuit `and`/`or` over homogeneous operands: take the left
    /// value, and only evaluate the right side when the left's truth value
    /// does not decide the result.
    fn emit_logical(
        &mut self,
        out: &mut String,
        op: Binop,
        lhs: &Exp,
        rhs: &Exp,
        result_ty: &Type,
    ) -> Result<String, CodeGenError> {
        let a = self.emit_exp(out, lhs)?;
        let temp = self.fresh_temp();
        if is_tvalue(result_ty) {
            writeln!(out, "TValue {};", temp)?;
            writeln!(out, "setobj(L, &{}, &{});", temp, a)?;
        } else {
            writeln!(out, "{} {} = {};", c_type(result_ty), temp, a)?;
        }

        let truthy = truthiness(result_ty, &temp);
        let take_rhs = match (op, truthy.as_str()) {
            // Statically decided: the right side is dead or uncondition-
            // ally taken.
            (Binop::Or, "1") => None,
            (Binop::And, "0") => None,
            (Binop::Or, "0") | (Binop::And, "1") => Some(String::new()),
            (Binop::Or, t) => Some(format!("if (!({})) ", t)),
            (Binop::And, t) => Some(format!("if ({}) ", t)),
            _ => unreachable!("emit_logical only sees 'and'/'or'"),
        };
        if let Some(guard) = take_rhs {
            writeln!(out, "{}{{", guard)?;
            let b = self.emit_exp(out, rhs)?;
            if is_tvalue(result_ty) {
                writeln!(out, "setobj(L, &{}, &{});", temp, b)?;
            } else {
                writeln!(out, "{} = {};", temp, b)?;
            }
            writeln!(out, "}}")?;
        }
        if result_ty.is_gc() {
            self.mirror(out, result_ty, &temp)?;
        }
        Ok(temp)
    }

    fn emit_concat(
        &mut self,
        out: &mut String,
        operands: &[Exp],
    ) -> Result<String, CodeGenError> {
        self.need("concat");
        let mut parts = Vec::with_capacity(operands.len());
        for operand in operands {
            parts.push(self.emit_exp(out, operand)?);
        }
        let array = self.fresh_temp();
        writeln!(out, "TString *{}[{}];", array, parts.len())?;
        for (i, part) in parts.iter().enumerate() {
            writeln!(out, "{}[{}] = {};", array, i, part)?;
        }
        let init = format!("titan_concat(L, {}, {})", parts.len(), array);
        self.declare_gc_ptr(out, &Type::String, &init)
    }

    // ------------------------------------------------------------------
    // Initializer lists
    // ------------------------------------------------------------------

    fn emit_init_list(
        &mut self,
        out: &mut String,
        fields: &[InitField],
        ty: &Type,
    ) -> Result<String, CodeGenError> {
        match ty {
            Type::Array(elem) => {
                let init = "luaH_new(L)".to_string();
                let table = self.declare_gc_ptr(out, ty, &init)?;
                if !fields.is_empty() {
                    writeln!(out, "luaH_resizearray(L, {}, {});", table, fields.len())?;
                }
                for (i, field) in fields.iter().enumerate() {
                    let value = self.emit_exp(out, &field.exp)?;
                    let boxed = self.box_value(out, elem, &value)?;
                    writeln!(
                        out,
                        "setobj2t(L, &{}->array[{}], &{});",
                        table, i, boxed
                    )?;
                    if elem.is_gc() {
                        writeln!(
                            out,
                            "luaC_barrierback(L, {}, &{});",
                            table, boxed
                        )?;
                    }
                }
                Ok(table)
            }
            Type::Map(_, _) => {
                let init = "luaH_new(L)".to_string();
                self.declare_gc_ptr(out, ty, &init)
            }
            Type::Nominal(_) => {
                self.need("rec_set");
                let table = self.fresh_temp();
                writeln!(out, "Table *{} = luaH_new(L);", table)?;
                let boxed_rec = self.fresh_temp();
                writeln!(out, "TValue {};", boxed_rec)?;
                writeln!(out, "sethvalue(L, &{}, {});", boxed_rec, table)?;
                self.mirror(out, &Type::Value, &boxed_rec)?;
                for field in fields {
                    let name = field.name.as_ref().ok_or_else(|| {
                        CodeGenError::UncheckedNode("record initializer without field name".to_string())
                    })?;
                    let value = self.emit_exp(out, &field.exp)?;
                    let boxed = self.box_value(out, &field.exp.ty, &value)?;
                    let key_slot = self.literal_slot(name.as_bytes())?;
                    writeln!(
                        out,
                        "titan_rec_set(L, {}, tsvalue(&_G->array[{}]), &{});",
                        table, key_slot, boxed
                    )?;
                }
                Ok(boxed_rec)
            }
            other => Err(CodeGenError::UncheckedNode(format!(
                "initializer list of type {}",
                other
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Constant initializers (luaopen context)
    // ------------------------------------------------------------------

    /// Evaluate a constant top-level initializer straight into a
    /// `TValue *` destination. This runs inside `luaopen`, where no
    /// reserved frame exists: every allocation is anchored by an
    /// immediate store into its destination, which lives in `owner`
    /// (the globals table or an enclosing table under construction).
    pub(super) fn emit_init_value(
        &mut self,
        out: &mut String,
        exp: &Exp,
        dst: &str,
        owner: &str,
    ) -> Result<(), CodeGenError> {
        match &exp.kind {
            ExpKind::Nil => {
                writeln!(out, "setnilvalue({});", dst)?;
                Ok(())
            }
            ExpKind::Bool(b) => {
                writeln!(out, "setbvalue({}, {});", dst, if *b { 1 } else { 0 })?;
                Ok(())
            }
            ExpKind::Integer(n) => {
                writeln!(out, "setivalue({}, {});", dst, c_int_literal(*n))?;
                Ok(())
            }
            ExpKind::Float(x) => {
                writeln!(out, "setfltvalue({}, {});", dst, c_float_literal(*x))?;
                Ok(())
            }
            ExpKind::Str(bytes) => {
                let temp = self.fresh_temp();
                writeln!(out, "{{")?;
                writeln!(
                    out,
                    "TString *{} = luaS_newlstr(L, {}, {});",
                    temp,
                    super::c_string_literal(bytes),
                    bytes.len()
                )?;
                writeln!(out, "setsvalue(L, {}, {});", dst, temp)?;
                writeln!(out, "luaC_barrierback(L, {}, {});", owner, dst)?;
                writeln!(out, "}}")?;
                Ok(())
            }
            ExpKind::Cast { exp: inner, .. } => {
                self.emit_init_cast(out, inner, &exp.ty, dst, owner, exp.loc.line)
            }
            ExpKind::InitList(fields) => self.emit_init_table(out, fields, &exp.ty, dst, owner),
            other => Err(CodeGenError::UncheckedNode(format!(
                "non-constant top-level initializer: {:?}",
                other
            ))),
        }
    }

    fn emit_init_cast(
        &mut self,
        out: &mut String,
        inner: &Exp,
        target: &Type,
        dst: &str,
        owner: &str,
        line: u32,
    ) -> Result<(), CodeGenError> {
        match target {
            // Boxing is the identity here: the destination is already a
            // TValue, so writing the inner constant boxes it.
            Type::Value | Type::Option(_) => self.emit_init_value(out, inner, dst, owner),
            Type::Float => match &inner.kind {
                ExpKind::Integer(n) => {
                    writeln!(
                        out,
                        "setfltvalue({}, (lua_Number)({}));",
                        dst,
                        c_int_literal(*n)
                    )?;
                    Ok(())
                }
                other => Err(CodeGenError::UncheckedNode(format!(
                    "non-constant float initializer: {:?}",
                    other
                ))),
            },
            Type::Integer => match &inner.kind {
                ExpKind::Float(x) => {
                    self.need("float2int");
                    writeln!(
                        out,
                        "setivalue({}, titan_float2int(L, {}, {}));",
                        dst,
                        c_float_literal(*x),
                        line
                    )?;
                    Ok(())
                }
                other => Err(CodeGenError::UncheckedNode(format!(
                    "non-constant integer initializer: {:?}",
                    other
                ))),
            },
            Type::Boolean => {
                // Truthiness of a constant literal is static.
                let value = match &inner.kind {
                    ExpKind::Nil | ExpKind::Bool(false) => 0,
                    _ => 1,
                };
                writeln!(out, "setbvalue({}, {});", dst, value)?;
                Ok(())
            }
            other => Err(CodeGenError::UncheckedNode(format!(
                "unsupported constant coercion to {}",
                other
            ))),
        }
    }

    fn emit_init_table(
        &mut self,
        out: &mut String,
        fields: &[InitField],
        ty: &Type,
        dst: &str,
        owner: &str,
    ) -> Result<(), CodeGenError> {
        let table = self.fresh_temp();
        writeln!(out, "{{")?;
        writeln!(out, "Table *{} = luaH_new(L);", table)?;
        writeln!(out, "sethvalue(L, {}, {});", dst, table)?;
        writeln!(out, "luaC_barrierback(L, {}, {});", owner, dst)?;
        match ty {
            Type::Array(_) => {
                if !fields.is_empty() {
                    writeln!(out, "luaH_resizearray(L, {}, {});", table, fields.len())?;
                }
                for (i, field) in fields.iter().enumerate() {
                    let cell = format!("&{}->array[{}]", table, i);
                    self.emit_init_value(out, &field.exp, &cell, &table)?;
                    writeln!(out, "luaC_barrierback(L, {}, {});", table, cell)?;
                }
            }
            Type::Map(_, _) => {
                // A constant map initializer is necessarily empty.
            }
            Type::Nominal(_) => {
                for field in fields {
                    let name = field.name.as_ref().ok_or_else(|| {
                        CodeGenError::UncheckedNode("record initializer without field name".to_string())
                    })?;
                    let key = self.fresh_temp();
                    let key_value = self.fresh_temp();
                    let cell = self.fresh_temp();
                    writeln!(out, "{{")?;
                    writeln!(
                        out,
                        "TString *{} = luaS_newlstr(L, {}, {});",
                        key,
                        super::c_string_literal(name.as_bytes()),
                        name.len()
                    )?;
                    // Anchor the key on the host stack across the insert.
                    writeln!(out, "TValue {};", key_value)?;
                    writeln!(out, "setsvalue2s(L, L->top, {});", key)?;
                    writeln!(out, "api_incr_top(L);")?;
                    writeln!(out, "setsvalue(L, &{}, {});", key_value, key)?;
                    writeln!(
                        out,
                        "TValue *{} = luaH_set(L, {}, &{});",
                        cell, table, key_value
                    )?;
                    writeln!(out, "setnilvalue({});", cell)?;
                    writeln!(out, "L->top--;")?;
                    self.emit_init_value(out, &field.exp, &cell, &table)?;
                    writeln!(out, "luaC_barrierback(L, {}, {});", table, cell)?;
                    writeln!(out, "}}")?;
                }
            }
            other => {
                return Err(CodeGenError::UncheckedNode(format!(
                    "constant initializer of type {}",
                    other
                )))
            }
        }
        writeln!(out, "}}")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn emit_call(
        &mut self,
        out: &mut String,
        call: &Call,
        line: u32,
    ) -> Result<String, CodeGenError> {
        let CallKind::Function { func } = &call.kind else {
            return Err(CodeGenError::UncheckedNode("method call".to_string()));
        };

        // Direct targets: this module's functions, constructors, and
        // imported functions through their file-scope pointers.
        if let ExpKind::Var(var) = &func.kind {
            match var {
                Var::Name {
                    refkind: Some(NameRef::GlobalFunc(decl)),
                    ..
                } => {
                    let decl = *decl;
                    let target = {
                        let f = self.find_func_by_decl(decl)?;
                        self.titan_entry(&f.name)
                    };
                    let ft = function_type(&func.ty)?;
                    return self.emit_direct_call(out, &target, "_G", &ft, &call.args);
                }
                Var::Dot {
                    refkind: Some(DotRef::Constructor { decl, .. }),
                    ..
                } => {
                    let decl = *decl;
                    let target = {
                        let f = self.find_func_by_decl(decl)?;
                        self.titan_entry(&f.name)
                    };
                    let ft = function_type(&func.ty)?;
                    return self.emit_direct_call(out, &target, "_G", &ft, &call.args);
                }
                Var::Dot {
                    refkind:
                        Some(DotRef::ModuleMember {
                            module, member, ..
                        }),
                    ..
                } => {
                    if let Type::Function(_) = &func.ty {
                        let imp = mangle_name(module);
                        let target =
                            format!("{}_fn_{}_{}", self.mangled, imp, mangle_name(member));
                        let globals = format!("{}_imp_{}", self.mangled, imp);
                        let ft = function_type(&func.ty)?;
                        return self.emit_direct_call(out, &target, &globals, &ft, &call.args);
                    }
                }
                _ => {}
            }
        }

        // Anything else is a first-class function value: marshal through
        // the host stack.
        let ft = function_type(&func.ty)?;
        let closure = self.emit_exp(out, func)?;
        self.emit_stack_call(out, &closure, &ft, &call.args, line)
    }

    fn emit_direct_call(
        &mut self,
        out: &mut String,
        target: &str,
        globals: &str,
        ft: &FunctionType,
        args: &[Exp],
    ) -> Result<String, CodeGenError> {
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.emit_exp(out, arg)?);
        }

        let mut call_args = vec!["L".to_string(), globals.to_string()];
        call_args.extend(arg_values);
        let mut outs = Vec::new();
        for ty in ft.rets.iter().skip(1) {
            let temp = self.fresh_temp();
            writeln!(out, "{} {};", c_type(ty), temp)?;
            call_args.push(format!("&{}", temp));
            outs.push(temp);
        }

        let result = match ft.rets.first() {
            None => {
                writeln!(out, "{}({});", target, call_args.join(", "))?;
                "0".to_string()
            }
            Some(ret_ty) => {
                let temp = self.fresh_temp();
                writeln!(
                    out,
                    "{} {} = {}({});",
                    c_type(ret_ty),
                    temp,
                    target,
                    call_args.join(", ")
                )?;
                if ret_ty.is_gc() {
                    self.mirror(out, ret_ty, &temp)?;
                }
                temp
            }
        };

        // Extra results become addressable for any following Extra nodes;
        // the out-values also need mirrors while they stay live.
        let mut extras = vec![result.clone()];
        for (ty, temp) in ft.rets.iter().skip(1).zip(&outs) {
            if ty.is_gc() {
                self.mirror(out, ty, temp)?;
            }
            extras.push(temp.clone());
        }
        self.pending_extras = extras;
        Ok(result)
    }

    /// Call a function value through the host stack: push the closure and
    /// the arguments, `lua_call`, then read the results back with type
    /// checks.
    fn emit_stack_call(
        &mut self,
        out: &mut String,
        closure: &str,
        ft: &FunctionType,
        args: &[Exp],
        line: u32,
    ) -> Result<String, CodeGenError> {
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.emit_exp(out, arg)?);
        }

        writeln!(out, "lua_checkstack(L, {});", args.len() + 1)?;
        writeln!(out, "setobj2s(L, L->top, &{});", closure)?;
        writeln!(out, "api_incr_top(L);")?;
        for (arg, value) in args.iter().zip(&arg_values) {
            match &arg.ty {
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
                        "cannot pass a value of type {}",
                        other
                    )))
                }
            }
        }
        let nrets = ft.rets.len();
        writeln!(out, "lua_call(L, {}, {});", args.len(), nrets)?;

        let mut results = Vec::with_capacity(nrets);
        for (i, ret_ty) in ft.rets.iter().enumerate() {
            let src = format!("(L->top - {})", nrets - i);
            let checked = self.emit_checked_extract(out, ret_ty, &src, line, "call result")?;
            results.push(checked);
        }
        if nrets > 0 {
            writeln!(out, "lua_pop(L, {});", nrets)?;
        }
        let first = results.first().cloned().unwrap_or_else(|| "0".to_string());
        self.pending_extras = results;
        Ok(first)
    }

    /// Extract with a tag check, trapping through the host error
    /// primitive on mismatch.
    pub(super) fn emit_checked_extract(
        &mut self,
        out: &mut String,
        ty: &Type,
        src: &str,
        line: u32,
        what: &str,
    ) -> Result<String, CodeGenError> {
        if *ty == Type::Float {
            // A float accepts any number, converting integers up.
            let temp = self.fresh_temp();
            writeln!(out, "lua_Number {};", temp)?;
            writeln!(out, "if (ttisfloat({})) {} = fltvalue({});", src, temp, src)?;
            writeln!(
                out,
                "else if (ttisinteger({})) {} = cast_num(ivalue({}));",
                src, temp, src
            )?;
            writeln!(
                out,
                "else luaL_error(L, \"wrong type for {} at line %d, expected float but found %s\", {}, lua_typename(L, ttnov({})));",
                what, line, src
            )?;
            return Ok(temp);
        }
        if let Some(check) = super::tag_check(src, ty) {
            writeln!(out, "if (!({}))", check)?;
            writeln!(
                out,
                "luaL_error(L, \"wrong type for {} at line %d, expected {} but found %s\", {}, lua_typename(L, ttnov({})));",
                what, ty, line, src
            )?;
        }
        self.emit_extract(out, ty, src)
    }

    // ------------------------------------------------------------------
    // Coercions
    // ------------------------------------------------------------------

    /// Lower a checker-inserted (or explicit `as`) conversion.
    pub(super) fn emit_coercion(
        &mut self,
        out: &mut String,
        value: &str,
        from: &Type,
        to: &Type,
        line: u32,
    ) -> Result<String, CodeGenError> {
        if from == to {
            return Ok(value.to_string());
        }
        match (from, to) {
            (Type::Integer, Type::Float) => Ok(format!("((lua_Number)({}))", value)),
            (Type::Float, Type::Integer) => {
                self.need("float2int");
                let init = format!("titan_float2int(L, {}, {})", value, line);
                self.declare_scalar(out, "lua_Integer", &init)
            }
            (Type::Integer, Type::String) => {
                self.need("int2str");
                let init = format!("titan_int2str(L, {})", value);
                self.declare_gc_ptr(out, &Type::String, &init)
            }
            (Type::Float, Type::String) => {
                self.need("flt2str");
                let init = format!("titan_flt2str(L, {})", value);
                self.declare_gc_ptr(out, &Type::String, &init)
            }
            // Truthiness: only nil and false are false.
            (_, Type::Boolean) => {
                let test = truthiness_of(from, value);
                Ok(test)
            }
            // Boxing into value or an option.
            (_, Type::Value) | (Type::Nil, Type::Option(_)) => self.box_value(out, from, value),
            (f, Type::Option(base)) if f == base.as_ref() => self.box_value(out, from, value),
            // Unboxing from value: predicate on the tag, extract or trap.
            (Type::Value, _) => {
                let src = format!("&{}", value);
                self.emit_checked_extract(out, to, &src, line, "value")
            }
            // Option narrowing: trap on nil, then the payload is the base.
            (Type::Option(base), t) if base.as_ref() == t => {
                writeln!(out, "if (ttisnil(&{}))", value)?;
                writeln!(
                    out,
                    "luaL_error(L, \"value is nil at line %d\", {});",
                    line
                )?;
                let src = format!("&{}", value);
                self.emit_extract(out, t, &src)
            }
            (f, t) => Err(CodeGenError::UncheckedNode(format!(
                "unsupported coercion from {} to {}",
                f, t
            ))),
        }
    }
}

fn function_type(ty: &Type) -> Result<FunctionType, CodeGenError> {
    match ty {
        Type::Function(ft) => Ok(ft.clone()),
        other => Err(CodeGenError::UncheckedNode(format!(
            "calling a value of type {}",
            other
        ))),
    }
}

/// Placeholder function shape for reading a closure as an opaque value.
fn dummy_fn() -> FunctionType {
    FunctionType::new(Vec::new(), Vec::new())
}

/// The C truth test for a value of a given type held in `name`.
fn truthiness(ty: &Type, name: &str) -> String {
    match ty {
        Type::Nil => "0".to_string(),
        Type::Boolean => name.to_string(),
        _ if is_tvalue(ty) => format!("!l_isfalse(&{})", name),
        _ => "1".to_string(),
    }
}

fn truthiness_of(ty: &Type, value: &str) -> String {
    match ty {
        Type::Nil => "0".to_string(),
        Type::Boolean => value.to_string(),
        _ if is_tvalue(ty) => format!("(!l_isfalse(&{}))", value),
        _ => "1".to_string(),
    }
}

fn c_cmp_op(op: Binop) -> &'static str {
    match op {
        Binop::Eq => "==",
        Binop::Ne => "!=",
        Binop::Lt => "<",
        Binop::Gt => ">",
        Binop::Le => "<=",
        Binop::Ge => ">=",
        _ => unreachable!("not a comparison"),
    }
}

fn c_int_literal(n: i64) -> String {
    if n == i64::MIN {
        // The literal form would overflow before negation.
        "(-9223372036854775807LL - 1)".to_string()
    } else {
        n.to_string()
    }
}

fn c_float_literal(x: f64) -> String {
    if x.is_finite() {
        format!("{:?}", x)
    } else if x.is_nan() {
        "(0.0/0.0)".to_string()
    } else if x > 0.0 {
        "HUGE_VAL".to_string()
    } else {
        "(-HUGE_VAL)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_int_literal_min() {
        assert_eq!(c_int_literal(42), "42");
        assert_eq!(c_int_literal(-1), "-1");
        assert_eq!(c_int_literal(i64::MIN), "(-9223372036854775807LL - 1)");
    }

    #[test]
    fn test_c_float_literal_round_trips() {
        assert_eq!(c_float_literal(1.0), "1.0");
        assert_eq!(c_float_literal(-2.5), "-2.5");
        assert_eq!(c_float_literal(f64::INFINITY), "HUGE_VAL");
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(truthiness(&Type::Nil, "_t"), "0");
        assert_eq!(truthiness(&Type::Boolean, "_t"), "_t");
        assert_eq!(truthiness(&Type::Integer, "_t"), "1");
        assert_eq!(
            truthiness(&Type::Option(Box::new(Type::Integer)), "_t"),
            "!l_isfalse(&_t)"
        );
    }
}
