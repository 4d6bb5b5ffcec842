//! Statement emission
//!
//! Statements lower to structured C. Loops come out as `while (1)` /
//! `for (;;)` shells so condition code (which may span several C
//! statements) can run inside the loop body; `break` maps directly.

use super::{c_type, is_tvalue, CodeGen, CodeGenError};
use crate::ast::{Block, Exp, ExpKind, IfClause, Stat};
use crate::types::Type;
use std::fmt::Write as _;

impl<'a> CodeGen<'a> {
    pub(super) fn emit_block(&mut self, out: &mut String, block: &Block) -> Result<(), CodeGenError> {
        writeln!(out, "{{")?;
        for stat in &block.stats {
            self.emit_stat(out, stat)?;
        }
        writeln!(out, "}}")?;
        Ok(())
    }

    pub(super) fn emit_stat(&mut self, out: &mut String, stat: &Stat) -> Result<(), CodeGenError> {
        match stat {
            Stat::Block { block, .. } => self.emit_block(out, block),
            Stat::While { cond, block, .. } => {
                writeln!(out, "while (1) {{")?;
                let test = self.emit_exp(out, cond)?;
                writeln!(out, "if (!({})) break;", test)?;
                for s in &block.stats {
                    self.emit_stat(out, s)?;
                }
                writeln!(out, "}}")?;
                Ok(())
            }
            Stat::Repeat { block, cond, .. } => {
                writeln!(out, "for (;;) {{")?;
                for s in &block.stats {
                    self.emit_stat(out, s)?;
                }
                let test = self.emit_exp(out, cond)?;
                writeln!(out, "if ({}) break;", test)?;
                writeln!(out, "}}")?;
                Ok(())
            }
            Stat::If {
                clauses,
                else_block,
                ..
            } => self.emit_if(out, clauses, else_block.as_ref()),
            Stat::For {
                decl,
                start,
                end,
                step,
                block,
                loc,
            } => {
                let control_ty = decl.ty.clone();
                let cty = c_type(&control_ty);
                writeln!(out, "{{")?;
                let start_value = self.emit_exp(out, start)?;
                let start_temp = self.fresh_temp();
                writeln!(out, "{} {} = {};", cty, start_temp, start_value)?;
                let limit_value = self.emit_exp(out, end)?;
                let limit_temp = self.fresh_temp();
                writeln!(out, "{} {} = {};", cty, limit_temp, limit_value)?;
                let step_exp = step.as_ref().ok_or_else(|| {
                    CodeGenError::UncheckedNode("for loop without a checked step".to_string())
                })?;
                let step_value = self.emit_exp(out, step_exp)?;
                let step_temp = self.fresh_temp();
                writeln!(out, "{} {} = {};", cty, step_temp, step_value)?;

                // The comparison direction follows the step's sign; a
                // constant-folded step fixes it at compile time.
                let control = format!("_for_{}", decl.id);
                self.local_names.insert(decl.id, control.clone());
                let test = match constant_step_sign(step_exp) {
                    Some(true) => format!("{} <= {}", control, limit_temp),
                    Some(false) => format!("{} >= {}", control, limit_temp),
                    None => {
                        writeln!(out, "if ({} == 0)", step_temp)?;
                        writeln!(
                            out,
                            "luaL_error(L, \"'for' step is zero at line %d\", {});",
                            loc.line
                        )?;
                        format!(
                            "({} > 0 ? {} <= {} : {} >= {})",
                            step_temp, control, limit_temp, control, limit_temp
                        )
                    }
                };
                let advance = if control_ty == Type::Integer {
                    format!(
                        "{} = (lua_Integer)((lua_Unsigned){} + (lua_Unsigned){})",
                        control, control, step_temp
                    )
                } else {
                    format!("{} = {} + {}", control, control, step_temp)
                };
                writeln!(out, "{} {} = {};", cty, control, start_temp)?;
                writeln!(out, "for (; {}; {}) {{", test, advance)?;
                for s in &block.stats {
                    self.emit_stat(out, s)?;
                }
                writeln!(out, "}}")?;
                writeln!(out, "}}")?;
                Ok(())
            }
            Stat::Decl { decls, exps, .. } => {
                let mut values = Vec::with_capacity(exps.len());
                for exp in exps {
                    values.push((self.emit_exp(out, exp)?, exp.ty.clone()));
                }
                for (decl, (value, _ty)) in decls.iter().zip(values.iter()) {
                    self.emit_declare_local(out, decl.id, &decl.name, &decl.ty, value)?;
                }
                Ok(())
            }
            Stat::Assign { vars, exps, .. } => {
                // Evaluate the whole right side before any store, so
                // `a, b = b, a` swaps.
                let mut values = Vec::with_capacity(exps.len());
                for exp in exps {
                    values.push((self.emit_exp(out, exp)?, exp.ty.clone()));
                }
                for (var, (value, ty)) in vars.iter().zip(values.iter()) {
                    self.emit_store_var(out, var, ty, value)?;
                }
                Ok(())
            }
            Stat::Call { call, .. } => {
                self.emit_exp(out, call)?;
                Ok(())
            }
            Stat::Return { exps, .. } => self.emit_return(out, exps),
            Stat::Break { .. } => {
                writeln!(out, "break;")?;
                Ok(())
            }
        }
    }

    fn emit_if(
        &mut self,
        out: &mut String,
        clauses: &[IfClause],
        else_block: Option<&Block>,
    ) -> Result<(), CodeGenError> {
        let Some((first, rest)) = clauses.split_first() else {
            if let Some(block) = else_block {
                return self.emit_block(out, block);
            }
            return Ok(());
        };
        let test = self.emit_exp(out, &first.cond)?;
        writeln!(out, "if ({}) {{", test)?;
        for s in &first.block.stats {
            self.emit_stat(out, s)?;
        }
        if rest.is_empty() && else_block.is_none() {
            writeln!(out, "}}")?;
            return Ok(());
        }
        writeln!(out, "}} else {{")?;
        self.emit_if(out, rest, else_block)?;
        writeln!(out, "}}")?;
        Ok(())
    }

    fn emit_return(&mut self, out: &mut String, exps: &[Exp]) -> Result<(), CodeGenError> {
        let rets = self.func_rets.clone();
        if rets.is_empty() {
            writeln!(out, "luaC_checkGC(L);")?;
            writeln!(out, "L->top = _base;")?;
            writeln!(out, "return;")?;
            return Ok(());
        }

        let first = exps
            .first()
            .map(|exp| self.emit_exp(out, exp))
            .transpose()?
            .unwrap_or_else(|| "0".to_string());

        // Extra return values flow out through the caller's out-pointers.
        for (i, exp) in exps.iter().enumerate().skip(1) {
            let value = self.emit_exp(out, exp)?;
            if is_tvalue(&exp.ty) {
                writeln!(out, "setobj(L, _out{}, &{});", i, value)?;
            } else {
                writeln!(out, "*_out{} = {};", i, value)?;
            }
        }

        // The result is still anchored in this frame's slots across the
        // collection check; the caller re-anchors it before any further
        // allocation.
        writeln!(out, "luaC_checkGC(L);")?;
        writeln!(out, "L->top = _base;")?;
        writeln!(out, "return {};", first)?;
        Ok(())
    }
}

/// The sign of a constant-folded numeric step, if the syntax expresses
/// one (including folded unary minus). `None` means runtime-directed.
fn constant_step_sign(step: &Exp) -> Option<bool> {
    match unwrap_casts(step) {
        ExpKind::Integer(n) if *n != 0 => Some(*n > 0),
        ExpKind::Float(x) if *x != 0.0 => Some(*x > 0.0),
        _ => None,
    }
}

/// Checker-inserted casts on a literal step keep it a constant.
fn unwrap_casts(exp: &Exp) -> &ExpKind {
    match &exp.kind {
        ExpKind::Cast { exp: inner, .. } => unwrap_casts(inner),
        kind => kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Location;

    fn int_exp(n: i64) -> Exp {
        Exp::new(ExpKind::Integer(n), Location::new(1, 1))
    }

    #[test]
    fn test_constant_step_sign() {
        assert_eq!(constant_step_sign(&int_exp(1)), Some(true));
        assert_eq!(constant_step_sign(&int_exp(-2)), Some(false));
        assert_eq!(constant_step_sign(&int_exp(0)), None);
        let float_step = Exp::new(ExpKind::Float(-0.5), Location::new(1, 1));
        assert_eq!(constant_step_sign(&float_step), Some(false));
    }

    #[test]
    fn test_cast_wrapped_step_is_still_constant() {
        let wrapped = int_exp(2).coerce_to(Type::Float);
        assert_eq!(constant_step_sign(&wrapped), Some(true));
    }
}
