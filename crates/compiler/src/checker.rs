//! Type checker for Titan
//!
//! Two passes over a module. Pass 1 collects top-level declarations:
//! duplicate detection, declared-type resolution, record registration,
//! import loading through the pluggable loader. Pass 2 checks function
//! bodies and variable initializers.
//!
//! The checker annotates the AST in place: every expression gets a
//! resolved type, implicit conversions become explicit `Cast` wrappers so
//! the code generator only ever sees homogeneous operands, and name
//! references point back to their declarations. Diagnostics accumulate;
//! nodes that fail are annotated `Invalid` so later passes never crash,
//! and a module with any diagnostic is not emitted.

use crate::ast::{
    Binop, Block, Call, CallKind, Decl, Diagnostic, DotRef, Exp, ExpKind, IfClause, InitField,
    Location, NameRef, Program, Stat, TopLevel, TypeSyntax, Unop, Var,
};
use crate::loader::Loader;
use crate::symbols::{Symbol, SymbolTable};
use crate::types::{FunctionType, RecordType, Session, Type};

/// Check a whole module, annotating the AST. Returns the accumulated
/// diagnostics; an empty list means the module may be emitted.
pub fn check_program(
    program: &mut Program,
    session: &mut Session,
    loader: &mut dyn Loader,
) -> Vec<Diagnostic> {
    let mut checker = Checker {
        session,
        loader,
        symbols: SymbolTable::new(program.module_name.clone()),
        filename: program.filename.clone(),
        diagnostics: Vec::new(),
        ret_types: Vec::new(),
        loop_depth: 0,
    };
    checker.reorder(&mut program.items);
    checker.collect_toplevel(&mut program.items);
    checker.check_bodies(&mut program.items);
    checker.diagnostics
}

struct Checker<'a> {
    session: &'a mut Session,
    loader: &'a mut dyn Loader,
    symbols: SymbolTable,
    filename: String,
    diagnostics: Vec<Diagnostic>,
    /// Return types of the function currently being checked.
    ret_types: Vec<Type>,
    loop_depth: usize,
}

impl<'a> Checker<'a> {
    fn err(&mut self, loc: Location, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::new(self.filename.clone(), loc, message));
    }

    /// Top-level forms may appear in any order in the source; checking and
    /// emission want imports before variables before functions, with
    /// records in between so their names exist when signatures resolve.
    fn reorder(&self, items: &mut [TopLevel]) {
        items.sort_by_key(|item| match item {
            TopLevel::Import(_) | TopLevel::ForeignImport(_) => 0,
            TopLevel::Record(_) => 1,
            TopLevel::Var(_) => 2,
            TopLevel::Func(_) => 3,
        });
    }

    // ------------------------------------------------------------------
    // Pass 1: collect top-level declarations
    // ------------------------------------------------------------------

    fn collect_toplevel(&mut self, items: &mut Vec<TopLevel>) {
        // Record names go in first so record fields and signatures can
        // refer to records declared later in the file (or to each other).
        for item in items.iter() {
            if let TopLevel::Record(r) = item {
                if self.symbols.find_dup(&r.name).is_some() {
                    self.err(
                        r.loc,
                        format!("duplicate top-level declaration for '{}'", r.name),
                    );
                    continue;
                }
                let fqtn = self.symbols.fqtn(&r.name);
                self.symbols.add(
                    r.name.clone(),
                    Symbol::Type {
                        decl: r.id,
                        ty: Type::TypeOf(Box::new(Type::Nominal(fqtn))),
                    },
                );
            }
        }

        for item in items.iter_mut() {
            match item {
                TopLevel::Import(import) => {
                    if self.duplicate(&import.local_name, import.loc) {
                        continue;
                    }
                    match self.loader.load(self.session, &import.module) {
                        Ok(module) => {
                            import.ty = Type::Module(module);
                        }
                        Err(diags) => {
                            // Loader failures surface as a single
                            // diagnostic attached to the import site.
                            let reason = diags
                                .first()
                                .map(|d| d.message.clone())
                                .unwrap_or_else(|| "unknown error".to_string());
                            self.err(import.loc, reason);
                            import.ty = Type::Invalid;
                        }
                    }
                    self.symbols.add(
                        import.local_name.clone(),
                        Symbol::Module {
                            decl: import.id,
                            ty: import.ty.clone(),
                        },
                    );
                }
                TopLevel::ForeignImport(import) => {
                    if self.duplicate(&import.local_name, import.loc) {
                        continue;
                    }
                    import.ty = Type::ForeignModule(import.header.clone());
                    self.symbols.add_foreign_type(
                        import.local_name.clone(),
                        import.ty.clone(),
                    );
                    self.symbols.add(
                        import.local_name.clone(),
                        Symbol::Foreign {
                            decl: import.id,
                            ty: import.ty.clone(),
                        },
                    );
                }
                TopLevel::Record(record) => {
                    let fqtn = self.symbols.fqtn(&record.name);
                    let mut fields: Vec<(String, Type)> = Vec::new();
                    for field in &record.fields {
                        if fields.iter().any(|(name, _)| *name == field.name) {
                            self.err(
                                field.loc,
                                format!(
                                    "duplicate field '{}' in record '{}'",
                                    field.name, record.name
                                ),
                            );
                            continue;
                        }
                        let ty = self.resolve_type(&field.syntax);
                        if ty == Type::Nil {
                            self.err(
                                field.loc,
                                format!("record field '{}' cannot have type nil", field.name),
                            );
                        }
                        fields.push((field.name.clone(), ty));
                    }
                    self.session.add_record(RecordType { fqtn, fields });
                }
                TopLevel::Var(var) => {
                    if self.duplicate(&var.decl.name, var.loc) {
                        continue;
                    }
                    var.decl.ty = match &var.decl.syntax {
                        Some(syntax) => {
                            let syntax = syntax.clone();
                            self.resolve_type(&syntax)
                        }
                        // Unannotated variables take the type of their
                        // literal initializer; anything else is reported
                        // in pass 2.
                        None => literal_type(&var.value.kind),
                    };
                    self.symbols.add(
                        var.decl.name.clone(),
                        Symbol::GlobalVar {
                            decl: var.id,
                            ty: var.decl.ty.clone(),
                        },
                    );
                }
                TopLevel::Func(func) => {
                    if self.duplicate(&func.name, func.loc) {
                        continue;
                    }
                    let mut params = Vec::new();
                    for param in &mut func.params {
                        param.ty = match &param.syntax {
                            Some(syntax) => {
                                let syntax = syntax.clone();
                                self.resolve_type(&syntax)
                            }
                            None => {
                                self.err(
                                    param.loc,
                                    format!("parameter '{}' has no type annotation", param.name),
                                );
                                Type::Invalid
                            }
                        };
                        params.push(param.ty.clone());
                    }
                    let rets: Vec<Type> = func
                        .ret_syntax
                        .clone()
                        .iter()
                        .map(|syntax| self.resolve_type(syntax))
                        .collect();
                    func.ty = Type::Function(FunctionType::new(params, rets));
                    self.symbols.add(
                        func.name.clone(),
                        Symbol::GlobalFunc {
                            decl: func.id,
                            ty: func.ty.clone(),
                        },
                    );
                }
            }
        }
    }

    /// Report and swallow a duplicate top-level name.
    fn duplicate(&mut self, name: &str, loc: Location) -> bool {
        if self.symbols.find_dup(name).is_some() {
            self.err(loc, format!("duplicate top-level declaration for '{}'", name));
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Pass 2: function bodies and initializers
    // ------------------------------------------------------------------

    fn check_bodies(&mut self, items: &mut Vec<TopLevel>) {
        for item in items.iter_mut() {
            match item {
                TopLevel::Var(var) => {
                    let hint = if var.decl.syntax.is_some() {
                        Some(var.decl.ty.clone())
                    } else {
                        None
                    };
                    self.check_exp(&mut var.value, hint.as_ref());
                    if var.decl.syntax.is_none() {
                        var.decl.ty = var.value.ty.clone();
                    } else {
                        let target = var.decl.ty.clone();
                        self.coerce_or_err(&mut var.value, &target, "variable initializer");
                    }
                    if !is_constant_initializer(&var.value) {
                        self.err(
                            var.loc,
                            format!(
                                "initializer of top-level variable '{}' is not a constant",
                                var.decl.name
                            ),
                        );
                    }
                }
                TopLevel::Func(func) => {
                    let rets = match &func.ty {
                        Type::Function(ft) => ft.rets.clone(),
                        _ => Vec::new(),
                    };
                    self.ret_types = rets.clone();
                    self.symbols.open_scope();
                    for param in &func.params {
                        self.symbols.add(
                            param.name.clone(),
                            Symbol::Local {
                                decl: param.id,
                                ty: param.ty.clone(),
                            },
                        );
                    }
                    let always_returns = self.check_block(&mut func.block);
                    self.symbols.close_scope();

                    let must_return = !rets.is_empty() && rets != [Type::Nil];
                    if must_return && !always_returns {
                        self.err(
                            func.loc,
                            format!(
                                "function '{}' can reach the end of its body without returning",
                                func.name
                            ),
                        );
                    }
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Check a block in a fresh scope. Returns whether the block always
    /// returns: true iff some contained statement always returns.
    fn check_block(&mut self, block: &mut Block) -> bool {
        self.symbols.open_scope();
        let mut always = false;
        for stat in &mut block.stats {
            always |= self.check_stat(stat);
        }
        self.symbols.close_scope();
        always
    }

    fn check_stat(&mut self, stat: &mut Stat) -> bool {
        match stat {
            Stat::Block { block, .. } => self.check_block(block),
            Stat::While { cond, block, .. } => {
                self.check_cond(cond);
                self.loop_depth += 1;
                self.check_block(block);
                self.loop_depth -= 1;
                // A loop body may never run, so a loop never always-returns.
                false
            }
            Stat::Repeat { block, cond, .. } => {
                // The until condition sees the block's locals.
                self.symbols.open_scope();
                self.loop_depth += 1;
                for s in &mut block.stats {
                    self.check_stat(s);
                }
                self.check_cond(cond);
                self.loop_depth -= 1;
                self.symbols.close_scope();
                false
            }
            Stat::If {
                clauses,
                else_block,
                ..
            } => {
                let mut all_return = true;
                for IfClause { cond, block, .. } in clauses.iter_mut() {
                    self.check_cond(cond);
                    all_return &= self.check_block(block);
                }
                match else_block {
                    Some(block) => all_return &= self.check_block(block),
                    None => all_return = false,
                }
                all_return
            }
            Stat::For {
                decl,
                start,
                end,
                step,
                block,
                ..
            } => {
                self.check_for(decl, start, end, step, block);
                false
            }
            Stat::Decl { decls, exps, loc } => {
                self.check_local_decl(decls, exps, *loc);
                false
            }
            Stat::Assign { vars, exps, loc } => {
                self.check_assign(vars, exps, *loc);
                false
            }
            Stat::Call { call, .. } => {
                self.check_exp(call, None);
                false
            }
            Stat::Return { exps, loc } => {
                let targets = self.ret_types.clone();
                if targets.is_empty() || targets == [Type::Nil] {
                    if !exps.is_empty() {
                        let loc = *loc;
                        self.err(loc, "this function returns no values");
                    }
                } else {
                    self.check_exp_list(exps, &targets, "return", *loc);
                }
                true
            }
            Stat::Break { loc } => {
                if self.loop_depth == 0 {
                    let loc = *loc;
                    self.err(loc, "'break' outside a loop");
                }
                false
            }
        }
    }

    fn check_cond(&mut self, cond: &mut Exp) {
        self.check_exp(cond, None);
        // Conditions follow Lua truthiness: only nil and false are false.
        self.coerce_or_err(cond, &Type::Boolean, "condition");
    }

    fn check_for(
        &mut self,
        decl: &mut Decl,
        start: &mut Exp,
        end: &mut Exp,
        step: &mut Option<Exp>,
        block: &mut Block,
    ) {
        let hint = decl.syntax.clone().map(|syntax| self.resolve_type(&syntax));
        self.check_exp(start, hint.as_ref());

        let control = match &hint {
            Some(ty) => ty.clone(),
            None => start.ty.clone(),
        };
        let control = match control {
            Type::Integer | Type::Float => control,
            Type::Invalid => Type::Invalid,
            other => {
                self.err(
                    decl.loc,
                    format!("'for' control variable must be integer or float, found {}", other),
                );
                Type::Invalid
            }
        };
        decl.ty = control.clone();

        if control != Type::Invalid {
            self.coerce_or_err(start, &control, "numeric for start");
        }
        self.check_exp(end, Some(&control));
        if control != Type::Invalid {
            self.coerce_or_err(end, &control, "numeric for limit");
        }
        match step {
            Some(exp) => {
                self.check_exp(exp, Some(&control));
                if control != Type::Invalid {
                    self.coerce_or_err(exp, &control, "numeric for step");
                }
            }
            None => {
                // The implicit step is an explicit literal 1, matching the
                // control variable's numeric type.
                let mut one = if control == Type::Float {
                    Exp::new(ExpKind::Float(1.0), decl.loc)
                } else {
                    Exp::new(ExpKind::Integer(1), decl.loc)
                };
                one.ty = if control == Type::Invalid {
                    Type::Integer
                } else {
                    control.clone()
                };
                *step = Some(one);
            }
        }

        self.symbols.open_scope();
        self.symbols.add(
            decl.name.clone(),
            Symbol::Local {
                decl: decl.id,
                ty: decl.ty.clone(),
            },
        );
        self.loop_depth += 1;
        for s in &mut block.stats {
            self.check_stat(s);
        }
        self.loop_depth -= 1;
        self.symbols.close_scope();
    }

    fn check_local_decl(&mut self, decls: &mut [Decl], exps: &mut Vec<Exp>, loc: Location) {
        // Resolve declared types first so they can serve as hints.
        for decl in decls.iter_mut() {
            if let Some(syntax) = decl.syntax.clone() {
                decl.ty = self.resolve_type(&syntax);
            }
        }
        for (i, exp) in exps.iter_mut().enumerate() {
            let hint = decls
                .get(i)
                .filter(|d| d.syntax.is_some())
                .map(|d| d.ty.clone());
            self.check_exp(exp, hint.as_ref());
        }
        expand_extras(exps, decls.len());
        if exps.len() != decls.len() {
            self.err(
                loc,
                format!(
                    "declaration of {} names but {} values",
                    decls.len(),
                    exps.len()
                ),
            );
        }
        for (i, decl) in decls.iter_mut().enumerate() {
            if let Some(exp) = exps.get_mut(i) {
                if decl.syntax.is_some() {
                    let target = decl.ty.clone();
                    self.coerce_or_err(exp, &target, "declaration");
                } else {
                    decl.ty = exp.ty.clone();
                }
            } else if decl.syntax.is_none() {
                decl.ty = Type::Invalid;
            }
            // Modules, record names and other compile-time-only things
            // cannot be stored in a variable.
            if decl.ty != Type::Invalid && !decl.ty.is_first_class() {
                let loc = decl.loc;
                let ty = decl.ty.clone();
                self.err(loc, format!("cannot declare a variable of type {}", ty));
                decl.ty = Type::Invalid;
            }
            self.symbols.add(
                decl.name.clone(),
                Symbol::Local {
                    decl: decl.id,
                    ty: decl.ty.clone(),
                },
            );
        }
    }

    fn check_assign(&mut self, vars: &mut [Var], exps: &mut Vec<Exp>, loc: Location) {
        let mut targets = Vec::new();
        for var in vars.iter_mut() {
            targets.push(self.check_var(var, true));
        }
        for (i, exp) in exps.iter_mut().enumerate() {
            let hint = targets.get(i).cloned();
            self.check_exp(exp, hint.as_ref());
        }
        expand_extras(exps, targets.len());
        if exps.len() != targets.len() {
            self.err(
                loc,
                format!(
                    "assignment to {} names but {} values",
                    targets.len(),
                    exps.len()
                ),
            );
        }
        for (i, var) in vars.iter().enumerate() {
            let Some(exp) = exps.get_mut(i) else { continue };
            let target = targets[i].clone();
            // Writing nil into an array or map slot deletes the entry.
            let deletes = matches!(var, Var::Bracket { .. }) && exp.ty == Type::Nil;
            if !deletes {
                self.coerce_or_err(exp, &target, "assignment");
            }
        }
    }

    /// Check a right-hand-side list against a list of expected types,
    /// expanding a trailing multi-valued call and coercing element-wise.
    fn check_exp_list(
        &mut self,
        exps: &mut Vec<Exp>,
        targets: &[Type],
        what: &str,
        loc: Location,
    ) {
        for (i, exp) in exps.iter_mut().enumerate() {
            let hint = targets.get(i).cloned();
            self.check_exp(exp, hint.as_ref());
        }
        expand_extras(exps, targets.len());
        if exps.len() != targets.len() {
            self.err(
                loc,
                format!(
                    "{} expects {} values but got {}",
                    what,
                    targets.len(),
                    exps.len()
                ),
            );
        }
        for (i, target) in targets.iter().enumerate() {
            if let Some(exp) = exps.get_mut(i) {
                let target = target.clone();
                self.coerce_or_err(exp, &target, what);
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn check_exp(&mut self, exp: &mut Exp, hint: Option<&Type>) {
        let loc = exp.loc;
        let ty = match &mut exp.kind {
            ExpKind::Nil => Type::Nil,
            ExpKind::Bool(_) => Type::Boolean,
            ExpKind::Integer(_) => Type::Integer,
            ExpKind::Float(_) => Type::Float,
            ExpKind::Str(_) => Type::String,
            ExpKind::InitList(fields) => {
                let mut fields = std::mem::take(fields);
                let ty = self.check_init_list(&mut fields, hint, loc);
                if let ExpKind::InitList(slot) = &mut exp.kind {
                    *slot = fields;
                }
                ty
            }
            ExpKind::Var(var) => {
                let mut var = var.clone();
                let ty = self.check_var(&mut var, false);
                if let ExpKind::Var(slot) = &mut exp.kind {
                    *slot = var;
                }
                ty
            }
            ExpKind::Unop(op, operand) => {
                let op = *op;
                let mut operand = std::mem::replace(operand.as_mut(), Exp::new(ExpKind::Nil, loc));
                let ty = self.check_unop(op, &mut operand, loc);
                if let ExpKind::Unop(_, slot) = &mut exp.kind {
                    **slot = operand;
                }
                ty
            }
            ExpKind::Binop(op, lhs, rhs) => {
                let op = *op;
                let mut lhs = std::mem::replace(lhs.as_mut(), Exp::new(ExpKind::Nil, loc));
                let mut rhs = std::mem::replace(rhs.as_mut(), Exp::new(ExpKind::Nil, loc));
                let ty = self.check_binop(op, &mut lhs, &mut rhs, loc);
                if let ExpKind::Binop(_, lslot, rslot) = &mut exp.kind {
                    **lslot = lhs;
                    **rslot = rhs;
                }
                ty
            }
            ExpKind::Concat(operands) => {
                let mut operands = std::mem::take(operands);
                for operand in operands.iter_mut() {
                    self.check_exp(operand, None);
                    match operand.ty.clone() {
                        Type::String => {}
                        Type::Integer | Type::Float => wrap_cast(operand, Type::String),
                        Type::Invalid => {}
                        other => self.err(
                            operand.loc,
                            format!("cannot concatenate a value of type {}", other),
                        ),
                    }
                }
                if let ExpKind::Concat(slot) = &mut exp.kind {
                    *slot = operands;
                }
                Type::String
            }
            ExpKind::Call(_) => {
                let ty = self.check_call(exp);
                exp.ty = ty.clone();
                return;
            }
            ExpKind::Cast { exp: inner, syntax } => {
                let syntax = syntax.clone();
                let mut inner =
                    std::mem::replace(inner.as_mut(), Exp::new(ExpKind::Nil, loc));
                self.check_exp(&mut inner, None);
                let target = match &syntax {
                    Some(syntax) => self.resolve_type(syntax),
                    // Checker-inserted casts never re-enter checking.
                    None => inner.ty.clone(),
                };
                if !cast_coerceable(&inner.ty, &target) {
                    self.err(
                        loc,
                        format!("cannot cast a value of type {} to {}", inner.ty, target),
                    );
                }
                if let ExpKind::Cast { exp: slot, .. } = &mut exp.kind {
                    **slot = inner;
                }
                target
            }
            ExpKind::Adjust(inner) => {
                let mut inner =
                    std::mem::replace(inner.as_mut(), Exp::new(ExpKind::Nil, loc));
                self.check_exp(&mut inner, hint);
                let ty = inner.ty.clone();
                if let ExpKind::Adjust(slot) = &mut exp.kind {
                    **slot = inner;
                }
                ty
            }
            // Extra nodes are created by the checker with their type set.
            ExpKind::Extra { .. } => exp.ty.clone(),
        };
        exp.ty = ty;
    }

    fn check_init_list(
        &mut self,
        fields: &mut [InitField],
        hint: Option<&Type>,
        loc: Location,
    ) -> Type {
        match hint {
            Some(Type::Option(base)) => {
                let base = base.as_ref().clone();
                self.check_init_list(fields, Some(&base), loc)
            }
            Some(Type::Array(elem)) => {
                let elem = elem.as_ref().clone();
                for field in fields.iter_mut() {
                    if field.name.is_some() {
                        self.err(field.loc, "array initializer cannot have named fields");
                    }
                    self.check_exp(&mut field.exp, Some(&elem));
                    self.coerce_or_err(&mut field.exp, &elem, "array initializer");
                }
                Type::Array(Box::new(elem))
            }
            Some(Type::Map(key, value)) => {
                if !fields.is_empty() {
                    self.err(loc, "map initializers must be empty");
                }
                Type::Map(key.clone(), value.clone())
            }
            Some(Type::Nominal(fqtn)) => {
                let fqtn = fqtn.clone();
                let Some(record) = self.session.record(&fqtn).cloned() else {
                    self.err(loc, format!("type '{}' is not declared", fqtn));
                    return Type::Invalid;
                };
                let mut seen: Vec<String> = Vec::new();
                for field in fields.iter_mut() {
                    let Some(name) = field.name.clone() else {
                        self.err(field.loc, "record initializer cannot have an array part");
                        self.check_exp(&mut field.exp, None);
                        continue;
                    };
                    if seen.contains(&name) {
                        self.err(
                            field.loc,
                            format!("duplicate field '{}' in record initializer", name),
                        );
                        continue;
                    }
                    match record.field(&name).cloned() {
                        Some(field_ty) => {
                            self.check_exp(&mut field.exp, Some(&field_ty));
                            self.coerce_or_err(&mut field.exp, &field_ty, "record initializer");
                            seen.push(name);
                        }
                        None => {
                            self.err(
                                field.loc,
                                format!(
                                    "record '{}' has no field '{}'",
                                    record.short_name(),
                                    name
                                ),
                            );
                            self.check_exp(&mut field.exp, None);
                        }
                    }
                }
                // Missing fields are reported individually.
                for (name, _) in &record.fields {
                    if !seen.contains(name) {
                        self.err(
                            loc,
                            format!("missing field '{}' in record initializer", name),
                        );
                    }
                }
                Type::Nominal(fqtn)
            }
            Some(Type::Invalid) => {
                for field in fields.iter_mut() {
                    self.check_exp(&mut field.exp, None);
                }
                Type::Invalid
            }
            _ => {
                self.err(
                    loc,
                    "initializer lists need an array or record type from context",
                );
                for field in fields.iter_mut() {
                    self.check_exp(&mut field.exp, None);
                }
                Type::Invalid
            }
        }
    }

    fn check_unop(&mut self, op: Unop, operand: &mut Exp, loc: Location) -> Type {
        self.check_exp(operand, None);
        let ty = operand.ty.clone();
        match op {
            Unop::Neg => match ty {
                Type::Integer | Type::Float => ty,
                Type::Invalid => Type::Invalid,
                other => {
                    self.err(loc, format!("cannot negate a value of type {}", other));
                    Type::Invalid
                }
            },
            Unop::Not => {
                self.coerce_or_err(operand, &Type::Boolean, "'not' operand");
                Type::Boolean
            }
            Unop::Len => match ty {
                Type::Array(_) | Type::String => Type::Integer,
                Type::Invalid => Type::Invalid,
                other => {
                    self.err(
                        loc,
                        format!("the length operator expects an array or string, found {}", other),
                    );
                    Type::Invalid
                }
            },
            Unop::BNot => match ty {
                Type::Integer => Type::Integer,
                Type::Float => {
                    wrap_cast(operand, Type::Integer);
                    Type::Integer
                }
                Type::Invalid => Type::Invalid,
                other => {
                    self.err(
                        loc,
                        format!("bitwise operators expect integers, found {}", other),
                    );
                    Type::Invalid
                }
            },
        }
    }

    fn check_binop(&mut self, op: Binop, lhs: &mut Exp, rhs: &mut Exp, loc: Location) -> Type {
        self.check_exp(lhs, None);
        self.check_exp(rhs, None);
        let lt = lhs.ty.clone();
        let rt = rhs.ty.clone();
        if lt == Type::Invalid || rt == Type::Invalid {
            return Type::Invalid;
        }

        match op {
            Binop::Add | Binop::Sub | Binop::Mul | Binop::Mod | Binop::IDiv => {
                match (&lt, &rt) {
                    (Type::Integer, Type::Integer) => Type::Integer,
                    (Type::Integer, Type::Float) => {
                        wrap_cast(lhs, Type::Float);
                        Type::Float
                    }
                    (Type::Float, Type::Integer) => {
                        wrap_cast(rhs, Type::Float);
                        Type::Float
                    }
                    (Type::Float, Type::Float) => Type::Float,
                    _ => {
                        self.arith_error(op, &lt, &rt, loc);
                        Type::Invalid
                    }
                }
            }
            Binop::Div | Binop::Pow => {
                if lt.is_numeric() && rt.is_numeric() {
                    if lt == Type::Integer {
                        wrap_cast(lhs, Type::Float);
                    }
                    if rt == Type::Integer {
                        wrap_cast(rhs, Type::Float);
                    }
                    Type::Float
                } else {
                    self.arith_error(op, &lt, &rt, loc);
                    Type::Invalid
                }
            }
            Binop::BAnd | Binop::BOr | Binop::BXor | Binop::Shl | Binop::Shr => {
                if lt.is_numeric() && rt.is_numeric() {
                    if lt == Type::Float {
                        wrap_cast(lhs, Type::Integer);
                    }
                    if rt == Type::Float {
                        wrap_cast(rhs, Type::Integer);
                    }
                    Type::Integer
                } else {
                    self.err(
                        loc,
                        format!(
                            "bitwise '{}' expects integers, found {} and {}",
                            op, lt, rt
                        ),
                    );
                    Type::Invalid
                }
            }
            Binop::Eq | Binop::Ne => {
                if self.unify_operands(lhs, rhs).is_none() {
                    let (lt, rt) = (lhs.ty.clone(), rhs.ty.clone());
                    self.err(
                        loc,
                        format!("cannot compare values of types {} and {}", lt, rt),
                    );
                }
                Type::Boolean
            }
            Binop::Lt | Binop::Gt | Binop::Le | Binop::Ge => {
                match (&lt, &rt) {
                    (Type::Integer, Type::Integer)
                    | (Type::Float, Type::Float)
                    | (Type::String, Type::String) => Type::Boolean,
                    // Mixed numeric ordering promotes the integer side.
                    (Type::Integer, Type::Float) => {
                        wrap_cast(lhs, Type::Float);
                        Type::Boolean
                    }
                    (Type::Float, Type::Integer) => {
                        wrap_cast(rhs, Type::Float);
                        Type::Boolean
                    }
                    _ => {
                        self.err(
                            loc,
                            format!("cannot order values of types {} and {}", lt, rt),
                        );
                        Type::Invalid
                    }
                }
            }
            Binop::And | Binop::Or => {
                if lt == Type::Boolean || rt == Type::Boolean {
                    self.coerce_or_err(lhs, &Type::Boolean, "'and'/'or' operand");
                    self.coerce_or_err(rhs, &Type::Boolean, "'and'/'or' operand");
                    Type::Boolean
                } else {
                    match self.unify_operands(lhs, rhs) {
                        Some(common) => common,
                        None => {
                            let (lt, rt) = (lhs.ty.clone(), rhs.ty.clone());
                            self.err(
                                loc,
                                format!(
                                    "'{}' on incompatible types {} and {}",
                                    op, lt, rt
                                ),
                            );
                            Type::Invalid
                        }
                    }
                }
            }
        }
    }

    /// Coerce two operands to a common type when the pair is compatible:
    /// equal types, a `value` on either side, mixed integer/float, or an
    /// option against its base or nil. Returns the common type.
    fn unify_operands(&mut self, lhs: &mut Exp, rhs: &mut Exp) -> Option<Type> {
        let lt = lhs.ty.clone();
        let rt = rhs.ty.clone();
        if lt == rt {
            return Some(lt);
        }
        match (&lt, &rt) {
            (Type::Value, _) => {
                wrap_cast(rhs, Type::Value);
                Some(Type::Value)
            }
            (_, Type::Value) => {
                wrap_cast(lhs, Type::Value);
                Some(Type::Value)
            }
            (Type::Integer, Type::Float) => {
                wrap_cast(lhs, Type::Float);
                Some(Type::Float)
            }
            (Type::Float, Type::Integer) => {
                wrap_cast(rhs, Type::Float);
                Some(Type::Float)
            }
            (Type::Nil, Type::Option(_)) => {
                wrap_cast(lhs, rt.clone());
                Some(rt)
            }
            (Type::Option(_), Type::Nil) => {
                wrap_cast(rhs, lt.clone());
                Some(lt)
            }
            (Type::Option(base), _) if base.as_ref() == &rt => {
                wrap_cast(rhs, lt.clone());
                Some(lt)
            }
            (_, Type::Option(base)) if base.as_ref() == &lt => {
                wrap_cast(lhs, rt.clone());
                Some(rt)
            }
            (Type::Nil, _) => {
                let option = Type::Option(Box::new(rt));
                wrap_cast(lhs, option.clone());
                wrap_cast(rhs, option.clone());
                Some(option)
            }
            (_, Type::Nil) => {
                let option = Type::Option(Box::new(lt));
                wrap_cast(lhs, option.clone());
                wrap_cast(rhs, option.clone());
                Some(option)
            }
            _ => None,
        }
    }

    fn arith_error(&mut self, op: Binop, lt: &Type, rt: &Type, loc: Location) {
        self.err(
            loc,
            format!("arithmetic '{}' on values of types {} and {}", op, lt, rt),
        );
    }

    fn check_call(&mut self, exp: &mut Exp) -> Type {
        let loc = exp.loc;
        let ExpKind::Call(call) = &mut exp.kind else {
            unreachable!("check_call on a non-call node");
        };
        let mut call_owned = std::mem::replace(
            call,
            Call {
                kind: CallKind::Function {
                    func: Box::new(Exp::new(ExpKind::Nil, loc)),
                },
                args: Vec::new(),
                loc,
                result_types: Vec::new(),
            },
        );
        let ty = self.check_call_inner(&mut call_owned, loc);
        if let ExpKind::Call(slot) = &mut exp.kind {
            *slot = call_owned;
        }
        ty
    }

    fn check_call_inner(&mut self, call: &mut Call, loc: Location) -> Type {
        match &mut call.kind {
            CallKind::Function { func } => {
                self.check_exp(func, None);
                match func.ty.clone() {
                    Type::Function(ft) => {
                        self.check_exp_list(&mut call.args, &ft.params, "call", loc);
                        call.result_types = ft.rets.clone();
                        ft.rets.first().cloned().unwrap_or(Type::Nil)
                    }
                    Type::TypeOf(_) => {
                        self.err(loc, "record types are not callable; use '.new'");
                        Type::Invalid
                    }
                    Type::Invalid => {
                        for arg in call.args.iter_mut() {
                            self.check_exp(arg, None);
                        }
                        Type::Invalid
                    }
                    other => {
                        self.err(loc, format!("cannot call a value of type {}", other));
                        for arg in call.args.iter_mut() {
                            self.check_exp(arg, None);
                        }
                        Type::Invalid
                    }
                }
            }
            CallKind::Method { exp: obj, name } => {
                let name = name.clone();
                self.check_exp(obj, None);
                if obj.ty != Type::Invalid {
                    let ty = obj.ty.clone();
                    self.err(
                        loc,
                        format!("value of type {} has no method '{}'", ty, name),
                    );
                }
                for arg in call.args.iter_mut() {
                    self.check_exp(arg, None);
                }
                Type::Invalid
            }
        }
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    fn check_var(&mut self, var: &mut Var, write: bool) -> Type {
        match var {
            Var::Name { name, loc, refkind } => {
                let loc = *loc;
                let name = name.clone();
                let Some(symbol) = self.symbols.find(&name).cloned() else {
                    self.err(loc, format!("variable '{}' is not declared", name));
                    return Type::Invalid;
                };
                *refkind = Some(match &symbol {
                    Symbol::Local { decl, .. } => NameRef::Local(*decl),
                    Symbol::GlobalVar { decl, .. } => NameRef::GlobalVar(*decl),
                    Symbol::GlobalFunc { decl, .. } => NameRef::GlobalFunc(*decl),
                    Symbol::Module { decl, .. } => NameRef::Module(*decl),
                    Symbol::Foreign { decl, .. } => NameRef::Foreign(*decl),
                    Symbol::Type { decl, .. } => NameRef::Type(*decl),
                });
                if write {
                    match &symbol {
                        Symbol::GlobalFunc { .. } => {
                            self.err(
                                loc,
                                format!(
                                    "attempting to assign to toplevel constant function {}",
                                    name
                                ),
                            );
                        }
                        Symbol::Module { .. } | Symbol::Foreign { .. } | Symbol::Type { .. } => {
                            self.err(loc, format!("cannot assign to '{}'", name));
                        }
                        _ => {}
                    }
                }
                symbol.ty().clone()
            }
            Var::Dot {
                exp,
                name,
                loc,
                refkind,
            } => {
                let loc = *loc;
                let name = name.clone();
                self.check_exp(exp, None);
                match exp.ty.clone() {
                    Type::Module(module) => {
                        let Some(member) = module.member(&name) else {
                            self.err(
                                loc,
                                format!("module '{}' has no member '{}'", module.name, name),
                            );
                            return Type::Invalid;
                        };
                        if write {
                            self.err(
                                loc,
                                format!(
                                    "cannot assign to member '{}' of imported module '{}'",
                                    name, module.name
                                ),
                            );
                        }
                        *refkind = Some(DotRef::ModuleMember {
                            module: module.name.clone(),
                            member: name,
                            slot: member.slot,
                        });
                        member.ty.clone()
                    }
                    Type::TypeOf(inner) => {
                        let Type::Nominal(fqtn) = inner.as_ref() else {
                            self.err(loc, format!("type {} has no members", inner));
                            return Type::Invalid;
                        };
                        if name != "new" {
                            self.err(
                                loc,
                                format!("type '{}' has no member '{}'", fqtn, name),
                            );
                            return Type::Invalid;
                        }
                        if write {
                            self.err(loc, "cannot assign to a record constructor");
                        }
                        self.resolve_constructor(fqtn, loc, refkind)
                    }
                    Type::Nominal(fqtn) => {
                        let Some(record) = self.session.record(&fqtn).cloned() else {
                            self.err(loc, format!("type '{}' is not declared", fqtn));
                            return Type::Invalid;
                        };
                        let Some(field_ty) = record.field(&name).cloned() else {
                            self.err(
                                loc,
                                format!(
                                    "record '{}' has no field '{}'",
                                    record.short_name(),
                                    name
                                ),
                            );
                            return Type::Invalid;
                        };
                        *refkind = Some(DotRef::RecordField { fqtn, field: name });
                        field_ty
                    }
                    Type::ForeignModule(header) => {
                        self.err(
                            loc,
                            format!(
                                "foreign module '{}' has no known member '{}'",
                                header, name
                            ),
                        );
                        Type::Invalid
                    }
                    Type::Invalid => Type::Invalid,
                    other => {
                        self.err(loc, format!("cannot index a value of type {}", other));
                        Type::Invalid
                    }
                }
            }
            Var::Bracket { array, index, loc } => {
                let loc = *loc;
                self.check_exp(array, None);
                self.check_exp(index, None);
                match array.ty.clone() {
                    Type::Array(elem) => {
                        self.coerce_or_err(index, &Type::Integer, "array index");
                        *elem
                    }
                    Type::Map(key, value) => {
                        let key = *key;
                        self.coerce_or_err(index, &key, "map key");
                        *value
                    }
                    Type::Invalid => Type::Invalid,
                    other => {
                        self.err(loc, format!("cannot index a value of type {}", other));
                        Type::Invalid
                    }
                }
            }
        }
    }

    /// Resolve `R.new` to its constructor function type, for records of
    /// this module (a synthesized top-level function) and imported ones
    /// (reconstructed from the registry shape and module member slot).
    fn resolve_constructor(
        &mut self,
        fqtn: &str,
        loc: Location,
        refkind: &mut Option<DotRef>,
    ) -> Type {
        let Some((module, short)) = fqtn.rsplit_once('.') else {
            self.err(loc, format!("type '{}' is not declared", fqtn));
            return Type::Invalid;
        };
        let Some(record) = self.session.record(fqtn).cloned() else {
            self.err(loc, format!("type '{}' is not declared", fqtn));
            return Type::Invalid;
        };
        let ctor_type = Type::Function(FunctionType::new(
            record.fields.iter().map(|(_, ty)| ty.clone()).collect(),
            vec![Type::Nominal(fqtn.to_string())],
        ));

        if module == self.symbols.module_name() {
            let ctor_name = format!("{}.new", short);
            match self.symbols.find(&ctor_name).cloned() {
                Some(Symbol::GlobalFunc { decl, ty }) => {
                    *refkind = Some(DotRef::Constructor {
                        fqtn: fqtn.to_string(),
                        decl,
                    });
                    ty
                }
                _ => {
                    self.err(loc, format!("type '{}' is not declared", fqtn));
                    Type::Invalid
                }
            }
        } else {
            let slot = match self.session.modules.get(module) {
                Some(crate::types::ModuleState::Loaded(mt)) => {
                    mt.member(short).map(|m| m.slot)
                }
                _ => None,
            };
            let Some(slot) = slot else {
                self.err(
                    loc,
                    format!("module '{}' has no member '{}'", module, short),
                );
                return Type::Invalid;
            };
            *refkind = Some(DotRef::ModuleMember {
                module: module.to_string(),
                member: format!("{}.new", short),
                slot,
            });
            ctor_type
        }
    }

    // ------------------------------------------------------------------
    // Types and coercions
    // ------------------------------------------------------------------

    fn resolve_type(&mut self, syntax: &TypeSyntax) -> Type {
        match syntax {
            TypeSyntax::Name { name, loc } => match name.as_str() {
                "nil" => Type::Nil,
                "boolean" => Type::Boolean,
                "integer" => Type::Integer,
                "float" => Type::Float,
                "string" => Type::String,
                "value" => Type::Value,
                other => match self.symbols.find(other).cloned() {
                    Some(Symbol::Type { ty, .. }) => match ty {
                        Type::TypeOf(inner) => *inner,
                        _ => Type::Invalid,
                    },
                    _ => match self.symbols.find_foreign_type(other).cloned() {
                        Some(ty) => ty,
                        None => {
                            let loc = *loc;
                            self.err(loc, format!("type '{}' is not declared", other));
                            Type::Invalid
                        }
                    },
                },
            },
            TypeSyntax::QualName { module, name, loc } => {
                let loc = *loc;
                match self.symbols.find(module).cloned() {
                    Some(Symbol::Module { ty: Type::Module(mt), .. }) => {
                        match mt.member(name).map(|m| m.ty.clone()) {
                            Some(Type::TypeOf(inner)) => *inner,
                            Some(_) => {
                                self.err(
                                    loc,
                                    format!("'{}.{}' is not a type", module, name),
                                );
                                Type::Invalid
                            }
                            None => {
                                self.err(
                                    loc,
                                    format!("module '{}' has no member '{}'", module, name),
                                );
                                Type::Invalid
                            }
                        }
                    }
                    _ => {
                        self.err(loc, format!("module '{}' is not imported", module));
                        Type::Invalid
                    }
                }
            }
            TypeSyntax::Array { elem, loc } => {
                let elem_ty = self.resolve_type(elem);
                if elem_ty == Type::Nil {
                    let loc = *loc;
                    self.err(loc, "arrays of nil are not allowed");
                    return Type::Invalid;
                }
                Type::Array(Box::new(elem_ty))
            }
            TypeSyntax::Map { key, value, .. } => {
                let key_ty = self.resolve_type(key);
                let value_ty = self.resolve_type(value);
                Type::Map(Box::new(key_ty), Box::new(value_ty))
            }
            TypeSyntax::Function { params, rets, .. } => {
                let params = params.iter().map(|p| self.resolve_type(p)).collect();
                let rets = rets.iter().map(|r| self.resolve_type(r)).collect();
                Type::Function(FunctionType::new(params, rets))
            }
            TypeSyntax::Option { base, .. } => {
                let base_ty = self.resolve_type(base);
                Type::Option(Box::new(base_ty))
            }
        }
    }

    fn coerce_or_err(&mut self, exp: &mut Exp, target: &Type, what: &str) {
        if !try_coerce(exp, target) {
            let found = exp.ty.clone();
            let loc = exp.loc;
            self.err(
                loc,
                format!("expected {} but found {} in {}", target, found, what),
            );
        }
    }
}

/// Implicit coercion graph: `Integer ↔ Float`, `T → Value`, `Value → T`
/// (runtime-checked), `T → Boolean` (truthiness), `T → Option(T)` and
/// `Nil → Option(T)`.
fn coerceable(from: &Type, to: &Type) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (Type::Integer, Type::Float) | (Type::Float, Type::Integer) => true,
        (f, Type::Value) => f.is_first_class() && *f != Type::Value,
        (Type::Value, t) => t.is_first_class(),
        (f, Type::Boolean) => f.is_first_class(),
        (f, Type::Option(base)) => f == base.as_ref() || *f == Type::Nil,
        _ => false,
    }
}

/// Explicit casts additionally allow option narrowing and number-to-string.
fn cast_coerceable(from: &Type, to: &Type) -> bool {
    if from == &Type::Invalid || to == &Type::Invalid {
        return true;
    }
    if coerceable(from, to) {
        return true;
    }
    match (from, to) {
        (Type::Option(base), t) => base.as_ref() == t,
        (Type::Integer | Type::Float, Type::String) => true,
        _ => false,
    }
}

/// Coerce `exp` to `target`, wrapping it in a cast node when the types
/// differ. Returns false when the coercion is not allowed.
fn try_coerce(exp: &mut Exp, target: &Type) -> bool {
    if exp.ty == *target || exp.ty == Type::Invalid || *target == Type::Invalid {
        return true;
    }
    if coerceable(&exp.ty, target) {
        wrap_cast(exp, target.clone());
        true
    } else {
        false
    }
}

fn wrap_cast(exp: &mut Exp, target: Type) {
    let loc = exp.loc;
    let inner = std::mem::replace(exp, Exp::new(ExpKind::Nil, loc));
    *exp = inner.coerce_to(target);
}

/// The type a literal initializer takes without an annotation; pass 1 uses
/// this so later declarations can reference the variable.
fn literal_type(kind: &ExpKind) -> Type {
    match kind {
        ExpKind::Nil => Type::Nil,
        ExpKind::Bool(_) => Type::Boolean,
        ExpKind::Integer(_) => Type::Integer,
        ExpKind::Float(_) => Type::Float,
        ExpKind::Str(_) => Type::String,
        _ => Type::Invalid,
    }
}

/// Top-level initializers must be evaluable at module load time: literals,
/// initializer lists of constants, and the coercions wrapped around them.
fn is_constant_initializer(exp: &Exp) -> bool {
    match &exp.kind {
        ExpKind::Nil
        | ExpKind::Bool(_)
        | ExpKind::Integer(_)
        | ExpKind::Float(_)
        | ExpKind::Str(_) => true,
        ExpKind::Cast { exp, .. } => is_constant_initializer(exp),
        ExpKind::InitList(fields) => fields.iter().all(|f| is_constant_initializer(&f.exp)),
        _ => false,
    }
}

/// When an expression list is shorter than its target list and ends in a
/// multi-valued call, the trailing call supplies all its values: extend the
/// list with `Extra` nodes extracting the 2nd, 3rd, … results.
fn expand_extras(exps: &mut Vec<Exp>, want: usize) {
    if exps.len() >= want {
        return;
    }
    let Some(last) = exps.last() else {
        return;
    };
    let results = match &last.kind {
        ExpKind::Call(call) => call.result_types.clone(),
        _ => return,
    };
    let loc = last.loc;
    let mut index = 1;
    while exps.len() < want && index < results.len() {
        let mut extra = Exp::new(ExpKind::Extra { index }, loc);
        extra.ty = results[index].clone();
        exps.push(extra);
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryLoader;

    fn check(source: &str) -> (Program, Vec<Diagnostic>) {
        check_with(source, InMemoryLoader::new())
    }

    fn check_with(source: &str, mut loader: InMemoryLoader) -> (Program, Vec<Diagnostic>) {
        let tokens = crate::lexer::lex(source).unwrap();
        let mut program = crate::parser::parse_program("test.titan", "test", tokens).unwrap();
        let mut session = Session::new();
        let diagnostics = check_program(&mut program, &mut session, &mut loader);
        (program, diagnostics)
    }

    fn first_message(source: &str) -> String {
        let (_, diagnostics) = check(source);
        assert!(!diagnostics.is_empty(), "expected a diagnostic");
        diagnostics[0].message.clone()
    }

    fn assert_clean(source: &str) -> Program {
        let (program, diagnostics) = check(source);
        assert!(
            diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            diagnostics
        );
        program
    }

    fn func_body<'p>(program: &'p Program, name: &str) -> &'p Block {
        &program.find_func(name).unwrap().block
    }

    #[test]
    fn test_undefined_variable() {
        let message = first_message("function f(): integer return x end");
        assert!(message.contains("'x' is not declared"), "got: {}", message);
    }

    #[test]
    fn test_arithmetic_typing() {
        let program = assert_clean(
            "function f(a: integer, b: float): float return a + b end",
        );
        let body = func_body(&program, "f");
        match &body.stats[0] {
            Stat::Return { exps, .. } => {
                assert_eq!(exps[0].ty, Type::Float);
                // The integer side was wrapped in a cast to float.
                match &exps[0].kind {
                    ExpKind::Binop(Binop::Add, lhs, _) => {
                        assert!(matches!(lhs.kind, ExpKind::Cast { .. }));
                        assert_eq!(lhs.ty, Type::Float);
                    }
                    other => panic!("expected binop, got {:?}", other),
                }
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_division_always_float() {
        let program = assert_clean("function f(a: integer): float return a / 2 end");
        match &func_body(&program, "f").stats[0] {
            Stat::Return { exps, .. } => assert_eq!(exps[0].ty, Type::Float),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_power_always_float() {
        assert_clean("function power(a: float, b: float): float return a ^ b end");
    }

    #[test]
    fn test_bitwise_coerces_float_operand() {
        let program = assert_clean("function f(a: integer, x: float): integer return a & x end");
        match &func_body(&program, "f").stats[0] {
            Stat::Return { exps, .. } => match &exps[0].kind {
                ExpKind::Binop(Binop::BAnd, _, rhs) => {
                    assert_eq!(rhs.ty, Type::Integer);
                    assert!(matches!(rhs.kind, ExpKind::Cast { .. }));
                }
                other => panic!("expected binop, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_comparison_promotes_integer() {
        assert_clean("function f(a: integer, b: float): boolean return a < b end");
        assert_clean("function f(a: integer, b: float): boolean return a == b end");
    }

    #[test]
    fn test_ordering_mismatch_is_an_error() {
        let message = first_message(
            "function f(a: string, b: integer): boolean return a < b end",
        );
        assert!(message.contains("cannot order"), "got: {}", message);
    }

    #[test]
    fn test_concat_typing() {
        let program = assert_clean(
            "function f(n: integer, x: float): string return \"n=\" .. n .. \", x=\" .. x end",
        );
        match &func_body(&program, "f").stats[0] {
            Stat::Return { exps, .. } => match &exps[0].kind {
                ExpKind::Concat(operands) => {
                    assert!(operands.iter().all(|o| o.ty == Type::String));
                }
                other => panic!("expected concat, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_concat_of_boolean_is_an_error() {
        let message = first_message(
            "function f(b: boolean): string return \"x\" .. b end",
        );
        assert!(message.contains("cannot concatenate"), "got: {}", message);
    }

    #[test]
    fn test_length_operator() {
        assert_clean("function f(xs: {integer}): integer return #xs end");
        assert_clean("function f(s: string): integer return #s end");
        let message = first_message("function f(n: integer): integer return #n end");
        assert!(message.contains("length operator"), "got: {}", message);
    }

    #[test]
    fn test_init_list_requires_hint() {
        let message = first_message("function f() local xs = {} end");
        assert!(
            message.contains("array or record type from context"),
            "got: {}",
            message
        );
    }

    #[test]
    fn test_array_initializer() {
        let program =
            assert_clean("function f(): {float} local xs: {float} = {1, 2.5} return xs end");
        match &func_body(&program, "f").stats[0] {
            Stat::Decl { exps, .. } => {
                assert_eq!(exps[0].ty, Type::Array(Box::new(Type::Float)));
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_array_of_nil_is_rejected() {
        let message = first_message("function f(xs: {nil}) end");
        assert!(message.contains("arrays of nil"), "got: {}", message);
    }

    #[test]
    fn test_record_initializer_field_rules() {
        let source = "record P x: float y: float end\n";
        let message = first_message(&format!(
            "{}function f(): P local p: P = {{x = 1.0}} return p end",
            source
        ));
        assert!(message.contains("missing field 'y'"), "got: {}", message);

        let message = first_message(&format!(
            "{}function f(): P local p: P = {{x = 1.0, y = 2.0, z = 3.0}} return p end",
            source
        ));
        assert!(message.contains("no field 'z'"), "got: {}", message);

        let message = first_message(&format!(
            "{}function f(): P local p: P = {{1.0, 2.0}} return p end",
            source
        ));
        assert!(message.contains("array part"), "got: {}", message);
    }

    #[test]
    fn test_record_field_access_and_constructor() {
        let program = assert_clean(
            "record Point x: float y: float end\n\
             function norm2(p: Point): float return p.x * p.x + p.y * p.y end\n\
             function origin(): Point return Point.new(0.0, 0.0) end",
        );
        match &func_body(&program, "origin").stats[0] {
            Stat::Return { exps, .. } => {
                assert_eq!(exps[0].ty, Type::Nominal("test.Point".into()));
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_assign_to_toplevel_function_is_constant() {
        let message = first_message("function foo() foo = 2 end");
        assert_eq!(
            message,
            "attempting to assign to toplevel constant function foo"
        );
    }

    #[test]
    fn test_return_coverage() {
        let message =
            first_message("function f(b: boolean): integer if b then return 1 end end");
        assert!(
            message.contains("without returning"),
            "got: {}",
            message
        );
        assert_clean(
            "function f(b: boolean): integer if b then return 1 else return 2 end end",
        );
        // A loop never guarantees a return.
        let message = first_message(
            "function f(): integer while true do return 1 end end",
        );
        assert!(message.contains("without returning"), "got: {}", message);
    }

    #[test]
    fn test_for_loop_step_insertion() {
        let program = assert_clean(
            "function f(): integer local v = 0 for i = 1, 10 do v = v + i end return v end",
        );
        match &func_body(&program, "f").stats[1] {
            Stat::For { step, decl, .. } => {
                assert_eq!(decl.ty, Type::Integer);
                assert_eq!(step.as_ref().unwrap().kind, ExpKind::Integer(1));
                assert_eq!(step.as_ref().unwrap().ty, Type::Integer);
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_float_for_loop_gets_float_step() {
        let program = assert_clean(
            "function f(): float local v = 0.0 for x = 1.0, 10.0 do v = v + x end return v end",
        );
        match &func_body(&program, "f").stats[1] {
            Stat::For { step, .. } => {
                assert_eq!(step.as_ref().unwrap().kind, ExpKind::Float(1.0));
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_for_control_must_be_numeric() {
        let message = first_message("function f(s: string) for i = s, s do end end");
        assert!(
            message.contains("control variable must be integer or float"),
            "got: {}",
            message
        );
    }

    #[test]
    fn test_value_boxing_and_unboxing() {
        let program = assert_clean(
            "function fn(): integer local x: value = 1 return x end",
        );
        let body = func_body(&program, "fn");
        match &body.stats[0] {
            Stat::Decl { exps, .. } => {
                // 1 was boxed into a value.
                assert_eq!(exps[0].ty, Type::Value);
                assert!(matches!(exps[0].kind, ExpKind::Cast { .. }));
            }
            other => panic!("expected declaration, got {:?}", other),
        }
        match &body.stats[1] {
            Stat::Return { exps, .. } => {
                // x was unboxed with a runtime-checked coercion.
                assert_eq!(exps[0].ty, Type::Integer);
                assert!(matches!(exps[0].kind, ExpKind::Cast { .. }));
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_option_coercions() {
        assert_clean(
            "function f(x: integer): integer? return x end\n\
             function g(): integer? return nil end",
        );
        let message = first_message(
            "function f(x: integer?): integer return x end",
        );
        assert!(message.contains("expected integer"), "got: {}", message);
        // Narrowing requires an explicit cast.
        assert_clean("function f(x: integer?): integer return x as integer end");
    }

    #[test]
    fn test_call_arity_and_argument_coercion() {
        let message = first_message(
            "function g(a: integer, b: integer): integer return a + b end\n\
             function f(): integer return g(1) end",
        );
        assert!(message.contains("2 values but got 1"), "got: {}", message);

        let program = assert_clean(
            "function g(x: float): float return x end\n\
             function f(): float return g(1) end",
        );
        match &func_body(&program, "f").stats[0] {
            Stat::Return { exps, .. } => match &exps[0].kind {
                ExpKind::Call(call) => {
                    assert!(matches!(call.args[0].kind, ExpKind::Cast { .. }));
                    assert_eq!(call.args[0].ty, Type::Float);
                }
                other => panic!("expected call, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_multi_value_declaration_expands_extras() {
        let program = assert_clean(
            "function g(): (integer, float) return 1, 2.0 end\n\
             function f(): float local a, b = g() return b end",
        );
        match &func_body(&program, "f").stats[0] {
            Stat::Decl { exps, decls, .. } => {
                assert_eq!(decls.len(), 2);
                assert_eq!(exps.len(), 2);
                assert_eq!(exps[1].kind, ExpKind::Extra { index: 1 });
                assert_eq!(exps[1].ty, Type::Float);
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_adjusted_call_supplies_one_value() {
        let message = first_message(
            "function g(): (integer, integer) return 1, 2 end\n\
             function f(): integer local a, b = (g()) return a end",
        );
        assert!(message.contains("2 names but 1 values"), "got: {}", message);
    }

    #[test]
    fn test_nil_assignment_to_array_slot_is_deletion() {
        assert_clean("function delete(array: {integer}, i: integer) array[i] = nil end");
    }

    #[test]
    fn test_break_outside_loop() {
        let message = first_message("function f() break end");
        assert!(message.contains("'break' outside"), "got: {}", message);
        assert_clean("function f() while true do break end end");
    }

    #[test]
    fn test_duplicate_toplevel_names() {
        let message = first_message("a = 1\na = 2");
        assert!(message.contains("duplicate top-level"), "got: {}", message);
    }

    #[test]
    fn test_toplevel_initializer_must_be_constant() {
        let message = first_message("function g(): integer return 1 end\na = g()");
        assert!(message.contains("not a constant"), "got: {}", message);
        assert_clean("a = 1\nb: float = 1\nc = \"hi\"\nxs: {integer} = {1, 2}");
    }

    #[test]
    fn test_import_member_access() {
        let loader = InMemoryLoader::new()
            .add("mathx", "function inc(x: integer): integer return x + 1 end\npi: float = 3.14");
        let (program, diagnostics) = check_with(
            "local m = import \"mathx\"\n\
             function f(): integer return m.inc(41) end\n\
             function g(): float return m.pi end",
            loader,
        );
        assert!(diagnostics.is_empty(), "unexpected: {:?}", diagnostics);
        match &func_body(&program, "f").stats[0] {
            Stat::Return { exps, .. } => assert_eq!(exps[0].ty, Type::Integer),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_module_member() {
        let loader = InMemoryLoader::new().add("m", "a = 1");
        let (_, diagnostics) = check_with(
            "local m = import \"m\"\nfunction f(): integer return m.b end",
            loader,
        );
        assert!(
            diagnostics[0].message.contains("no member 'b'"),
            "got: {:?}",
            diagnostics
        );
    }

    #[test]
    fn test_circular_import_diagnostic() {
        let loader = InMemoryLoader::new()
            .add("foo", "local bar = import \"bar\"")
            .add("bar", "local foo = import \"foo\"");
        let (_, diagnostics) = check_with("local foo = import \"foo\"", loader);
        let all: String = diagnostics.iter().map(|d| d.message.clone()).collect();
        assert!(
            all.contains("circular reference to module"),
            "got: {}",
            all
        );
    }

    #[test]
    fn test_imported_record_type() {
        let loader = InMemoryLoader::new().add("geo", "record Point x: float y: float end");
        let (_, diagnostics) = check_with(
            "local geo = import \"geo\"\n\
             function f(): float\n\
             local p: geo.Point = geo.Point.new(1.0, 2.0)\n\
             return p.x\n\
             end",
            loader,
        );
        assert!(diagnostics.is_empty(), "unexpected: {:?}", diagnostics);
    }

    #[test]
    fn test_and_or_typing() {
        let program = assert_clean(
            "function f(a: boolean, b: integer): boolean return a and b end",
        );
        match &func_body(&program, "f").stats[0] {
            Stat::Return { exps, .. } => assert_eq!(exps[0].ty, Type::Boolean),
            other => panic!("expected return, got {:?}", other),
        }
        assert_clean("function f(a: integer, b: integer): integer return a and b end");
        let message = first_message(
            "function f(a: integer, b: string): integer return a and b end",
        );
        assert!(message.contains("incompatible types"), "got: {}", message);
    }

    #[test]
    fn test_no_invalid_types_after_clean_check() {
        let program = assert_clean(
            "record P x: float end\n\
             n: integer = 3\n\
             function f(xs: {float}, p: P): float\n\
             local acc: float = 0.0\n\
             for i = 1, #xs do acc = acc + xs[i] end\n\
             return acc + p.x + n\n\
             end",
        );
        fn walk_exp(exp: &Exp) {
            assert_ne!(exp.ty, Type::Invalid, "invalid type on {:?}", exp.kind);
        }
        for item in &program.items {
            if let TopLevel::Func(f) = item {
                for stat in &f.block.stats {
                    if let Stat::Return { exps, .. } = stat {
                        exps.iter().for_each(walk_exp);
                    }
                }
            }
        }
    }
}
