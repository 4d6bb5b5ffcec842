//! AST printer
//!
//! Renders a parsed program back to Titan source (`--print-ast`), and a
//! checked program with its resolved types (`--print-types`).
//!
//! The plain printer is precedence-exact and adds no parentheses of its
//! own: explicit parentheses in the source survive as `Adjust` nodes and
//! print back as parentheses, so print-then-parse reproduces the same
//! tree up to source locations. The typed printer favors readability and
//! is not meant to be re-parsed.

use crate::ast::{
    Binop, Block, Call, CallKind, Decl, Exp, ExpKind, IfClause, InitField, Program, Stat,
    TopLevel, TypeSyntax, Unop, Var,
};

/// Print a parsed program as Titan source.
pub fn print_program(program: &Program) -> String {
    Printer::new(false).print(program)
}

/// Print a checked program with resolved type annotations.
pub fn print_typed(program: &Program) -> String {
    Printer::new(true).print(program)
}

struct Printer {
    out: String,
    indent: usize,
    typed: bool,
}

// Binding powers, loosest to tightest. Right-associative operators and
// the n-ary concat get custom handling at their sites.
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_CMP: u8 = 3;
const PREC_BOR: u8 = 4;
const PREC_BXOR: u8 = 5;
const PREC_BAND: u8 = 6;
const PREC_SHIFT: u8 = 7;
const PREC_CONCAT: u8 = 8;
const PREC_ADD: u8 = 9;
const PREC_MUL: u8 = 10;
const PREC_UNARY: u8 = 11;
const PREC_POW: u8 = 12;
const PREC_ATOM: u8 = 13;

fn binop_prec(op: Binop) -> u8 {
    match op {
        Binop::Or => PREC_OR,
        Binop::And => PREC_AND,
        Binop::Eq | Binop::Ne | Binop::Lt | Binop::Gt | Binop::Le | Binop::Ge => PREC_CMP,
        Binop::BOr => PREC_BOR,
        Binop::BXor => PREC_BXOR,
        Binop::BAnd => PREC_BAND,
        Binop::Shl | Binop::Shr => PREC_SHIFT,
        Binop::Add | Binop::Sub => PREC_ADD,
        Binop::Mul | Binop::Div | Binop::IDiv | Binop::Mod => PREC_MUL,
        Binop::Pow => PREC_POW,
    }
}

impl Printer {
    fn new(typed: bool) -> Self {
        Printer {
            out: String::new(),
            indent: 0,
            typed,
        }
    }

    fn print(mut self, program: &Program) -> String {
        for item in &program.items {
            match item {
                TopLevel::Import(import) => {
                    self.line(&format!(
                        "local {} = import \"{}\"",
                        import.local_name, import.module
                    ));
                }
                TopLevel::ForeignImport(import) => {
                    self.line(&format!(
                        "local {} = foreign import \"{}\"",
                        import.local_name, import.header
                    ));
                }
                TopLevel::Var(var) => {
                    let mut text = String::new();
                    if var.islocal {
                        text.push_str("local ");
                    }
                    text.push_str(&self.decl_text(&var.decl));
                    text.push_str(" = ");
                    text.push_str(&self.exp_text(&var.value, 0));
                    self.line(&text);
                }
                TopLevel::Func(func) => {
                    // The implicit record constructor is not source text.
                    if func.name.contains('.') {
                        continue;
                    }
                    let params: Vec<String> =
                        func.params.iter().map(|p| self.decl_text(p)).collect();
                    let mut header = String::new();
                    if func.islocal {
                        header.push_str("local ");
                    }
                    header.push_str(&format!("function {}({})", func.name, params.join(", ")));
                    if !func.ret_syntax.is_empty() {
                        let rets: Vec<String> =
                            func.ret_syntax.iter().map(type_syntax_text).collect();
                        if rets.len() == 1 {
                            header.push_str(&format!(": {}", rets[0]));
                        } else {
                            header.push_str(&format!(": ({})", rets.join(", ")));
                        }
                    }
                    self.line(&header);
                    self.block(&func.block);
                    self.line("end");
                }
                TopLevel::Record(record) => {
                    self.line(&format!("record {}", record.name));
                    self.indent += 1;
                    for field in &record.fields {
                        self.line(&format!(
                            "{}: {}",
                            field.name,
                            type_syntax_text(&field.syntax)
                        ));
                    }
                    self.indent -= 1;
                    self.line("end");
                }
            }
        }
        self.out
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn block(&mut self, block: &Block) {
        self.indent += 1;
        for stat in &block.stats {
            self.stat(stat);
        }
        self.indent -= 1;
    }

    fn stat(&mut self, stat: &Stat) {
        match stat {
            Stat::Block { block, .. } => {
                self.line("do");
                self.block(block);
                self.line("end");
            }
            Stat::While { cond, block, .. } => {
                let cond = self.exp_text(cond, 0);
                self.line(&format!("while {} do", cond));
                self.block(block);
                self.line("end");
            }
            Stat::Repeat { block, cond, .. } => {
                self.line("repeat");
                self.block(block);
                let cond = self.exp_text(cond, 0);
                self.line(&format!("until {}", cond));
            }
            Stat::If {
                clauses,
                else_block,
                ..
            } => {
                for (i, IfClause { cond, block, .. }) in clauses.iter().enumerate() {
                    let keyword = if i == 0 { "if" } else { "elseif" };
                    let cond = self.exp_text(cond, 0);
                    self.line(&format!("{} {} then", keyword, cond));
                    self.block(block);
                }
                if let Some(block) = else_block {
                    self.line("else");
                    self.block(block);
                }
                self.line("end");
            }
            Stat::For {
                decl,
                start,
                end,
                step,
                block,
                ..
            } => {
                let mut header = format!(
                    "for {} = {}, {}",
                    self.decl_text(decl),
                    self.exp_text(start, 0),
                    self.exp_text(end, 0)
                );
                if let Some(step) = step {
                    header.push_str(&format!(", {}", self.exp_text(step, 0)));
                }
                header.push_str(" do");
                self.line(&header);
                self.block(block);
                self.line("end");
            }
            Stat::Decl { decls, exps, .. } => {
                let names: Vec<String> = decls.iter().map(|d| self.decl_text(d)).collect();
                let values: Vec<String> =
                    exps.iter().map(|e| self.exp_text(e, 0)).collect();
                self.line(&format!(
                    "local {} = {}",
                    names.join(", "),
                    values.join(", ")
                ));
            }
            Stat::Assign { vars, exps, .. } => {
                let targets: Vec<String> = vars.iter().map(|v| self.var_text(v)).collect();
                let values: Vec<String> =
                    exps.iter().map(|e| self.exp_text(e, 0)).collect();
                self.line(&format!("{} = {}", targets.join(", "), values.join(", ")));
            }
            Stat::Call { call, .. } => {
                let text = self.exp_text(call, 0);
                self.line(&text);
            }
            Stat::Return { exps, .. } => {
                if exps.is_empty() {
                    self.line("return");
                } else {
                    let values: Vec<String> =
                        exps.iter().map(|e| self.exp_text(e, 0)).collect();
                    self.line(&format!("return {}", values.join(", ")));
                }
            }
            Stat::Break { .. } => self.line("break"),
        }
    }

    fn decl_text(&self, decl: &Decl) -> String {
        if let Some(syntax) = &decl.syntax {
            format!("{}: {}", decl.name, type_syntax_text(syntax))
        } else if self.typed && decl.ty != crate::types::Type::Invalid {
            format!("{}: {}", decl.name, decl.ty)
        } else {
            decl.name.clone()
        }
    }

    fn exp_text(&self, exp: &Exp, min_prec: u8) -> String {
        let (text, prec) = match &exp.kind {
            ExpKind::Nil => ("nil".to_string(), PREC_ATOM),
            ExpKind::Bool(true) => ("true".to_string(), PREC_ATOM),
            ExpKind::Bool(false) => ("false".to_string(), PREC_ATOM),
            ExpKind::Integer(n) => (n.to_string(), PREC_ATOM),
            ExpKind::Float(x) => (format!("{:?}", x), PREC_ATOM),
            ExpKind::Str(bytes) => (titan_string_literal(bytes), PREC_ATOM),
            ExpKind::InitList(fields) => {
                let parts: Vec<String> =
                    fields.iter().map(|f| self.init_field_text(f)).collect();
                (format!("{{{}}}", parts.join(", ")), PREC_ATOM)
            }
            ExpKind::Var(var) => (self.var_text(var), PREC_ATOM),
            ExpKind::Unop(op, operand) => {
                let inner = self.exp_text(operand, PREC_UNARY);
                let text = match op {
                    Unop::Not => format!("not {}", inner),
                    // A space keeps `- -x` from lexing as a comment.
                    Unop::Neg if inner.starts_with('-') => format!("- {}", inner),
                    Unop::Neg => format!("-{}", inner),
                    Unop::Len => format!("#{}", inner),
                    Unop::BNot => format!("~{}", inner),
                };
                (text, PREC_UNARY)
            }
            ExpKind::Binop(op, lhs, rhs) => {
                let prec = binop_prec(*op);
                let (lmin, rmin) = if *op == Binop::Pow {
                    // `^` is right-associative and tighter than unary on
                    // the left but admits unary exponents.
                    (PREC_ATOM, PREC_UNARY)
                } else {
                    (prec, prec + 1)
                };
                let text = format!(
                    "{} {} {}",
                    self.exp_text(lhs, lmin),
                    op,
                    self.exp_text(rhs, rmin)
                );
                (text, prec)
            }
            ExpKind::Concat(operands) => {
                let parts: Vec<String> = operands
                    .iter()
                    .map(|o| self.exp_text(o, PREC_CONCAT + 1))
                    .collect();
                (parts.join(" .. "), PREC_CONCAT)
            }
            ExpKind::Call(call) => (self.call_text(call), PREC_ATOM),
            ExpKind::Cast { exp: inner, syntax } => {
                let inner_text = self.exp_text(inner, PREC_ATOM);
                match syntax {
                    Some(syntax) => (
                        format!("{} as {}", inner_text, type_syntax_text(syntax)),
                        PREC_ATOM,
                    ),
                    // Checker-inserted coercion: typed output only.
                    None => (format!("({} as {})", inner_text, exp.ty), PREC_ATOM),
                }
            }
            ExpKind::Adjust(inner) => {
                (format!("({})", self.exp_text(inner, 0)), PREC_ATOM)
            }
            ExpKind::Extra { index } => (format!("<extra {}>", index), PREC_ATOM),
        };
        if prec < min_prec {
            format!("({})", text)
        } else {
            text
        }
    }

    fn init_field_text(&self, field: &InitField) -> String {
        match &field.name {
            Some(name) => format!("{} = {}", name, self.exp_text(&field.exp, 0)),
            None => self.exp_text(&field.exp, 0),
        }
    }

    fn var_text(&self, var: &Var) -> String {
        match var {
            Var::Name { name, .. } => name.clone(),
            Var::Dot { exp, name, .. } => {
                format!("{}.{}", self.exp_text(exp, PREC_ATOM), name)
            }
            Var::Bracket { array, index, .. } => format!(
                "{}[{}]",
                self.exp_text(array, PREC_ATOM),
                self.exp_text(index, 0)
            ),
        }
    }

    fn call_text(&self, call: &Call) -> String {
        let args: Vec<String> = call.args.iter().map(|a| self.exp_text(a, 0)).collect();
        match &call.kind {
            CallKind::Function { func } => {
                format!("{}({})", self.exp_text(func, PREC_ATOM), args.join(", "))
            }
            CallKind::Method { exp, name } => format!(
                "{}:{}({})",
                self.exp_text(exp, PREC_ATOM),
                name,
                args.join(", ")
            ),
        }
    }
}

fn type_syntax_text(syntax: &TypeSyntax) -> String {
    match syntax {
        TypeSyntax::Name { name, .. } => name.clone(),
        TypeSyntax::QualName { module, name, .. } => format!("{}.{}", module, name),
        TypeSyntax::Array { elem, .. } => format!("{{{}}}", type_syntax_text(elem)),
        TypeSyntax::Map { key, value, .. } => format!(
            "{{{}: {}}}",
            type_syntax_text(key),
            type_syntax_text(value)
        ),
        TypeSyntax::Function { params, rets, .. } => {
            let params: Vec<String> = params.iter().map(type_syntax_text).collect();
            let rets: Vec<String> = rets.iter().map(type_syntax_text).collect();
            format!("({}) -> ({})", params.join(", "), rets.join(", "))
        }
        TypeSyntax::Option { base, .. } => {
            // Function bases need the parenthesized form to keep the `?`
            // attached to the whole type on re-parse.
            format!("{}?", type_syntax_text(base))
        }
    }
}

/// Escape bytes back into a short string literal.
fn titan_string_literal(bytes: &[u8]) -> String {
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
            _ => out.push_str(&format!("\\{}", b)),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse_program;

    fn parse(source: &str) -> Program {
        parse_program("test.titan", "test", lex(source).unwrap()).unwrap()
    }

    /// The round-trip invariant: printing a parsed program and parsing it
    /// again reaches a fixed point immediately.
    fn assert_round_trip(source: &str) {
        let first = print_program(&parse(source));
        let second = print_program(&parse(&first));
        assert_eq!(first, second, "print/parse round trip diverged");
    }

    #[test]
    fn test_round_trip_functions_and_statements() {
        assert_round_trip(
            "function f(a: integer, b: float): float\n\
             local acc: float = 0.0\n\
             while a > 0 do acc = acc + b a = a - 1 end\n\
             repeat a = a + 1 until a == 0\n\
             if acc > 1.0 then return acc elseif acc < 0.0 then return -acc else return 0.0 end\n\
             end",
        );
    }

    #[test]
    fn test_round_trip_expressions() {
        assert_round_trip(
            "function f(x: integer, y: integer): integer\n\
             return (x + y) * x - y // 2 % 3 ^ x\n\
             end",
        );
        assert_round_trip("function f(b: boolean): boolean return not b or b and true end");
        assert_round_trip("function f(v: value): integer return v as integer end");
        assert_round_trip("function f(s: string, n: integer): string return s .. n .. \"!\" end");
    }

    #[test]
    fn test_round_trip_records_and_imports() {
        assert_round_trip(
            "local geo = import \"geo\"\n\
             record Point\n\
             x: float\n\
             y: float\n\
             end\n\
             function mk(): Point return Point.new(1.0, 2.0) end",
        );
    }

    #[test]
    fn test_round_trip_for_and_arrays() {
        assert_round_trip(
            "function sum(xs: {integer}): integer\n\
             local acc = 0\n\
             for i = 1, #xs, 2 do acc = acc + xs[i] end\n\
             return acc\n\
             end",
        );
    }

    #[test]
    fn test_round_trip_negative_step() {
        assert_round_trip("function f() for i = 10, 1, -2 do end end");
    }

    #[test]
    fn test_round_trip_strings_with_escapes() {
        assert_round_trip("s = \"tab\\tquote\\\"nl\\nhigh\\255\"");
    }

    #[test]
    fn test_constructor_is_not_printed() {
        let printed = print_program(&parse("record P x: float end"));
        assert!(!printed.contains("function P.new"));
        assert!(printed.contains("record P"));
    }

    #[test]
    fn test_adjust_prints_parentheses() {
        let printed = print_program(&parse("function f(g: () -> (integer, integer)): integer\nlocal a = (g())\nreturn a\nend"));
        assert!(printed.contains("(g())"), "got: {}", printed);
    }

    #[test]
    fn test_typed_print_annotates_inferred_locals() {
        let mut program = parse("function f(): integer local x = 1 return x end");
        let mut session = crate::types::Session::new();
        let mut loader = crate::loader::InMemoryLoader::new();
        let diagnostics =
            crate::checker::check_program(&mut program, &mut session, &mut loader);
        assert!(diagnostics.is_empty());
        let printed = print_typed(&program);
        assert!(printed.contains("local x: integer = 1"), "got: {}", printed);
    }
}
