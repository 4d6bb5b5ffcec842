//! Recursive-descent parser for Titan
//!
//! Consumes the token stream and produces the AST. The parser stops at the
//! first syntax error; errors carry a symbolic label (`ExpWhile`,
//! `RParPList`, …) mapped to a human message, plus the failing location.
//!
//! Operator precedence, lowest to highest: `or`, `and`, comparison, `|`,
//! `~`, `&`, shifts, `..` (right-associative, flattened), additive,
//! multiplicative, unary, `^` (right-associative), `as` casts.

use crate::ast::{
    Block, Call, CallKind, Decl, Diagnostic, Exp, ExpKind, ForeignImportDecl, IfClause,
    ImportDecl, InitField, Location, Program, RecordDecl, RecordFieldDecl, Stat, TopLevel,
    TopLevelFunc, TopLevelVar, TypeSyntax, Unop, Var,
};
use crate::ast::Binop;
use crate::lexer::{Token, TokenKind};
use crate::types::Type;

/// A syntax error: symbolic label, human message, failing position.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub label: &'static str,
    pub message: String,
    pub loc: Location,
}

impl ParseError {
    fn new(label: &'static str, message: impl Into<String>, loc: Location) -> Self {
        ParseError {
            label,
            message: message.into(),
            loc,
        }
    }

    pub fn to_diagnostic(&self, filename: &str) -> Diagnostic {
        Diagnostic::new(filename, self.loc, format!("syntax error, {}", self.message))
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.loc, self.message, self.label)
    }
}

/// Parse a whole module.
pub fn parse_program(
    filename: &str,
    module_name: &str,
    tokens: Vec<Token>,
) -> Result<Program, ParseError> {
    let mut parser = Parser::new(tokens);
    let items = parser.parse_toplevel_items()?;
    Ok(Program {
        filename: filename.to_string(),
        module_name: module_name.to_string(),
        items,
    })
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_decl_id: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        // The whitespace rule: comments are consumed up front so every
        // other production sees only significant tokens.
        let tokens = tokens
            .into_iter()
            .filter(|t| t.kind != TokenKind::Comment)
            .collect();
        Parser {
            tokens,
            pos: 0,
            next_decl_id: 0,
        }
    }

    fn fresh_decl_id(&mut self) -> usize {
        let id = self.next_decl_id;
        self.next_decl_id += 1;
        id
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn loc(&self) -> Location {
        match self.tokens.get(self.pos) {
            Some(t) => t.loc,
            None => self
                .tokens
                .last()
                .map(|t| t.loc)
                .unwrap_or_else(|| Location::new(1, 1)),
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == Some(kind)
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(
        &mut self,
        kind: &TokenKind,
        label: &'static str,
        message: &str,
    ) -> Result<Location, ParseError> {
        let loc = self.loc();
        if self.consume(kind) {
            Ok(loc)
        } else {
            Err(ParseError::new(label, message, loc))
        }
    }

    fn expect_name(&mut self, label: &'static str, message: &str) -> Result<(String, Location), ParseError> {
        let loc = self.loc();
        match self.peek() {
            Some(TokenKind::Name(_)) => match self.advance() {
                Some(Token {
                    kind: TokenKind::Name(name),
                    ..
                }) => Ok((name, loc)),
                _ => unreachable!("peeked a name"),
            },
            _ => Err(ParseError::new(label, message, loc)),
        }
    }

    fn expect_string(
        &mut self,
        label: &'static str,
        message: &str,
    ) -> Result<(String, Location), ParseError> {
        let loc = self.loc();
        match self.peek() {
            Some(TokenKind::Str(_)) => match self.advance() {
                Some(Token {
                    kind: TokenKind::Str(bytes),
                    ..
                }) => String::from_utf8(bytes)
                    .map(|s| (s, loc))
                    .map_err(|_| ParseError::new(label, message, loc)),
                _ => unreachable!("peeked a string"),
            },
            _ => Err(ParseError::new(label, message, loc)),
        }
    }

    // ------------------------------------------------------------------
    // Top level
    // ------------------------------------------------------------------

    fn parse_toplevel_items(&mut self) -> Result<Vec<TopLevel>, ParseError> {
        let mut items = Vec::new();
        while !self.at_end() {
            match self.peek() {
                Some(TokenKind::Local) => {
                    let loc = self.loc();
                    self.pos += 1;
                    if self.check(&TokenKind::Function) {
                        items.push(TopLevel::Func(self.parse_func(true, loc)?));
                    } else {
                        items.push(self.parse_toplevel_binding(true, loc)?);
                    }
                }
                Some(TokenKind::Function) => {
                    let loc = self.loc();
                    items.push(TopLevel::Func(self.parse_func(false, loc)?));
                }
                Some(TokenKind::Record) => {
                    let (record, constructor) = self.parse_record()?;
                    items.push(TopLevel::Record(record));
                    items.push(TopLevel::Func(constructor));
                }
                Some(TokenKind::Name(_)) => {
                    let loc = self.loc();
                    items.push(self.parse_toplevel_binding(false, loc)?);
                }
                _ => {
                    return Err(ParseError::new(
                        "ExpToplevel",
                        "expected a top-level declaration",
                        self.loc(),
                    ));
                }
            }
        }
        Ok(items)
    }

    /// `name [: T] = (import "m" | foreign import "h" | exp)`, the `local`
    /// keyword (if any) already consumed.
    fn parse_toplevel_binding(
        &mut self,
        islocal: bool,
        loc: Location,
    ) -> Result<TopLevel, ParseError> {
        let (name, name_loc) = self.expect_name("NameToplevel", "expected a name after 'local'")?;
        let syntax = if self.consume(&TokenKind::Colon) {
            Some(self.parse_type_syntax()?)
        } else {
            None
        };
        self.expect(
            &TokenKind::Assign,
            "AssignVar",
            "expected '=' in top-level declaration",
        )?;

        if self.check(&TokenKind::Import) {
            self.pos += 1;
            let (module, _) =
                self.expect_string("StringImport", "expected a module name string after 'import'")?;
            return Ok(TopLevel::Import(ImportDecl {
                id: self.fresh_decl_id(),
                local_name: name,
                module,
                loc,
                ty: Type::Invalid,
            }));
        }
        if self.check(&TokenKind::Foreign) {
            self.pos += 1;
            self.expect(
                &TokenKind::Import,
                "ImportForeign",
                "expected 'import' after 'foreign'",
            )?;
            let (header, _) = self.expect_string(
                "StringImport",
                "expected a header name string after 'foreign import'",
            )?;
            return Ok(TopLevel::ForeignImport(ForeignImportDecl {
                id: self.fresh_decl_id(),
                local_name: name,
                header,
                loc,
                ty: Type::Invalid,
            }));
        }

        let value = self.parse_exp()?;
        let decl = Decl {
            id: self.fresh_decl_id(),
            name,
            syntax,
            loc: name_loc,
            ty: Type::Invalid,
        };
        Ok(TopLevel::Var(TopLevelVar {
            id: decl.id,
            islocal,
            decl,
            value,
            loc,
            global_index: None,
        }))
    }

    /// `function name(params) [: rets] block end`, `function` not yet
    /// consumed.
    fn parse_func(&mut self, islocal: bool, loc: Location) -> Result<TopLevelFunc, ParseError> {
        self.expect(&TokenKind::Function, "FuncToplevel", "expected 'function'")?;
        let (name, _) = self.expect_name("NameFunc", "expected a function name")?;
        self.expect(
            &TokenKind::LParen,
            "LParPList",
            "expected '(' for the parameter list",
        )?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.parse_decl("NameParam", "expected a parameter name")?);
                if !self.consume(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(
            &TokenKind::RParen,
            "RParPList",
            "expected ')' to close the parameter list",
        )?;
        let ret_syntax = if self.consume(&TokenKind::Colon) {
            self.parse_ret_types()?
        } else {
            Vec::new()
        };
        let block = self.parse_block()?;
        self.expect(&TokenKind::End, "EndFunc", "expected 'end' to close the function")?;
        Ok(TopLevelFunc {
            id: self.fresh_decl_id(),
            islocal,
            name,
            params,
            ret_syntax,
            block,
            loc,
            ty: Type::Invalid,
            global_index: None,
        })
    }

    /// A record declaration produces two items: the record type and its
    /// implicit `new` static constructor, a regular top-level function
    /// whose body returns an initializer with every declared field.
    fn parse_record(&mut self) -> Result<(RecordDecl, TopLevelFunc), ParseError> {
        let loc = self.loc();
        self.expect(&TokenKind::Record, "RecordToplevel", "expected 'record'")?;
        let (name, _) = self.expect_name("NameRecord", "expected a record name")?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::End) {
            let field_loc = self.loc();
            let (field_name, _) =
                self.expect_name("NameRecordField", "expected a field name or 'end'")?;
            self.expect(
                &TokenKind::Colon,
                "ColonRecordField",
                "expected ':' after the field name",
            )?;
            let syntax = self.parse_type_syntax()?;
            fields.push(RecordFieldDecl {
                name: field_name,
                syntax,
                loc: field_loc,
            });
            // Optional separators between fields.
            while self.consume(&TokenKind::Semicolon) || self.consume(&TokenKind::Comma) {}
        }
        self.expect(&TokenKind::End, "EndRecord", "expected 'end' to close the record")?;

        let record = RecordDecl {
            id: self.fresh_decl_id(),
            name: name.clone(),
            fields,
            loc,
        };

        let params: Vec<Decl> = record
            .fields
            .iter()
            .map(|f| Decl {
                id: self.fresh_decl_id(),
                name: f.name.clone(),
                syntax: Some(f.syntax.clone()),
                loc: f.loc,
                ty: Type::Invalid,
            })
            .collect();
        let init_fields: Vec<InitField> = params
            .iter()
            .map(|p| InitField {
                name: Some(p.name.clone()),
                exp: Exp::new(
                    ExpKind::Var(Var::Name {
                        name: p.name.clone(),
                        loc: p.loc,
                        refkind: None,
                    }),
                    p.loc,
                ),
                loc: p.loc,
            })
            .collect();
        let constructor = TopLevelFunc {
            id: self.fresh_decl_id(),
            islocal: false,
            name: format!("{}.new", name),
            params,
            ret_syntax: vec![TypeSyntax::Name { name, loc }],
            block: Block {
                stats: vec![Stat::Return {
                    exps: vec![Exp::new(ExpKind::InitList(init_fields), loc)],
                    loc,
                }],
            },
            loc,
            ty: Type::Invalid,
            global_index: None,
        };
        Ok((record, constructor))
    }

    fn parse_decl(&mut self, label: &'static str, message: &str) -> Result<Decl, ParseError> {
        let (name, loc) = self.expect_name(label, message)?;
        let syntax = if self.consume(&TokenKind::Colon) {
            Some(self.parse_type_syntax()?)
        } else {
            None
        };
        Ok(Decl {
            id: self.fresh_decl_id(),
            name,
            syntax,
            loc,
            ty: Type::Invalid,
        })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block_follows(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(TokenKind::End)
                | Some(TokenKind::Else)
                | Some(TokenKind::Elseif)
                | Some(TokenKind::Until)
        )
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let mut stats = Vec::new();
        while !self.block_follows() {
            if self.consume(&TokenKind::Semicolon) {
                continue;
            }
            if self.check(&TokenKind::Return) {
                stats.push(self.parse_return()?);
                self.consume(&TokenKind::Semicolon);
                if !self.block_follows() {
                    return Err(ParseError::new(
                        "EndBlock",
                        "expected the block to end after 'return'",
                        self.loc(),
                    ));
                }
                break;
            }
            stats.push(self.parse_statement()?);
        }
        Ok(Block { stats })
    }

    fn parse_statement(&mut self) -> Result<Stat, ParseError> {
        let loc = self.loc();
        match self.peek() {
            Some(TokenKind::Do) => {
                self.pos += 1;
                let block = self.parse_block()?;
                self.expect(&TokenKind::End, "EndBlock", "expected 'end' to close the block")?;
                Ok(Stat::Block { block, loc })
            }
            Some(TokenKind::While) => {
                self.pos += 1;
                let cond = self
                    .parse_exp()
                    .map_err(|e| relabel(e, "ExpWhile", "expected a condition after 'while'"))?;
                self.expect(&TokenKind::Do, "DoWhile", "expected 'do' in while statement")?;
                let block = self.parse_block()?;
                self.expect(&TokenKind::End, "EndWhile", "expected 'end' to close the while loop")?;
                Ok(Stat::While { cond, block, loc })
            }
            Some(TokenKind::Repeat) => {
                self.pos += 1;
                let block = self.parse_block()?;
                self.expect(
                    &TokenKind::Until,
                    "UntilRepeat",
                    "expected 'until' to close the repeat loop",
                )?;
                let cond = self
                    .parse_exp()
                    .map_err(|e| relabel(e, "ExpRepeat", "expected a condition after 'until'"))?;
                Ok(Stat::Repeat { block, cond, loc })
            }
            Some(TokenKind::If) => self.parse_if(loc),
            Some(TokenKind::For) => self.parse_for(loc),
            Some(TokenKind::Local) => {
                self.pos += 1;
                let mut decls =
                    vec![self.parse_decl("NameLocal", "expected a variable name after 'local'")?];
                while self.consume(&TokenKind::Comma) {
                    decls.push(self.parse_decl("NameLocal", "expected a variable name")?);
                }
                self.expect(
                    &TokenKind::Assign,
                    "AssignLocal",
                    "expected '=' in local declaration",
                )?;
                let exps = self.parse_exp_list()?;
                Ok(Stat::Decl { decls, exps, loc })
            }
            Some(TokenKind::Break) => {
                self.pos += 1;
                Ok(Stat::Break { loc })
            }
            _ => self.parse_exp_statement(loc),
        }
    }

    fn parse_if(&mut self, loc: Location) -> Result<Stat, ParseError> {
        self.pos += 1; // 'if'
        let mut clauses = Vec::new();
        let cond = self
            .parse_exp()
            .map_err(|e| relabel(e, "ExpIf", "expected a condition after 'if'"))?;
        self.expect(&TokenKind::Then, "ThenIf", "expected 'then' in if statement")?;
        let block = self.parse_block()?;
        clauses.push(IfClause { cond, block, loc });
        let mut else_block = None;
        loop {
            let clause_loc = self.loc();
            if self.consume(&TokenKind::Elseif) {
                let cond = self
                    .parse_exp()
                    .map_err(|e| relabel(e, "ExpIf", "expected a condition after 'elseif'"))?;
                self.expect(&TokenKind::Then, "ThenIf", "expected 'then' after 'elseif'")?;
                let block = self.parse_block()?;
                clauses.push(IfClause {
                    cond,
                    block,
                    loc: clause_loc,
                });
            } else if self.consume(&TokenKind::Else) {
                else_block = Some(self.parse_block()?);
                break;
            } else {
                break;
            }
        }
        self.expect(&TokenKind::End, "EndIf", "expected 'end' to close the if statement")?;
        Ok(Stat::If {
            clauses,
            else_block,
            loc,
        })
    }

    fn parse_for(&mut self, loc: Location) -> Result<Stat, ParseError> {
        self.pos += 1; // 'for'
        let decl = self.parse_decl("NameFor", "expected a loop variable after 'for'")?;
        self.expect(&TokenKind::Assign, "AssignFor", "expected '=' in for loop")?;
        let start = self
            .parse_exp()
            .map_err(|e| relabel(e, "Exp1For", "expected the initial value of the for loop"))?;
        self.expect(&TokenKind::Comma, "CommaFor", "expected ',' in for loop")?;
        let end = self
            .parse_exp()
            .map_err(|e| relabel(e, "Exp2For", "expected the limit of the for loop"))?;
        let step = if self.consume(&TokenKind::Comma) {
            Some(
                self.parse_exp()
                    .map_err(|e| relabel(e, "Exp3For", "expected the step of the for loop"))?,
            )
        } else {
            None
        };
        self.expect(&TokenKind::Do, "DoFor", "expected 'do' in for loop")?;
        let block = self.parse_block()?;
        self.expect(&TokenKind::End, "EndFor", "expected 'end' to close the for loop")?;
        Ok(Stat::For {
            decl,
            start,
            end,
            step,
            block,
            loc,
        })
    }

    fn parse_return(&mut self) -> Result<Stat, ParseError> {
        let loc = self.loc();
        self.pos += 1; // 'return'
        let exps = if self.block_follows() || self.check(&TokenKind::Semicolon) {
            Vec::new()
        } else {
            self.parse_exp_list()?
        };
        Ok(Stat::Return { exps, loc })
    }

    /// A statement that begins with an expression: either a call or the
    /// variable list of an assignment.
    fn parse_exp_statement(&mut self, loc: Location) -> Result<Stat, ParseError> {
        let first = self.parse_suffixed_exp()?;
        if self.check(&TokenKind::Assign) || self.check(&TokenKind::Comma) {
            let mut vars = vec![exp_to_var(first)?];
            while self.consume(&TokenKind::Comma) {
                let exp = self.parse_suffixed_exp()?;
                vars.push(exp_to_var(exp)?);
            }
            self.expect(&TokenKind::Assign, "AssignAssign", "expected '=' in assignment")?;
            let exps = self.parse_exp_list()?;
            return Ok(Stat::Assign { vars, exps, loc });
        }
        match first.kind {
            ExpKind::Call(_) => Ok(Stat::Call { call: first, loc }),
            _ => Err(ParseError::new(
                "ExpStat",
                "expected a statement, found an expression",
                loc,
            )),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_exp_list(&mut self) -> Result<Vec<Exp>, ParseError> {
        let mut exps = vec![self.parse_exp()?];
        while self.consume(&TokenKind::Comma) {
            exps.push(self.parse_exp()?);
        }
        Ok(exps)
    }

    pub fn parse_exp(&mut self) -> Result<Exp, ParseError> {
        self.parse_or_exp()
    }

    fn parse_or_exp(&mut self) -> Result<Exp, ParseError> {
        let mut exp = self.parse_and_exp()?;
        while self.check(&TokenKind::Or) {
            let loc = self.loc();
            self.pos += 1;
            let rhs = self.parse_and_exp()?;
            exp = Exp::new(ExpKind::Binop(Binop::Or, Box::new(exp), Box::new(rhs)), loc);
        }
        Ok(exp)
    }

    fn parse_and_exp(&mut self) -> Result<Exp, ParseError> {
        let mut exp = self.parse_comparison_exp()?;
        while self.check(&TokenKind::And) {
            let loc = self.loc();
            self.pos += 1;
            let rhs = self.parse_comparison_exp()?;
            exp = Exp::new(ExpKind::Binop(Binop::And, Box::new(exp), Box::new(rhs)), loc);
        }
        Ok(exp)
    }

    fn parse_comparison_exp(&mut self) -> Result<Exp, ParseError> {
        let mut exp = self.parse_bor_exp()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::EqEq) => Binop::Eq,
                Some(TokenKind::NotEq) => Binop::Ne,
                Some(TokenKind::Less) => Binop::Lt,
                Some(TokenKind::Greater) => Binop::Gt,
                Some(TokenKind::LessEq) => Binop::Le,
                Some(TokenKind::GreaterEq) => Binop::Ge,
                _ => break,
            };
            let loc = self.loc();
            self.pos += 1;
            let rhs = self.parse_bor_exp()?;
            exp = Exp::new(ExpKind::Binop(op, Box::new(exp), Box::new(rhs)), loc);
        }
        Ok(exp)
    }

    fn parse_bor_exp(&mut self) -> Result<Exp, ParseError> {
        let mut exp = self.parse_bxor_exp()?;
        while self.check(&TokenKind::Pipe) {
            let loc = self.loc();
            self.pos += 1;
            let rhs = self.parse_bxor_exp()?;
            exp = Exp::new(ExpKind::Binop(Binop::BOr, Box::new(exp), Box::new(rhs)), loc);
        }
        Ok(exp)
    }

    fn parse_bxor_exp(&mut self) -> Result<Exp, ParseError> {
        let mut exp = self.parse_band_exp()?;
        while self.check(&TokenKind::Tilde) {
            let loc = self.loc();
            self.pos += 1;
            let rhs = self.parse_band_exp()?;
            exp = Exp::new(ExpKind::Binop(Binop::BXor, Box::new(exp), Box::new(rhs)), loc);
        }
        Ok(exp)
    }

    fn parse_band_exp(&mut self) -> Result<Exp, ParseError> {
        let mut exp = self.parse_shift_exp()?;
        while self.check(&TokenKind::Ampersand) {
            let loc = self.loc();
            self.pos += 1;
            let rhs = self.parse_shift_exp()?;
            exp = Exp::new(ExpKind::Binop(Binop::BAnd, Box::new(exp), Box::new(rhs)), loc);
        }
        Ok(exp)
    }

    fn parse_shift_exp(&mut self) -> Result<Exp, ParseError> {
        let mut exp = self.parse_concat_exp()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::ShiftLeft) => Binop::Shl,
                Some(TokenKind::ShiftRight) => Binop::Shr,
                _ => break,
            };
            let loc = self.loc();
            self.pos += 1;
            let rhs = self.parse_concat_exp()?;
            exp = Exp::new(ExpKind::Binop(op, Box::new(exp), Box::new(rhs)), loc);
        }
        Ok(exp)
    }

    /// `..` is right-associative and flattens: `a .. b .. c` becomes one
    /// n-ary node, with adjacent string literals constant-folded.
    fn parse_concat_exp(&mut self) -> Result<Exp, ParseError> {
        let first = self.parse_additive_exp()?;
        if !self.check(&TokenKind::Concat) {
            return Ok(first);
        }
        let loc = self.loc();
        let mut operands = vec![first];
        while self.consume(&TokenKind::Concat) {
            operands.push(self.parse_additive_exp()?);
        }
        let operands = fold_string_chain(operands);
        if operands.len() == 1 {
            let mut only = operands.into_iter().next().expect("one operand");
            only.loc = loc;
            Ok(only)
        } else {
            Ok(Exp::new(ExpKind::Concat(operands), loc))
        }
    }

    fn parse_additive_exp(&mut self) -> Result<Exp, ParseError> {
        let mut exp = self.parse_multiplicative_exp()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => Binop::Add,
                Some(TokenKind::Minus) => Binop::Sub,
                _ => break,
            };
            let loc = self.loc();
            self.pos += 1;
            let rhs = self.parse_multiplicative_exp()?;
            exp = Exp::new(ExpKind::Binop(op, Box::new(exp), Box::new(rhs)), loc);
        }
        Ok(exp)
    }

    fn parse_multiplicative_exp(&mut self) -> Result<Exp, ParseError> {
        let mut exp = self.parse_unary_exp()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Star) => Binop::Mul,
                Some(TokenKind::Slash) => Binop::Div,
                Some(TokenKind::DoubleSlash) => Binop::IDiv,
                Some(TokenKind::Percent) => Binop::Mod,
                _ => break,
            };
            let loc = self.loc();
            self.pos += 1;
            let rhs = self.parse_unary_exp()?;
            exp = Exp::new(ExpKind::Binop(op, Box::new(exp), Box::new(rhs)), loc);
        }
        Ok(exp)
    }

    fn parse_unary_exp(&mut self) -> Result<Exp, ParseError> {
        let op = match self.peek() {
            Some(TokenKind::Not) => Some(Unop::Not),
            Some(TokenKind::Hash) => Some(Unop::Len),
            Some(TokenKind::Minus) => Some(Unop::Neg),
            Some(TokenKind::Tilde) => Some(Unop::BNot),
            _ => None,
        };
        match op {
            Some(op) => {
                let loc = self.loc();
                self.pos += 1;
                let operand = self.parse_unary_exp()?;
                Ok(fold_unop(op, operand, loc))
            }
            None => self.parse_pow_exp(),
        }
    }

    fn parse_pow_exp(&mut self) -> Result<Exp, ParseError> {
        let base = self.parse_cast_exp()?;
        if self.check(&TokenKind::Caret) {
            let loc = self.loc();
            self.pos += 1;
            // The exponent admits unary operators: `2 ^ -3`.
            let exponent = self.parse_unary_exp()?;
            Ok(Exp::new(
                ExpKind::Binop(Binop::Pow, Box::new(base), Box::new(exponent)),
                loc,
            ))
        } else {
            Ok(base)
        }
    }

    /// Casts bind tightest: `1 + x as float` is `1 + (x as float)`.
    fn parse_cast_exp(&mut self) -> Result<Exp, ParseError> {
        let mut exp = self.parse_simple_exp()?;
        while self.check(&TokenKind::As) {
            let loc = self.loc();
            self.pos += 1;
            let syntax = self.parse_type_syntax()?;
            exp = Exp::new(
                ExpKind::Cast {
                    exp: Box::new(exp),
                    syntax: Some(syntax),
                },
                loc,
            );
        }
        Ok(exp)
    }

    fn parse_simple_exp(&mut self) -> Result<Exp, ParseError> {
        let loc = self.loc();
        match self.peek() {
            Some(TokenKind::Nil) => {
                self.pos += 1;
                Ok(Exp::new(ExpKind::Nil, loc))
            }
            Some(TokenKind::True) => {
                self.pos += 1;
                Ok(Exp::new(ExpKind::Bool(true), loc))
            }
            Some(TokenKind::False) => {
                self.pos += 1;
                Ok(Exp::new(ExpKind::Bool(false), loc))
            }
            Some(TokenKind::Integer(_)) => match self.advance() {
                Some(Token {
                    kind: TokenKind::Integer(n),
                    ..
                }) => Ok(Exp::new(ExpKind::Integer(n), loc)),
                _ => unreachable!("peeked an integer"),
            },
            Some(TokenKind::Float(_)) => match self.advance() {
                Some(Token {
                    kind: TokenKind::Float(x),
                    ..
                }) => Ok(Exp::new(ExpKind::Float(x), loc)),
                _ => unreachable!("peeked a float"),
            },
            Some(TokenKind::Str(_)) => match self.advance() {
                Some(Token {
                    kind: TokenKind::Str(bytes),
                    ..
                }) => Ok(Exp::new(ExpKind::Str(bytes), loc)),
                _ => unreachable!("peeked a string"),
            },
            Some(TokenKind::LCurly) => self.parse_init_list(loc),
            _ => self.parse_suffixed_exp(),
        }
    }

    fn parse_init_list(&mut self, loc: Location) -> Result<Exp, ParseError> {
        self.expect(&TokenKind::LCurly, "LCurlyInit", "expected '{'")?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RCurly) {
            let field_loc = self.loc();
            let name = match (self.peek(), self.peek_at(1)) {
                (Some(TokenKind::Name(_)), Some(TokenKind::Assign)) => {
                    let (name, _) = self.expect_name("NameInit", "expected a field name")?;
                    self.pos += 1; // '='
                    Some(name)
                }
                _ => None,
            };
            let exp = self.parse_exp()?;
            fields.push(InitField {
                name,
                exp,
                loc: field_loc,
            });
            if !self.consume(&TokenKind::Comma) && !self.consume(&TokenKind::Semicolon) {
                break;
            }
        }
        self.expect(
            &TokenKind::RCurly,
            "RCurlyInit",
            "expected '}' to close the initializer list",
        )?;
        Ok(Exp::new(ExpKind::InitList(fields), loc))
    }

    /// Primary expression plus its left-associative suffix chain: dot
    /// access, bracket indexing, calls and method calls.
    fn parse_suffixed_exp(&mut self) -> Result<Exp, ParseError> {
        let loc = self.loc();
        let mut exp = match self.peek() {
            Some(TokenKind::Name(_)) => {
                let (name, _) = self.expect_name("ExpExpr", "expected an expression")?;
                Exp::new(
                    ExpKind::Var(Var::Name {
                        name,
                        loc,
                        refkind: None,
                    }),
                    loc,
                )
            }
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let inner = self.parse_exp()?;
                self.expect(
                    &TokenKind::RParen,
                    "RParExpr",
                    "expected ')' to close the expression",
                )?;
                Exp::new(ExpKind::Adjust(Box::new(inner)), loc)
            }
            _ => {
                return Err(ParseError::new(
                    "ExpExpr",
                    "expected an expression",
                    loc,
                ))
            }
        };

        loop {
            let suffix_loc = self.loc();
            match self.peek() {
                Some(TokenKind::Dot) => {
                    self.pos += 1;
                    let (name, _) =
                        self.expect_name("NameDot", "expected a name after '.'")?;
                    exp = Exp::new(
                        ExpKind::Var(Var::Dot {
                            exp: Box::new(exp),
                            name,
                            loc: suffix_loc,
                            refkind: None,
                        }),
                        suffix_loc,
                    );
                }
                Some(TokenKind::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_exp()?;
                    self.expect(
                        &TokenKind::RBracket,
                        "RBracketIndex",
                        "expected ']' to close the index",
                    )?;
                    exp = Exp::new(
                        ExpKind::Var(Var::Bracket {
                            array: Box::new(exp),
                            index: Box::new(index),
                            loc: suffix_loc,
                        }),
                        suffix_loc,
                    );
                }
                Some(TokenKind::LParen) => {
                    let args = self.parse_call_args()?;
                    exp = Exp::new(
                        ExpKind::Call(Call {
                            kind: CallKind::Function {
                                func: Box::new(exp),
                            },
                            args,
                            loc: suffix_loc,
                            result_types: Vec::new(),
                        }),
                        suffix_loc,
                    );
                }
                Some(TokenKind::Colon) => {
                    self.pos += 1;
                    let (name, _) =
                        self.expect_name("NameMethod", "expected a method name after ':'")?;
                    let args = self.parse_call_args()?;
                    exp = Exp::new(
                        ExpKind::Call(Call {
                            kind: CallKind::Method {
                                exp: Box::new(exp),
                                name,
                            },
                            args,
                            loc: suffix_loc,
                            result_types: Vec::new(),
                        }),
                        suffix_loc,
                    );
                }
                _ => break,
            }
        }
        Ok(exp)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Exp>, ParseError> {
        self.expect(&TokenKind::LParen, "LParCall", "expected '(' for the call")?;
        let args = if self.check(&TokenKind::RParen) {
            Vec::new()
        } else {
            self.parse_exp_list()?
        };
        self.expect(
            &TokenKind::RParen,
            "RParCall",
            "expected ')' to close the call",
        )?;
        Ok(args)
    }

    // ------------------------------------------------------------------
    // Type annotations
    // ------------------------------------------------------------------

    pub fn parse_type_syntax(&mut self) -> Result<TypeSyntax, ParseError> {
        let loc = self.loc();
        if self.check(&TokenKind::LParen) {
            // A parenthesized type list is only meaningful as the parameter
            // list of a function type.
            let params = self.parse_paren_type_list()?;
            self.expect(
                &TokenKind::Arrow,
                "ArrowType",
                "expected '->' after the parameter type list",
            )?;
            let rets = self.parse_ret_types()?;
            return Ok(self.with_option_suffix(TypeSyntax::Function { params, rets, loc }));
        }

        let base = self.parse_simple_type()?;
        if self.consume(&TokenKind::Arrow) {
            let rets = self.parse_ret_types()?;
            return Ok(self.with_option_suffix(TypeSyntax::Function {
                params: vec![base],
                rets,
                loc,
            }));
        }
        Ok(base)
    }

    /// Return types: a single type or a parenthesized list, possibly
    /// itself a function type (`->` is right-associative).
    fn parse_ret_types(&mut self) -> Result<Vec<TypeSyntax>, ParseError> {
        if self.check(&TokenKind::LParen) {
            let loc = self.loc();
            let types = self.parse_paren_type_list()?;
            if self.consume(&TokenKind::Arrow) {
                let rets = self.parse_ret_types()?;
                return Ok(vec![self.with_option_suffix(TypeSyntax::Function {
                    params: types,
                    rets,
                    loc,
                })]);
            }
            return Ok(types);
        }
        Ok(vec![self.parse_type_syntax()?])
    }

    fn parse_paren_type_list(&mut self) -> Result<Vec<TypeSyntax>, ParseError> {
        self.expect(&TokenKind::LParen, "LParType", "expected '(' in type")?;
        let mut types = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                types.push(self.parse_type_syntax()?);
                if !self.consume(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(
            &TokenKind::RParen,
            "RParType",
            "expected ')' to close the type list",
        )?;
        Ok(types)
    }

    fn parse_simple_type(&mut self) -> Result<TypeSyntax, ParseError> {
        let loc = self.loc();
        let base = match self.peek() {
            Some(TokenKind::Nil) => {
                self.pos += 1;
                TypeSyntax::Name {
                    name: "nil".to_string(),
                    loc,
                }
            }
            Some(TokenKind::Name(_)) => {
                let (name, _) = self.expect_name("TypeName", "expected a type name")?;
                if self.check(&TokenKind::Dot) {
                    self.pos += 1;
                    let (member, _) =
                        self.expect_name("NameType", "expected a type name after '.'")?;
                    TypeSyntax::QualName {
                        module: name,
                        name: member,
                        loc,
                    }
                } else {
                    TypeSyntax::Name { name, loc }
                }
            }
            Some(TokenKind::LCurly) => {
                self.pos += 1;
                let first = self.parse_type_syntax()?;
                let syntax = if self.consume(&TokenKind::Colon) {
                    let value = self.parse_type_syntax()?;
                    TypeSyntax::Map {
                        key: Box::new(first),
                        value: Box::new(value),
                        loc,
                    }
                } else {
                    TypeSyntax::Array {
                        elem: Box::new(first),
                        loc,
                    }
                };
                self.expect(
                    &TokenKind::RCurly,
                    "RCurlyType",
                    "expected '}' to close the type",
                )?;
                syntax
            }
            _ => {
                return Err(ParseError::new(
                    "TypeName",
                    "expected a type",
                    loc,
                ))
            }
        };
        Ok(self.with_option_suffix(base))
    }

    fn with_option_suffix(&mut self, mut syntax: TypeSyntax) -> TypeSyntax {
        while self.check(&TokenKind::Question) {
            let loc = self.loc();
            self.pos += 1;
            syntax = TypeSyntax::Option {
                base: Box::new(syntax),
                loc,
            };
        }
        syntax
    }
}

fn relabel(err: ParseError, label: &'static str, message: &str) -> ParseError {
    // Keep the deeper error when the failure happened past the first token
    // of the sub-expression; the labels name the production that failed.
    if err.label == "ExpExpr" {
        ParseError::new(label, message, err.loc)
    } else {
        err
    }
}

fn exp_to_var(exp: Exp) -> Result<Var, ParseError> {
    let loc = exp.loc;
    match exp.kind {
        ExpKind::Var(var) => Ok(var),
        _ => Err(ParseError::new(
            "VarAssign",
            "this expression cannot be assigned to",
            loc,
        )),
    }
}

/// Constant-fold the negation of numeric literals so `for` steps and
/// constant initializers written as `-1` stay compile-time constants.
fn fold_unop(op: Unop, operand: Exp, loc: Location) -> Exp {
    if op == Unop::Neg {
        match operand.kind {
            ExpKind::Integer(n) => return Exp::new(ExpKind::Integer(n.wrapping_neg()), loc),
            ExpKind::Float(x) => return Exp::new(ExpKind::Float(-x), loc),
            _ => {}
        }
    }
    Exp::new(ExpKind::Unop(op, Box::new(operand)), loc)
}

/// Merge adjacent string literals of a flattened concat chain.
fn fold_string_chain(operands: Vec<Exp>) -> Vec<Exp> {
    let mut folded: Vec<Exp> = Vec::with_capacity(operands.len());
    for exp in operands {
        match (&mut folded.last_mut(), &exp.kind) {
            (Some(Exp {
                kind: ExpKind::Str(acc),
                ..
            }), ExpKind::Str(next)) => {
                acc.extend_from_slice(next);
            }
            _ => folded.push(exp),
        }
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse(source: &str) -> Program {
        let tokens = lex(source).unwrap();
        parse_program("test.titan", "test", tokens).unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        let tokens = lex(source).unwrap();
        parse_program("test.titan", "test", tokens).unwrap_err()
    }

    fn parse_one_exp(source: &str) -> Exp {
        let program = parse(&format!("x = {}", source));
        match program.items.into_iter().next().unwrap() {
            TopLevel::Var(v) => v.value,
            other => panic!("expected a variable, got {:?}", other),
        }
    }

    #[test]
    fn test_function_declaration() {
        let program = parse("function add(a: integer, b: integer): integer return a + b end");
        assert_eq!(program.items.len(), 1);
        let f = program.find_func("add").unwrap();
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[0].name, "a");
        assert_eq!(f.ret_syntax.len(), 1);
        assert!(!f.islocal);
    }

    #[test]
    fn test_local_function() {
        let program = parse("local function helper() end");
        let f = program.find_func("helper").unwrap();
        assert!(f.islocal);
        assert!(f.ret_syntax.is_empty());
    }

    #[test]
    fn test_precedence_or_over_comparison() {
        // a == b or c < d  parses as  (a == b) or (c < d)
        let exp = parse_one_exp("a == b or c < d");
        match exp.kind {
            ExpKind::Binop(Binop::Or, lhs, rhs) => {
                assert!(matches!(lhs.kind, ExpKind::Binop(Binop::Eq, _, _)));
                assert!(matches!(rhs.kind, ExpKind::Binop(Binop::Lt, _, _)));
            }
            other => panic!("expected or, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let exp = parse_one_exp("1 + 2 * 3");
        match exp.kind {
            ExpKind::Binop(Binop::Add, _, rhs) => {
                assert!(matches!(rhs.kind, ExpKind::Binop(Binop::Mul, _, _)));
            }
            other => panic!("expected add, got {:?}", other),
        }
    }

    #[test]
    fn test_pow_right_associative_and_unary() {
        // -2 ^ 2 parses as -(2 ^ 2)
        let exp = parse_one_exp("-x ^ 2");
        assert!(matches!(exp.kind, ExpKind::Unop(Unop::Neg, _)));
        // 2 ^ -3 is legal: the exponent admits unary operators
        let exp = parse_one_exp("2 ^ -3");
        match exp.kind {
            ExpKind::Binop(Binop::Pow, _, rhs) => {
                assert_eq!(rhs.kind, ExpKind::Integer(-3));
            }
            other => panic!("expected pow, got {:?}", other),
        }
    }

    #[test]
    fn test_concat_flattens() {
        let exp = parse_one_exp("a .. b .. c");
        match exp.kind {
            ExpKind::Concat(operands) => assert_eq!(operands.len(), 3),
            other => panic!("expected concat, got {:?}", other),
        }
    }

    #[test]
    fn test_concat_folds_string_literals() {
        let exp = parse_one_exp("\"a\" .. \"b\" .. \"c\"");
        assert_eq!(exp.kind, ExpKind::Str(b"abc".to_vec()));
        // Partial folds keep non-literal operands in place.
        let exp = parse_one_exp("\"a\" .. \"b\" .. x");
        match exp.kind {
            ExpKind::Concat(operands) => {
                assert_eq!(operands.len(), 2);
                assert_eq!(operands[0].kind, ExpKind::Str(b"ab".to_vec()));
            }
            other => panic!("expected concat, got {:?}", other),
        }
    }

    #[test]
    fn test_unary_minus_constant_folds() {
        assert_eq!(parse_one_exp("-2").kind, ExpKind::Integer(-2));
        assert_eq!(parse_one_exp("-2.5").kind, ExpKind::Float(-2.5));
        assert!(matches!(
            parse_one_exp("-y").kind,
            ExpKind::Unop(Unop::Neg, _)
        ));
    }

    #[test]
    fn test_parenthesized_exp_is_adjust() {
        let exp = parse_one_exp("(f())");
        assert!(matches!(exp.kind, ExpKind::Adjust(_)));
    }

    #[test]
    fn test_suffix_chain() {
        let exp = parse_one_exp("mod.rec[1].field");
        // Outermost is the .field access.
        match exp.kind {
            ExpKind::Var(Var::Dot { exp: inner, name, .. }) => {
                assert_eq!(name, "field");
                assert!(matches!(
                    inner.kind,
                    ExpKind::Var(Var::Bracket { .. })
                ));
            }
            other => panic!("expected dot access, got {:?}", other),
        }
    }

    #[test]
    fn test_method_call() {
        let exp = parse_one_exp("obj:method(1)");
        match exp.kind {
            ExpKind::Call(call) => match call.kind {
                CallKind::Method { name, .. } => assert_eq!(name, "method"),
                other => panic!("expected method call, got {:?}", other),
            },
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_cast_binds_tightest() {
        let exp = parse_one_exp("1 + x as float");
        match exp.kind {
            ExpKind::Binop(Binop::Add, _, rhs) => {
                assert!(matches!(rhs.kind, ExpKind::Cast { .. }));
            }
            other => panic!("expected add, got {:?}", other),
        }
    }

    #[test]
    fn test_statements() {
        let program = parse(
            "function f(): integer\n\
             local x: integer = 1\n\
             while x < 10 do x = x + 1 end\n\
             repeat x = x - 1 until x == 5\n\
             if x > 0 then return x elseif x == 0 then return 0 else return -1 end\n\
             end",
        );
        let f = program.find_func("f").unwrap();
        assert_eq!(f.block.stats.len(), 4);
        assert!(matches!(f.block.stats[1], Stat::While { .. }));
        assert!(matches!(f.block.stats[2], Stat::Repeat { .. }));
        match &f.block.stats[3] {
            Stat::If {
                clauses,
                else_block,
                ..
            } => {
                assert_eq!(clauses.len(), 2);
                assert!(else_block.is_some());
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_for_with_negative_constant_step() {
        let program = parse("function f() for i = 10, 1, -2 do end end");
        let f = program.find_func("f").unwrap();
        match &f.block.stats[0] {
            Stat::For { step, .. } => {
                assert_eq!(step.as_ref().unwrap().kind, ExpKind::Integer(-2));
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_multi_assignment() {
        let program = parse("function f() local a, b = g() a, b = b, a end");
        let f = program.find_func("f").unwrap();
        match &f.block.stats[0] {
            Stat::Decl { decls, exps, .. } => {
                assert_eq!(decls.len(), 2);
                assert_eq!(exps.len(), 1);
            }
            other => panic!("expected local declaration, got {:?}", other),
        }
        match &f.block.stats[1] {
            Stat::Assign { vars, exps, .. } => {
                assert_eq!(vars.len(), 2);
                assert_eq!(exps.len(), 2);
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_record_produces_type_and_constructor() {
        let program = parse("record Point x: float y: float end");
        assert_eq!(program.items.len(), 2);
        match &program.items[0] {
            TopLevel::Record(r) => {
                assert_eq!(r.name, "Point");
                assert_eq!(r.fields.len(), 2);
            }
            other => panic!("expected record, got {:?}", other),
        }
        let constructor = program.find_func("Point.new").unwrap();
        assert_eq!(constructor.params.len(), 2);
        match &constructor.block.stats[0] {
            Stat::Return { exps, .. } => {
                assert!(matches!(exps[0].kind, ExpKind::InitList(_)));
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_import_forms() {
        let program = parse("local foo = import \"foo.bar\"\nlocal c = foreign import \"stdlib.h\"");
        match &program.items[0] {
            TopLevel::Import(i) => {
                assert_eq!(i.local_name, "foo");
                assert_eq!(i.module, "foo.bar");
            }
            other => panic!("expected import, got {:?}", other),
        }
        match &program.items[1] {
            TopLevel::ForeignImport(i) => assert_eq!(i.header, "stdlib.h"),
            other => panic!("expected foreign import, got {:?}", other),
        }
    }

    #[test]
    fn test_type_annotations() {
        let program = parse(
            "function f(xs: {integer}, m: {string: float}, g: integer -> float, o: string?) end",
        );
        let f = program.find_func("f").unwrap();
        assert!(matches!(
            f.params[0].syntax,
            Some(TypeSyntax::Array { .. })
        ));
        assert!(matches!(f.params[1].syntax, Some(TypeSyntax::Map { .. })));
        assert!(matches!(
            f.params[2].syntax,
            Some(TypeSyntax::Function { .. })
        ));
        assert!(matches!(
            f.params[3].syntax,
            Some(TypeSyntax::Option { .. })
        ));
    }

    #[test]
    fn test_function_type_right_associative() {
        let program = parse("function f(g: integer -> integer -> integer) end");
        let f = program.find_func("f").unwrap();
        match f.params[0].syntax.as_ref().unwrap() {
            TypeSyntax::Function { params, rets, .. } => {
                assert_eq!(params.len(), 1);
                assert!(matches!(rets[0], TypeSyntax::Function { .. }));
            }
            other => panic!("expected function type, got {:?}", other),
        }
    }

    #[test]
    fn test_multi_ret_function_type() {
        let program = parse("function f(g: (integer, integer) -> (integer, integer)) end");
        let f = program.find_func("f").unwrap();
        match f.params[0].syntax.as_ref().unwrap() {
            TypeSyntax::Function { params, rets, .. } => {
                assert_eq!(params.len(), 2);
                assert_eq!(rets.len(), 2);
            }
            other => panic!("expected function type, got {:?}", other),
        }
    }

    #[test]
    fn test_error_labels() {
        assert_eq!(parse_err("function f() while true end end").label, "DoWhile");
        assert_eq!(parse_err("function f() while do end end").label, "ExpWhile");
        assert_eq!(parse_err("function f(x").label, "RParPList");
        assert_eq!(parse_err("function f() if x then return 1 end").label, "EndFunc");
        assert_eq!(parse_err("function f() if x then else return 1 until").label, "EndIf");
        assert_eq!(parse_err("local x").label, "AssignVar");
        assert_eq!(parse_err("function f() x + 1 end").label, "ExpStat");
    }

    #[test]
    fn test_statements_after_return_are_rejected() {
        assert_eq!(
            parse_err("function f() return 1 local x = 2 end").label,
            "EndBlock"
        );
    }

    #[test]
    fn test_return_with_semicolon() {
        let program = parse("function f(): integer return 1; end");
        let f = program.find_func("f").unwrap();
        assert!(matches!(f.block.stats.last(), Some(Stat::Return { .. })));
    }

    #[test]
    fn test_break_statement() {
        let program = parse("function f() while true do break end end");
        let f = program.find_func("f").unwrap();
        match &f.block.stats[0] {
            Stat::While { block, .. } => {
                assert!(matches!(block.stats[0], Stat::Break { .. }));
            }
            other => panic!("expected while, got {:?}", other),
        }
    }

    #[test]
    fn test_init_list_fields() {
        let exp = parse_one_exp("{1, 2, 3}");
        match exp.kind {
            ExpKind::InitList(fields) => {
                assert_eq!(fields.len(), 3);
                assert!(fields.iter().all(|f| f.name.is_none()));
            }
            other => panic!("expected init list, got {:?}", other),
        }
        let exp = parse_one_exp("{x = 1, y = 2}");
        match exp.kind {
            ExpKind::InitList(fields) => {
                assert_eq!(fields[0].name.as_deref(), Some("x"));
                assert_eq!(fields[1].name.as_deref(), Some("y"));
            }
            other => panic!("expected init list, got {:?}", other),
        }
    }
}
