//! Lexer for Titan source text
//!
//! Longest-match tokenization with a fixed priority order for ties:
//! keywords beat identifiers, `...` beats `..` beats `.`, `<=` beats `<`,
//! `~=` beats `~`, `->` beats `-`, `//` beats `/`, and a long comment
//! opener beats `--`. Whitespace is consumed here; comments become tokens
//! the parser skips.

use crate::ast::Location;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Location,
}

impl Token {
    fn new(kind: TokenKind, loc: Location) -> Self {
        Token { kind, loc }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Record,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,
    Import,
    As,
    Foreign,

    // Operators and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    Caret,
    Hash,
    Ampersand,
    Tilde,
    Pipe,
    ShiftLeft,
    ShiftRight,
    EqEq,
    NotEq,
    LessEq,
    GreaterEq,
    Less,
    Greater,
    Assign,
    LParen,
    RParen,
    LCurly,
    RCurly,
    LBracket,
    RBracket,
    Semicolon,
    Colon,
    Comma,
    Dot,
    Concat,
    Ellipsis,
    Arrow,
    Question,

    // Tokens with captured semantic values
    Name(String),
    Integer(i64),
    Float(f64),
    /// Byte string: escapes may produce arbitrary bytes.
    Str(Vec<u8>),
    Comment,
}

impl TokenKind {
    /// Keyword lookup; keywords win over identifiers.
    fn keyword(name: &str) -> Option<TokenKind> {
        let kind = match name {
            "and" => TokenKind::And,
            "break" => TokenKind::Break,
            "do" => TokenKind::Do,
            "else" => TokenKind::Else,
            "elseif" => TokenKind::Elseif,
            "end" => TokenKind::End,
            "false" => TokenKind::False,
            "for" => TokenKind::For,
            "function" => TokenKind::Function,
            "goto" => TokenKind::Goto,
            "if" => TokenKind::If,
            "in" => TokenKind::In,
            "local" => TokenKind::Local,
            "nil" => TokenKind::Nil,
            "not" => TokenKind::Not,
            "or" => TokenKind::Or,
            "record" => TokenKind::Record,
            "repeat" => TokenKind::Repeat,
            "return" => TokenKind::Return,
            "then" => TokenKind::Then,
            "true" => TokenKind::True,
            "until" => TokenKind::Until,
            "while" => TokenKind::While,
            "import" => TokenKind::Import,
            "as" => TokenKind::As,
            "foreign" => TokenKind::Foreign,
            _ => return None,
        };
        Some(kind)
    }
}

/// Symbolic labels for lexer failures, as surfaced in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorLabel {
    MalformedNumber,
    InvalidEscape,
    MalformedEscapeDecimal,
    MalformedEscapeX,
    MalformedEscapeU,
    UnclosedShortString,
    UnclosedLongString,
    UnexpectedSymbol,
}

impl LexErrorLabel {
    pub fn label(self) -> &'static str {
        match self {
            LexErrorLabel::MalformedNumber => "MalformedNumber",
            LexErrorLabel::InvalidEscape => "InvalidEscape",
            LexErrorLabel::MalformedEscapeDecimal => "MalformedEscape_decimal",
            LexErrorLabel::MalformedEscapeX => "MalformedEscape_x",
            LexErrorLabel::MalformedEscapeU => "MalformedEscape_u",
            LexErrorLabel::UnclosedShortString => "UnclosedShortString",
            LexErrorLabel::UnclosedLongString => "UnclosedLongString",
            LexErrorLabel::UnexpectedSymbol => "UnexpectedSymbol",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            LexErrorLabel::MalformedNumber => "malformed number",
            LexErrorLabel::InvalidEscape => "invalid escape sequence in string",
            LexErrorLabel::MalformedEscapeDecimal => "decimal escape too large",
            LexErrorLabel::MalformedEscapeX => "\\x escape expects two hexadecimal digits",
            LexErrorLabel::MalformedEscapeU => "malformed \\u escape",
            LexErrorLabel::UnclosedShortString => "unclosed string literal",
            LexErrorLabel::UnclosedLongString => "unclosed long string or long comment",
            LexErrorLabel::UnexpectedSymbol => "unexpected symbol",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub label: LexErrorLabel,
    pub loc: Location,
}

impl LexError {
    fn new(label: LexErrorLabel, loc: Location) -> Self {
        LexError { label, loc }
    }
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label.message(), self.label.label())
    }
}

/// Tokenize a whole source file. Stops at the first error.
pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn loc(&self) -> Location {
        Location::new(self.line, self.column)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        self.column += 1;
        Some(c)
    }

    /// Consume a newline at the current position (`\n`, `\r`, `\r\n` or
    /// `\n\r` all count as one line end).
    fn newline(&mut self) {
        let first = self.src[self.pos];
        self.pos += 1;
        if let Some(second) = self.peek() {
            if (second == b'\n' || second == b'\r') && second != first {
                self.pos += 1;
            }
        }
        self.line += 1;
        self.column = 1;
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        self.skip_whitespace();
        let loc = self.loc();
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(None),
        };

        let kind = match c {
            b'0'..=b'9' => self.read_number(loc)?,
            b'.' if matches!(self.peek_at(1), Some(b'0'..=b'9')) => self.read_number(loc)?,
            b'"' | b'\'' => {
                self.bump();
                self.read_short_string(c, loc)?
            }
            b'[' => {
                if let Some(level) = self.long_bracket_level() {
                    self.read_long_string(level, loc)?
                } else {
                    self.bump();
                    TokenKind::LBracket
                }
            }
            b'-' => {
                self.bump();
                match self.peek() {
                    Some(b'-') => {
                        self.bump();
                        self.read_comment(loc)?
                    }
                    Some(b'>') => {
                        self.bump();
                        TokenKind::Arrow
                    }
                    _ => TokenKind::Minus,
                }
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.read_name(),
            _ => {
                self.bump();
                match c {
                    b'+' => TokenKind::Plus,
                    b'*' => TokenKind::Star,
                    b'/' => {
                        if self.peek() == Some(b'/') {
                            self.bump();
                            TokenKind::DoubleSlash
                        } else {
                            TokenKind::Slash
                        }
                    }
                    b'%' => TokenKind::Percent,
                    b'^' => TokenKind::Caret,
                    b'#' => TokenKind::Hash,
                    b'&' => TokenKind::Ampersand,
                    b'~' => {
                        if self.peek() == Some(b'=') {
                            self.bump();
                            TokenKind::NotEq
                        } else {
                            TokenKind::Tilde
                        }
                    }
                    b'|' => TokenKind::Pipe,
                    b'<' => match self.peek() {
                        Some(b'<') => {
                            self.bump();
                            TokenKind::ShiftLeft
                        }
                        Some(b'=') => {
                            self.bump();
                            TokenKind::LessEq
                        }
                        _ => TokenKind::Less,
                    },
                    b'>' => match self.peek() {
                        Some(b'>') => {
                            self.bump();
                            TokenKind::ShiftRight
                        }
                        Some(b'=') => {
                            self.bump();
                            TokenKind::GreaterEq
                        }
                        _ => TokenKind::Greater,
                    },
                    b'=' => {
                        if self.peek() == Some(b'=') {
                            self.bump();
                            TokenKind::EqEq
                        } else {
                            TokenKind::Assign
                        }
                    }
                    b'(' => TokenKind::LParen,
                    b')' => TokenKind::RParen,
                    b'{' => TokenKind::LCurly,
                    b'}' => TokenKind::RCurly,
                    b']' => TokenKind::RBracket,
                    b';' => TokenKind::Semicolon,
                    b':' => TokenKind::Colon,
                    b',' => TokenKind::Comma,
                    b'?' => TokenKind::Question,
                    b'.' => match self.peek() {
                        Some(b'.') => {
                            self.bump();
                            if self.peek() == Some(b'.') {
                                self.bump();
                                TokenKind::Ellipsis
                            } else {
                                TokenKind::Concat
                            }
                        }
                        _ => TokenKind::Dot,
                    },
                    _ => return Err(LexError::new(LexErrorLabel::UnexpectedSymbol, loc)),
                }
            }
        };
        Ok(Some(Token::new(kind, loc)))
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\t' | 0x0b | 0x0c => {
                    self.pos += 1;
                    self.column += 1;
                }
                b'\n' | b'\r' => self.newline(),
                _ => break,
            }
        }
    }

    fn read_name(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        // Names are scanned over ASCII identifier bytes only.
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default();
        TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Name(text.to_string()))
    }

    // ------------------------------------------------------------------
    // Numbers
    // ------------------------------------------------------------------

    fn read_number(&mut self, loc: Location) -> Result<TokenKind, LexError> {
        let is_hex = self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x') | Some(b'X'))
            && self.peek_at(2).map(is_hex_digit_or_dot).unwrap_or(false);

        let kind = if is_hex {
            self.bump();
            self.bump();
            self.read_hex_number(loc)?
        } else {
            self.read_decimal_number(loc)?
        };

        // A trailing identifier character makes the whole literal malformed
        // (`1abc`, `0x1fg`, and after a fraction also `1.2.3`).
        if let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                return Err(LexError::new(LexErrorLabel::MalformedNumber, loc));
            }
        }
        Ok(kind)
    }

    fn read_decimal_number(&mut self, loc: Location) -> Result<TokenKind, LexError> {
        let start = self.pos;
        let mut seen_dot = false;
        let mut seen_exp = false;

        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => {
                    self.bump();
                }
                b'.' if !seen_dot && !seen_exp => {
                    seen_dot = true;
                    self.bump();
                }
                b'e' | b'E' if !seen_exp => {
                    seen_exp = true;
                    self.bump();
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        self.bump();
                    }
                    if !matches!(self.peek(), Some(b'0'..=b'9')) {
                        return Err(LexError::new(LexErrorLabel::MalformedNumber, loc));
                    }
                }
                _ => break,
            }
        }

        // A second dot right after a fraction is `1.2.3`, not concatenation.
        if (seen_dot || seen_exp) && self.peek() == Some(b'.') {
            return Err(LexError::new(LexErrorLabel::MalformedNumber, loc));
        }

        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default();
        if seen_dot || seen_exp {
            let value: f64 = text
                .parse()
                .map_err(|_| LexError::new(LexErrorLabel::MalformedNumber, loc))?;
            Ok(TokenKind::Float(value))
        } else {
            // Integers that do not fit 64 bits fall back to float, as the
            // host runtime's number parser does.
            match text.parse::<i64>() {
                Ok(value) => Ok(TokenKind::Integer(value)),
                Err(_) => {
                    let value: f64 = text
                        .parse()
                        .map_err(|_| LexError::new(LexErrorLabel::MalformedNumber, loc))?;
                    Ok(TokenKind::Float(value))
                }
            }
        }
    }

    fn read_hex_number(&mut self, loc: Location) -> Result<TokenKind, LexError> {
        let mut int_value: u64 = 0;
        let mut float_value: f64 = 0.0;
        let mut digits = 0usize;
        let mut fraction_digits = 0usize;
        let mut seen_dot = false;
        let mut seen_exp = false;
        let mut exponent: i32 = 0;

        while let Some(c) = self.peek() {
            match c {
                _ if c.is_ascii_hexdigit() => {
                    let d = hex_value(c);
                    // Hexadecimal integers wrap around 64 bits.
                    int_value = int_value.wrapping_mul(16).wrapping_add(u64::from(d));
                    float_value = float_value * 16.0 + f64::from(d);
                    if seen_dot {
                        fraction_digits += 1;
                    }
                    digits += 1;
                    self.bump();
                }
                b'.' if !seen_dot => {
                    seen_dot = true;
                    self.bump();
                }
                b'p' | b'P' => {
                    seen_exp = true;
                    self.bump();
                    let negative = match self.peek() {
                        Some(b'-') => {
                            self.bump();
                            true
                        }
                        Some(b'+') => {
                            self.bump();
                            false
                        }
                        _ => false,
                    };
                    if !matches!(self.peek(), Some(b'0'..=b'9')) {
                        return Err(LexError::new(LexErrorLabel::MalformedNumber, loc));
                    }
                    while let Some(b'0'..=b'9') = self.peek() {
                        exponent = exponent.saturating_mul(10)
                            + i32::from(self.src[self.pos] - b'0');
                        self.bump();
                    }
                    if negative {
                        exponent = -exponent;
                    }
                    break;
                }
                _ => break,
            }
        }

        if digits == 0 {
            return Err(LexError::new(LexErrorLabel::MalformedNumber, loc));
        }
        if (seen_dot || seen_exp) && self.peek() == Some(b'.') {
            return Err(LexError::new(LexErrorLabel::MalformedNumber, loc));
        }

        if seen_dot || seen_exp {
            let scale = exponent - 4 * fraction_digits as i32;
            Ok(TokenKind::Float(float_value * (2f64).powi(scale)))
        } else {
            Ok(TokenKind::Integer(int_value as i64))
        }
    }

    // ------------------------------------------------------------------
    // Strings and comments
    // ------------------------------------------------------------------

    fn read_short_string(&mut self, quote: u8, loc: Location) -> Result<TokenKind, LexError> {
        let mut bytes = Vec::new();
        loop {
            let c = match self.peek() {
                None => return Err(LexError::new(LexErrorLabel::UnclosedShortString, loc)),
                Some(c) => c,
            };
            match c {
                b'\n' | b'\r' => {
                    return Err(LexError::new(LexErrorLabel::UnclosedShortString, loc))
                }
                _ if c == quote => {
                    self.bump();
                    return Ok(TokenKind::Str(bytes));
                }
                b'\\' => {
                    self.bump();
                    self.read_escape(&mut bytes, loc)?;
                }
                _ => {
                    bytes.push(c);
                    self.bump();
                }
            }
        }
    }

    fn read_escape(&mut self, bytes: &mut Vec<u8>, loc: Location) -> Result<(), LexError> {
        let escape_loc = self.loc();
        let c = match self.peek() {
            None => return Err(LexError::new(LexErrorLabel::UnclosedShortString, loc)),
            Some(c) => c,
        };
        match c {
            b'a' => {
                bytes.push(0x07);
                self.bump();
            }
            b'b' => {
                bytes.push(0x08);
                self.bump();
            }
            b'f' => {
                bytes.push(0x0c);
                self.bump();
            }
            b'n' => {
                bytes.push(b'\n');
                self.bump();
            }
            b'r' => {
                bytes.push(b'\r');
                self.bump();
            }
            b't' => {
                bytes.push(b'\t');
                self.bump();
            }
            b'v' => {
                bytes.push(0x0b);
                self.bump();
            }
            b'\\' => {
                bytes.push(b'\\');
                self.bump();
            }
            b'\'' => {
                bytes.push(b'\'');
                self.bump();
            }
            b'"' => {
                bytes.push(b'"');
                self.bump();
            }
            // An escaped line break is normalized to a single newline.
            b'\n' | b'\r' => {
                self.newline();
                bytes.push(b'\n');
            }
            b'0'..=b'9' => {
                let mut value: u32 = 0;
                let mut count = 0;
                while count < 3 {
                    match self.peek() {
                        Some(d @ b'0'..=b'9') => {
                            value = value * 10 + u32::from(d - b'0');
                            self.bump();
                            count += 1;
                        }
                        _ => break,
                    }
                }
                if value > 255 {
                    return Err(LexError::new(
                        LexErrorLabel::MalformedEscapeDecimal,
                        escape_loc,
                    ));
                }
                bytes.push(value as u8);
            }
            b'x' => {
                self.bump();
                let mut value: u32 = 0;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d) if d.is_ascii_hexdigit() => {
                            value = value * 16 + u32::from(hex_value(d));
                            self.bump();
                        }
                        _ => {
                            return Err(LexError::new(LexErrorLabel::MalformedEscapeX, escape_loc))
                        }
                    }
                }
                bytes.push(value as u8);
            }
            b'u' => {
                self.bump();
                if self.peek() != Some(b'{') {
                    return Err(LexError::new(LexErrorLabel::MalformedEscapeU, escape_loc));
                }
                self.bump();
                let mut value: u32 = 0;
                let mut digits = 0;
                while let Some(d) = self.peek() {
                    if d.is_ascii_hexdigit() {
                        if value > 0x7FFF_FFFF / 16 {
                            return Err(LexError::new(
                                LexErrorLabel::MalformedEscapeU,
                                escape_loc,
                            ));
                        }
                        value = value * 16 + u32::from(hex_value(d));
                        digits += 1;
                        self.bump();
                    } else {
                        break;
                    }
                }
                if digits == 0 || self.peek() != Some(b'}') {
                    return Err(LexError::new(LexErrorLabel::MalformedEscapeU, escape_loc));
                }
                self.bump();
                push_utf8(bytes, value);
            }
            _ => return Err(LexError::new(LexErrorLabel::InvalidEscape, escape_loc)),
        }
        Ok(())
    }

    /// If the cursor sits on a long-bracket opener `[=*[`, return its level
    /// without consuming anything.
    fn long_bracket_level(&self) -> Option<usize> {
        debug_assert_eq!(self.peek(), Some(b'['));
        let mut level = 0;
        loop {
            match self.peek_at(1 + level) {
                Some(b'=') => level += 1,
                Some(b'[') => return Some(level),
                _ => return None,
            }
        }
    }

    /// Read a `[=*[ … ]=*]` long string; the opener has been detected but
    /// not consumed. Content is raw; an initial newline is stripped.
    fn read_long_string(&mut self, level: usize, loc: Location) -> Result<TokenKind, LexError> {
        Ok(TokenKind::Str(self.read_long_bracket(level, loc)?))
    }

    fn read_long_bracket(&mut self, level: usize, loc: Location) -> Result<Vec<u8>, LexError> {
        for _ in 0..level + 2 {
            self.bump();
        }
        if matches!(self.peek(), Some(b'\n') | Some(b'\r')) {
            self.newline();
        }
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None => return Err(LexError::new(LexErrorLabel::UnclosedLongString, loc)),
                Some(b']') => {
                    let mut close = 1;
                    while self.peek_at(close) == Some(b'=') {
                        close += 1;
                    }
                    if close == level + 1 && self.peek_at(close) == Some(b']') {
                        for _ in 0..level + 2 {
                            self.bump();
                        }
                        return Ok(bytes);
                    }
                    bytes.push(b']');
                    self.bump();
                }
                Some(b'\n') | Some(b'\r') => {
                    self.newline();
                    bytes.push(b'\n');
                }
                Some(c) => {
                    bytes.push(c);
                    self.bump();
                }
            }
        }
    }

    /// Read a comment; `--` has already been consumed.
    fn read_comment(&mut self, loc: Location) -> Result<TokenKind, LexError> {
        if self.peek() == Some(b'[') {
            if let Some(level) = self.long_bracket_level() {
                self.read_long_bracket(level, loc)?;
                return Ok(TokenKind::Comment);
            }
        }
        while let Some(c) = self.peek() {
            if c == b'\n' || c == b'\r' {
                break;
            }
            self.bump();
        }
        Ok(TokenKind::Comment)
    }
}

fn is_hex_digit_or_dot(c: u8) -> bool {
    c.is_ascii_hexdigit() || c == b'.'
}

fn hex_value(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => c - b'A' + 10,
    }
}

/// UTF-8 encode a code point, accepting the extended range up to 2^31-1
/// that `\u{…}` escapes allow (sequences up to six bytes).
fn push_utf8(bytes: &mut Vec<u8>, value: u32) {
    if value < 0x80 {
        bytes.push(value as u8);
        return;
    }
    let mut buff = [0u8; 6];
    let mut n = 0;
    let mut mfs: u32 = 0x3f; // maximum value that fits in the first byte
    let mut value = value;
    loop {
        n += 1;
        buff[6 - n] = (0x80 | (value & 0x3f)) as u8;
        value >>= 6;
        mfs >>= 1;
        if value <= mfs {
            break;
        }
    }
    n += 1;
    buff[6 - n] = ((!mfs << 1) | value) as u8;
    bytes.extend_from_slice(&buff[6 - n..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn lex_error(source: &str) -> LexErrorLabel {
        lex(source).unwrap_err().label
    }

    #[test]
    fn test_keywords_beat_identifiers() {
        assert_eq!(
            kinds("while whilex"),
            vec![TokenKind::While, TokenKind::Name("whilex".into())]
        );
    }

    #[test]
    fn test_longest_match_ties() {
        assert_eq!(
            kinds("... .. . <= < ~= ~ -> - // /"),
            vec![
                TokenKind::Ellipsis,
                TokenKind::Concat,
                TokenKind::Dot,
                TokenKind::LessEq,
                TokenKind::Less,
                TokenKind::NotEq,
                TokenKind::Tilde,
                TokenKind::Arrow,
                TokenKind::Minus,
                TokenKind::DoubleSlash,
                TokenKind::Slash,
            ]
        );
    }

    #[test]
    fn test_shift_and_comparison() {
        assert_eq!(
            kinds("<< >> == = >="),
            vec![
                TokenKind::ShiftLeft,
                TokenKind::ShiftRight,
                TokenKind::EqEq,
                TokenKind::Assign,
                TokenKind::GreaterEq,
            ]
        );
    }

    #[test]
    fn test_integers_and_floats() {
        assert_eq!(
            kinds("0 42 3.14 1e3 1E-2 .5"),
            vec![
                TokenKind::Integer(0),
                TokenKind::Integer(42),
                TokenKind::Float(3.14),
                TokenKind::Float(1000.0),
                TokenKind::Float(0.01),
                TokenKind::Float(0.5),
            ]
        );
    }

    #[test]
    fn test_hex_numbers() {
        assert_eq!(
            kinds("0xff 0x10 0x1p4 0x.8"),
            vec![
                TokenKind::Integer(255),
                TokenKind::Integer(16),
                TokenKind::Float(16.0),
                TokenKind::Float(0.5),
            ]
        );
    }

    #[test]
    fn test_huge_decimal_integer_becomes_float() {
        assert_eq!(
            kinds("12345678901234567890123"),
            vec![TokenKind::Float(12345678901234567890123.0)]
        );
    }

    #[test]
    fn test_malformed_numbers() {
        assert_eq!(lex_error("1.2.3"), LexErrorLabel::MalformedNumber);
        assert_eq!(lex_error("1abc"), LexErrorLabel::MalformedNumber);
        assert_eq!(lex_error("0x"), LexErrorLabel::MalformedNumber);
        assert_eq!(lex_error("1e"), LexErrorLabel::MalformedNumber);
    }

    #[test]
    fn test_integer_concat_is_not_malformed() {
        assert_eq!(
            kinds("1 .. 2"),
            vec![
                TokenKind::Integer(1),
                TokenKind::Concat,
                TokenKind::Integer(2),
            ]
        );
    }

    #[test]
    fn test_short_string_escapes() {
        assert_eq!(
            kinds(r#""a\tb\"c\\d""#),
            vec![TokenKind::Str(b"a\tb\"c\\d".to_vec())]
        );
        assert_eq!(kinds(r#"'\65\066\x41'"#), vec![TokenKind::Str(b"A\x42A".to_vec())]);
    }

    #[test]
    fn test_decimal_escape_boundary() {
        // \255 is the largest accepted decimal escape; \256 is rejected.
        assert_eq!(kinds(r#""\255""#), vec![TokenKind::Str(vec![255])]);
        assert_eq!(lex_error(r#""\256""#), LexErrorLabel::MalformedEscapeDecimal);
    }

    #[test]
    fn test_unicode_escape() {
        assert_eq!(
            kinds(r#""\u{48}\u{e9}""#),
            vec![TokenKind::Str(vec![0x48, 0xc3, 0xa9])]
        );
        assert_eq!(lex_error(r#""\u{}""#), LexErrorLabel::MalformedEscapeU);
        assert_eq!(lex_error(r#""\u48""#), LexErrorLabel::MalformedEscapeU);
    }

    #[test]
    fn test_escaped_newline_normalizes() {
        assert_eq!(kinds("\"a\\\r\nb\""), vec![TokenKind::Str(b"a\nb".to_vec())]);
        assert_eq!(kinds("\"a\\\n\rb\""), vec![TokenKind::Str(b"a\nb".to_vec())]);
    }

    #[test]
    fn test_invalid_escape() {
        assert_eq!(lex_error(r#""\q""#), LexErrorLabel::InvalidEscape);
        assert_eq!(lex_error(r#""\x4g""#), LexErrorLabel::MalformedEscapeX);
    }

    #[test]
    fn test_unclosed_short_string() {
        assert_eq!(lex_error("\"abc"), LexErrorLabel::UnclosedShortString);
        assert_eq!(lex_error("\"abc\ndef\""), LexErrorLabel::UnclosedShortString);
    }

    #[test]
    fn test_long_strings() {
        assert_eq!(kinds("[[hello]]"), vec![TokenKind::Str(b"hello".to_vec())]);
        // Matching equals count; inner closers of other levels are content.
        assert_eq!(
            kinds("[==[a]]b]==]"),
            vec![TokenKind::Str(b"a]]b".to_vec())]
        );
        // Initial newline is stripped, content is raw.
        assert_eq!(
            kinds("[[\nline\\n]]"),
            vec![TokenKind::Str(b"line\\n".to_vec())]
        );
    }

    #[test]
    fn test_unclosed_long_string() {
        assert_eq!(lex_error("[[abc]"), LexErrorLabel::UnclosedLongString);
        assert_eq!(lex_error("--[[abc"), LexErrorLabel::UnclosedLongString);
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("a -- short\nb --[[ long\ncomment ]] c"),
            vec![
                TokenKind::Name("a".into()),
                TokenKind::Comment,
                TokenKind::Name("b".into()),
                TokenKind::Comment,
                TokenKind::Name("c".into()),
            ]
        );
    }

    #[test]
    fn test_long_comment_beats_short() {
        // `--[[ ]]` is one long comment, not `--` plus brackets.
        assert_eq!(kinds("--[[x]]y"), vec![TokenKind::Comment, TokenKind::Name("y".into())]);
    }

    #[test]
    fn test_locations() {
        let tokens = lex("local x\n  = 1").unwrap();
        assert_eq!(tokens[0].loc, Location::new(1, 1));
        assert_eq!(tokens[1].loc, Location::new(1, 7));
        assert_eq!(tokens[2].loc, Location::new(2, 3));
        assert_eq!(tokens[3].loc, Location::new(2, 5));
    }

    #[test]
    fn test_question_for_option_types() {
        assert_eq!(
            kinds("x: integer?"),
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Colon,
                TokenKind::Name("integer".into()),
                TokenKind::Question,
            ]
        );
    }
}
