//! Type terms for Titan
//!
//! Record shapes live in the session registry keyed by fully qualified type
//! name (FQTN, `module.Record`); the `Nominal` term refers to them by name
//! only, so mutually recursive records never need direct pointers. Two
//! nominal types are equal iff their FQTNs are equal.

use std::collections::{BTreeMap, HashMap};

/// A Titan type term.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    /// Supertype of every first-class value; flowing out of it requires a
    /// runtime-checked coercion.
    Value,
    /// The type of nodes whose checking failed; later passes skip it.
    Invalid,
    Array(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Function(FunctionType),
    /// A record type referenced by FQTN.
    Nominal(String),
    /// `T?`: values of `T` together with `nil`.
    Option(Box<Type>),
    /// Transient type of an initializer list before its context hint lands.
    InitList(Vec<Type>),
    Module(ModuleType),
    ForeignModule(String),
    /// The type of a type: what a record name denotes in value position
    /// (the holder of the implicit `new` constructor).
    TypeOf(Box<Type>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub rets: Vec<Type>,
    pub vararg: bool,
}

impl FunctionType {
    pub fn new(params: Vec<Type>, rets: Vec<Type>) -> Self {
        FunctionType {
            params,
            rets,
            vararg: false,
        }
    }
}

/// The shape of a record, stored once per FQTN in the session registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub fqtn: String,
    /// Declaration-ordered fields.
    pub fields: Vec<(String, Type)>,
}

impl RecordType {
    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields
            .iter()
            .find_map(|(f, ty)| if f == name { Some(ty) } else { None })
    }

    /// The record's short name (FQTN with the module prefix stripped).
    pub fn short_name(&self) -> &str {
        self.fqtn.rsplit('.').next().unwrap_or(&self.fqtn)
    }
}

/// One exported member of a module: its type and its slot in the module's
/// globals table.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleMember {
    pub ty: Type,
    pub slot: usize,
}

/// The type of a whole module, as seen from an import site.
///
/// Members are kept sorted by name so the serialized form is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleType {
    pub name: String,
    pub members: BTreeMap<String, ModuleMember>,
}

impl ModuleType {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleType {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn member(&self, name: &str) -> Option<&ModuleMember> {
        self.members.get(name)
    }
}

/// Loader memoization state for one module.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleState {
    /// The loader re-entered this module while still loading it; an import
    /// that observes this state is a circular reference.
    InProgress,
    Loaded(ModuleType),
}

/// Per-compilation-session state: the record registry and the loader memo.
///
/// The original kept both as process globals; making them an explicit value
/// keeps multi-session use and tests clean. Cleared by dropping the session.
#[derive(Debug, Default)]
pub struct Session {
    /// FQTN -> record shape. Populated monotonically by the checker.
    registry: HashMap<String, RecordType>,
    /// Module name -> load state, shared by every loader implementation.
    pub modules: HashMap<String, ModuleState>,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    /// Register a record shape. The first registration of an FQTN wins;
    /// re-registration with the same shape is a no-op, which keeps repeated
    /// loads of the same module harmless.
    pub fn add_record(&mut self, rec: RecordType) {
        self.registry.entry(rec.fqtn.clone()).or_insert(rec);
    }

    pub fn record(&self, fqtn: &str) -> Option<&RecordType> {
        self.registry.get(fqtn)
    }
}

impl Type {
    /// Whether runtime values of this type are garbage-collected (or boxed
    /// as a `TValue` that may hold one) and therefore need a reserved stack
    /// slot while live in generated code.
    pub fn is_gc(&self) -> bool {
        matches!(
            self,
            Type::String
                | Type::Value
                | Type::Array(_)
                | Type::Map(_, _)
                | Type::Nominal(_)
                | Type::Option(_)
                | Type::Function(_)
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Integer | Type::Float)
    }

    /// Types that may appear as a value at runtime (excludes the
    /// compile-time-only terms).
    pub fn is_first_class(&self) -> bool {
        !matches!(
            self,
            Type::Invalid
                | Type::InitList(_)
                | Type::Module(_)
                | Type::ForeignModule(_)
                | Type::TypeOf(_)
        )
    }

    /// Truthiness classification: `None` when the truth value depends on
    /// the runtime value, `Some(b)` when it is statically known.
    pub fn static_truthiness(&self) -> Option<bool> {
        match self {
            Type::Nil => Some(false),
            Type::Boolean | Type::Value | Type::Option(_) => None,
            _ => Some(true),
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Nil => write!(f, "nil"),
            Type::Boolean => write!(f, "boolean"),
            Type::Integer => write!(f, "integer"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Value => write!(f, "value"),
            Type::Invalid => write!(f, "invalid type"),
            Type::Array(elem) => write!(f, "{{{}}}", elem),
            Type::Map(k, v) => write!(f, "{{{}: {}}}", k, v),
            Type::Function(ft) => {
                let params: Vec<String> = ft.params.iter().map(|t| t.to_string()).collect();
                let rets: Vec<String> = ft.rets.iter().map(|t| t.to_string()).collect();
                write!(f, "({}) -> ({})", params.join(", "), rets.join(", "))
            }
            Type::Nominal(fqtn) => write!(f, "{}", fqtn),
            Type::Option(base) => write!(f, "{}?", base),
            Type::InitList(_) => write!(f, "initializer list"),
            Type::Module(m) => write!(f, "module {}", m.name),
            Type::ForeignModule(name) => write!(f, "foreign module {}", name),
            Type::TypeOf(t) => write!(f, "type {}", t),
        }
    }
}

// ============================================================================
// Module type serialization
// ============================================================================
//
// The emitted `<module>_types` C function and the `.types` artifact written
// next to a compiled module both carry this text, so the loader can
// type-check imports of an already-compiled module without its source:
//
//   module foo.bar
//   func f @3 : (integer, integer) -> (integer)
//   record Point : new @4 (x : float, y : float)
//   var a @2 : integer

impl ModuleType {
    /// Render the canonical serialized form; members print in name order,
    /// record members with their field lists resolved through `session`.
    pub fn serialize_with(&self, session: &Session) -> String {
        let mut out = format!("module {}\n", self.name);
        for (name, member) in &self.members {
            match &member.ty {
                Type::TypeOf(inner) => {
                    if let Type::Nominal(fqtn) = inner.as_ref() {
                        let fields = match session.record(fqtn) {
                            Some(rec) => rec
                                .fields
                                .iter()
                                .map(|(f, ty)| format!("{} : {}", f, ty))
                                .collect::<Vec<_>>()
                                .join(", "),
                            None => String::new(),
                        };
                        out.push_str(&format!(
                            "record {} @{} : ({})\n",
                            name, member.slot, fields
                        ));
                    }
                }
                Type::Function(_) => {
                    out.push_str(&format!("func {} @{} : {}\n", name, member.slot, member.ty));
                }
                ty => {
                    out.push_str(&format!("var {} @{} : {}\n", name, member.slot, ty));
                }
            }
        }
        out
    }

    /// Parse a serialized module type, registering record shapes into
    /// `session`. Inverse of [`ModuleType::serialize_with`].
    pub fn parse(text: &str, session: &mut Session) -> Result<ModuleType, String> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().ok_or("empty module type")?;
        let name = header
            .strip_prefix("module ")
            .ok_or_else(|| format!("bad module type header: '{}'", header))?
            .trim()
            .to_string();

        let mut module = ModuleType::new(name.clone());
        for line in lines {
            let line = line.trim();
            let (kind, rest) = line
                .split_once(' ')
                .ok_or_else(|| format!("bad module type line: '{}'", line))?;
            let (member_name, rest) = rest
                .split_once(" @")
                .ok_or_else(|| format!("missing slot in module type line: '{}'", line))?;
            let (slot_str, type_str) = rest
                .split_once(" : ")
                .ok_or_else(|| format!("missing type in module type line: '{}'", line))?;
            let slot: usize = slot_str
                .trim()
                .parse()
                .map_err(|_| format!("bad slot in module type line: '{}'", line))?;

            let ty = match kind {
                "record" => {
                    let fqtn = format!("{}.{}", name, member_name);
                    let fields = parse_record_fields(type_str)?;
                    session.add_record(RecordType {
                        fqtn: fqtn.clone(),
                        fields,
                    });
                    Type::TypeOf(Box::new(Type::Nominal(fqtn)))
                }
                "func" | "var" => parse_type(type_str)?,
                other => return Err(format!("unknown module type entry '{}'", other)),
            };
            module
                .members
                .insert(member_name.to_string(), ModuleMember { ty, slot });
        }
        Ok(module)
    }
}

fn parse_record_fields(text: &str) -> Result<Vec<(String, Type)>, String> {
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| format!("bad record field list: '{}'", text))?;
    let mut fields = Vec::new();
    if inner.trim().is_empty() {
        return Ok(fields);
    }
    for part in split_top_level(inner) {
        let (fname, ftype) = part
            .split_once(" : ")
            .ok_or_else(|| format!("bad record field: '{}'", part))?;
        fields.push((fname.trim().to_string(), parse_type(ftype)?));
    }
    Ok(fields)
}

/// Split on top-level commas, ignoring commas nested in `(){}`.
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '(' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Parse one serialized type term (the `Display` syntax above).
pub fn parse_type(text: &str) -> Result<Type, String> {
    let text = text.trim();

    // Option suffix binds last: everything up to a trailing '?' is the base.
    if let Some(base) = text.strip_suffix('?') {
        if !base.is_empty() && balanced(base) {
            return Ok(Type::Option(Box::new(parse_type(base)?)));
        }
    }

    // Function arrow at top level.
    if let Some(idx) = find_top_level_arrow(text) {
        let (params_str, rets_str) = (&text[..idx], &text[idx + 2..]);
        let params = parse_type_list(params_str)?;
        let rets = parse_type_list(rets_str)?;
        return Ok(Type::Function(FunctionType::new(params, rets)));
    }

    if let Some(inner) = text.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        // `{K: V}` is a map, `{T}` an array. The colon of a nested map
        // never sits at top level inside the braces.
        if let Some(idx) = find_top_level_colon(inner) {
            let key = parse_type(&inner[..idx])?;
            let value = parse_type(&inner[idx + 1..])?;
            return Ok(Type::Map(Box::new(key), Box::new(value)));
        }
        return Ok(Type::Array(Box::new(parse_type(inner)?)));
    }

    if let Some(inner) = text.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        if balanced(inner) {
            let mut types = parse_type_list_inner(inner)?;
            if types.len() == 1 {
                return Ok(types.remove(0));
            }
            return Err(format!("bad type term: '{}'", text));
        }
    }

    match text {
        "nil" => Ok(Type::Nil),
        "boolean" => Ok(Type::Boolean),
        "integer" => Ok(Type::Integer),
        "float" => Ok(Type::Float),
        "string" => Ok(Type::String),
        "value" => Ok(Type::Value),
        name if !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') =>
        {
            Ok(Type::Nominal(name.to_string()))
        }
        other => Err(format!("bad type term: '{}'", other)),
    }
}

fn parse_type_list(text: &str) -> Result<Vec<Type>, String> {
    let text = text.trim();
    match text.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) if balanced(inner) => parse_type_list_inner(inner),
        _ => Ok(vec![parse_type(text)?]),
    }
}

fn parse_type_list_inner(inner: &str) -> Result<Vec<Type>, String> {
    if inner.trim().is_empty() {
        return Ok(vec![]);
    }
    split_top_level(inner).iter().map(|p| parse_type(p)).collect()
}

fn balanced(text: &str) -> bool {
    let mut depth = 0i32;
    for c in text.chars() {
        match c {
            '(' | '{' => depth += 1,
            ')' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn find_top_level_arrow(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    for i in 0..bytes.len().saturating_sub(1) {
        match bytes[i] {
            b'(' | b'{' => depth += 1,
            b')' | b'}' => depth = depth.saturating_sub(1),
            b'-' if depth == 0 && bytes[i + 1] == b'>' => return Some(i),
            _ => {}
        }
    }
    None
}

fn find_top_level_colon(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '{' => depth += 1,
            ')' | '}' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_scalars() {
        assert_eq!(Type::Integer.to_string(), "integer");
        assert_eq!(Type::Array(Box::new(Type::Float)).to_string(), "{float}");
        assert_eq!(
            Type::Map(Box::new(Type::String), Box::new(Type::Integer)).to_string(),
            "{string: integer}"
        );
        assert_eq!(
            Type::Option(Box::new(Type::String)).to_string(),
            "string?"
        );
    }

    #[test]
    fn test_display_function() {
        let ft = Type::Function(FunctionType::new(
            vec![Type::Integer, Type::Float],
            vec![Type::String],
        ));
        assert_eq!(ft.to_string(), "(integer, float) -> (string)");
    }

    #[test]
    fn test_parse_type_round_trip() {
        for src in [
            "integer",
            "{float}",
            "{string: integer}",
            "string?",
            "(integer, float) -> (string)",
            "() -> ()",
            "{(integer) -> (float)}",
            "foo.Point",
        ] {
            let ty = parse_type(src).unwrap();
            assert_eq!(ty.to_string(), src, "round trip of {}", src);
        }
    }

    #[test]
    fn test_parse_option_of_array() {
        let ty = parse_type("{integer}?").unwrap();
        assert_eq!(ty, Type::Option(Box::new(Type::Array(Box::new(Type::Integer)))));
    }

    #[test]
    fn test_nominal_equality_is_by_fqtn() {
        assert_eq!(
            Type::Nominal("foo.Point".into()),
            Type::Nominal("foo.Point".into())
        );
        assert_ne!(
            Type::Nominal("foo.Point".into()),
            Type::Nominal("bar.Point".into())
        );
    }

    #[test]
    fn test_registry_first_registration_wins() {
        let mut session = Session::new();
        session.add_record(RecordType {
            fqtn: "m.R".into(),
            fields: vec![("x".into(), Type::Integer)],
        });
        session.add_record(RecordType {
            fqtn: "m.R".into(),
            fields: vec![("x".into(), Type::Float)],
        });
        assert_eq!(session.record("m.R").unwrap().field("x"), Some(&Type::Integer));
    }

    #[test]
    fn test_module_type_serialize_parse() {
        let mut session = Session::new();
        let mut module = ModuleType::new("foo");
        module.members.insert(
            "a".into(),
            ModuleMember {
                ty: Type::Integer,
                slot: 2,
            },
        );
        module.members.insert(
            "f".into(),
            ModuleMember {
                ty: Type::Function(FunctionType::new(vec![Type::Integer], vec![Type::Float])),
                slot: 3,
            },
        );
        let text = module.serialize_with(&session);
        let parsed = ModuleType::parse(&text, &mut session).unwrap();
        assert_eq!(parsed, module);
    }

    #[test]
    fn test_module_type_parse_record_registers_shape() {
        let mut session = Session::new();
        let text = "module geo\nrecord Point @2 : (x : float, y : float)\n";
        let parsed = ModuleType::parse(text, &mut session).unwrap();
        let member = parsed.member("Point").unwrap();
        assert_eq!(
            member.ty,
            Type::TypeOf(Box::new(Type::Nominal("geo.Point".into())))
        );
        let rec = session.record("geo.Point").unwrap();
        assert_eq!(rec.fields.len(), 2);
        assert_eq!(rec.field("y"), Some(&Type::Float));
    }

    #[test]
    fn test_static_truthiness() {
        assert_eq!(Type::Nil.static_truthiness(), Some(false));
        assert_eq!(Type::Integer.static_truthiness(), Some(true));
        assert_eq!(Type::Boolean.static_truthiness(), None);
        assert_eq!(
            Type::Option(Box::new(Type::Integer)).static_truthiness(),
            None
        );
    }
}
