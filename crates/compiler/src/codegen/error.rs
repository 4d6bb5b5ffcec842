//! Code generation error types.
//!
//! The coder only runs over programs that checked cleanly, so every
//! failure here is an internal inconsistency between passes, not a user
//! error: the variants name which upstream contract was broken so the
//! offending pass is obvious from the message alone.

/// Error type for code generation operations.
///
/// Allows proper error propagation with `?` for both pass-contract
/// violations and formatting failures while writing C text.
#[derive(Debug)]
pub enum CodeGenError {
    /// The upvalues pass left no globals slot, C name or interned
    /// literal for something the coder needs to address.
    MissingSlot(String),
    /// A node the checker should have rejected, coerced or annotated
    /// reached the coder (wrong operand type, unresolved reference,
    /// unsupported coercion, missing inserted step).
    UncheckedNode(String),
    /// A formatting error when writing C source.
    Format(std::fmt::Error),
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::MissingSlot(s) => write!(f, "missing slot assignment: {}", s),
            CodeGenError::UncheckedNode(s) => {
                write!(f, "unchecked node reached the code generator: {}", s)
            }
            CodeGenError::Format(e) => write!(f, "error while writing C source: {}", e),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<std::fmt::Error> for CodeGenError {
    fn from(e: std::fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_broken_pass() {
        let e = CodeGenError::MissingSlot("no globals slot for declaration 3".to_string());
        assert!(e.to_string().starts_with("missing slot assignment:"));
        let e = CodeGenError::UncheckedNode("arithmetic on values of type string".to_string());
        assert!(e.to_string().contains("unchecked node"));
    }

    #[test]
    fn test_format_errors_convert() {
        let e = CodeGenError::from(std::fmt::Error);
        assert!(matches!(e, CodeGenError::Format(_)));
    }
}
