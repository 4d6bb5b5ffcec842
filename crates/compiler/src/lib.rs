//! Titan compiler library
//!
//! Compiles Titan source to C over the Lua 5.3 runtime. The pipeline is
//! a single-threaded sequence of passes:
//!
//! source text -> [`lexer`] -> [`parser`] -> [`checker`] (with the
//! [`symbols`] table and a pluggable [`loader`]) -> [`upvalues`] ->
//! [`codegen`] -> C text -> [`driver`] (external C toolchain).
//!
//! Process-wide state of the original design — the record type registry
//! and the loader memo — lives in an explicit [`Session`] value threaded
//! through the pipeline, so independent compilations never share state.
//!
//! ```rust,ignore
//! use titanc::{compile_source_to_c, InMemoryLoader, Session};
//!
//! let mut session = Session::new();
//! let mut loader = InMemoryLoader::new();
//! let module = compile_source_to_c(
//!     "m.titan", "m", "function id(x: integer): integer return x end",
//!     &mut session, &mut loader,
//! )?;
//! std::fs::write("m.c", &module.c_source)?;
//! ```

pub mod ast;
pub mod checker;
pub mod codegen;
pub mod config;
pub mod driver;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod pretty;
pub mod source;
pub mod symbols;
pub mod types;
pub mod upvalues;

pub use ast::{Diagnostic, Program};
pub use checker::check_program;
pub use codegen::CodeGenError;
pub use config::CompilerConfig;
pub use loader::{FilesystemLoader, InMemoryLoader, Loader};
pub use types::{ModuleType, Session, Type};

use ast::Location;
use upvalues::GlobalLayout;

/// The result of compiling one module down to C.
#[derive(Debug)]
pub struct CompiledModule {
    pub module_name: String,
    pub c_source: String,
    pub module_type: ModuleType,
}

/// Lex and parse one module. Lex and parse errors are fatal to the
/// module and come back as a single diagnostic.
pub fn parse_source(
    filename: &str,
    module_name: &str,
    source: &str,
) -> Result<Program, Vec<Diagnostic>> {
    let tokens = lexer::lex(source).map_err(|e| {
        vec![Diagnostic::new(
            filename,
            e.loc,
            format!("{} ({})", e.label.message(), e.label.label()),
        )]
    })?;
    parser::parse_program(filename, module_name, tokens).map_err(|e| vec![e.to_diagnostic(filename)])
}

/// Run the front end: parse, check, and lay out the globals table.
pub fn check_source(
    filename: &str,
    module_name: &str,
    source: &str,
    session: &mut Session,
    loader: &mut dyn Loader,
) -> Result<(Program, GlobalLayout, ModuleType), Vec<Diagnostic>> {
    let mut program = parse_source(filename, module_name, source)?;
    let diagnostics = checker::check_program(&mut program, session, loader);
    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }
    let layout = upvalues::assign_globals(&mut program);
    let module_type = upvalues::module_type(&program, &layout);
    Ok((program, layout, module_type))
}

/// Compile one module to C text. The module is only emitted when it
/// checked cleanly.
pub fn compile_source_to_c(
    filename: &str,
    module_name: &str,
    source: &str,
    session: &mut Session,
    loader: &mut dyn Loader,
) -> Result<CompiledModule, Vec<Diagnostic>> {
    let (program, layout, module_type) = check_source(filename, module_name, source, session, loader)?;
    let c_source = codegen::generate(&program, &layout, session, &module_type).map_err(|e| {
        vec![Diagnostic::new(
            filename,
            Location::new(1, 1),
            format!("internal error during code generation: {}", e),
        )]
    })?;
    Ok(CompiledModule {
        module_name: module_name.to_string(),
        c_source,
        module_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> String {
        let mut session = Session::new();
        let mut loader = InMemoryLoader::new();
        compile_source_to_c("test.titan", "test", source, &mut session, &mut loader)
            .expect("compilation failed")
            .c_source
    }

    fn compile_with(source: &str, loader: InMemoryLoader) -> String {
        let mut session = Session::new();
        let mut loader = loader;
        compile_source_to_c("test.titan", "test", source, &mut session, &mut loader)
            .expect("compilation failed")
            .c_source
    }

    #[test]
    fn test_module_scaffolding() {
        let c = compile("function id(x: integer): integer return x end");
        assert!(c.contains("int luaopen_test (lua_State *L)"));
        assert!(c.contains("int test_types (lua_State *L)"));
        assert!(c.contains("Table *test_titan_globals"));
        assert!(c.contains("test_id_titan"));
        assert!(c.contains("test_id_lua"));
        assert!(c.contains("__index"));
        assert!(c.contains("__newindex"));
    }

    #[test]
    fn test_adapter_checks_arity_and_types() {
        let c = compile("function f(x: integer, s: string) end");
        assert!(c.contains("wrong number of arguments to 'f', expected 2"));
        assert!(c.contains("expected integer but found %s"));
        assert!(c.contains("expected string but found %s"));
    }

    #[test]
    fn test_array_delete_emits_nil_store() {
        // array[i] = nil deletes the slot through the write helper.
        let c = compile("function delete(array: {integer}, i: integer) array[i] = nil end");
        assert!(c.contains("titan_arr_set"));
        assert!(c.contains("setnilvalue"));
        assert!(c.contains("luaC_barrierback"));
    }

    #[test]
    fn test_array_read_traps_on_nil() {
        let c = compile("function get(xs: {integer}, i: integer): integer return xs[i] end");
        assert!(c.contains("titan_arr_get"));
        assert!(c.contains("out of range"));
    }

    #[test]
    fn test_negative_constant_step_reverses_comparison() {
        let c = compile(
            "function forstep(): integer\n\
             local v = 0\n\
             for i = 10, 1, -2 do v = v + i end\n\
             return v\n\
             end",
        );
        assert!(c.contains(">="), "descending loop must compare with >=");
        assert!(!c.contains("'for' step is zero"), "constant step needs no runtime check");
    }

    #[test]
    fn test_implicit_step_compares_upward() {
        let c = compile(
            "function sum(n: integer): integer\n\
             local v = 0\n\
             for i = 1, n do v = v + i end\n\
             return v\n\
             end",
        );
        assert!(c.contains("<="));
    }

    #[test]
    fn test_power_lowers_to_float_pow() {
        let c = compile("function power(a: float, b: float): float return a ^ b end");
        assert!(c.contains("luai_numpow"));
    }

    #[test]
    fn test_global_getter_setter_through_slots() {
        let c = compile(
            "local a: integer = 1\n\
             function geta(): integer return a end\n\
             function seta(x: integer) a = x end",
        );
        // Slot 2 is the first value slot after the reserved prefix.
        assert!(c.contains("ivalue(&_G->array[2])"));
        assert!(c.contains("setivalue(&_G->array[2]"));
    }

    #[test]
    fn test_value_unboxing_reports_expected_type() {
        let c = compile(
            "function fn(): integer\n\
             local x: value = 1\n\
             return x\n\
             end",
        );
        assert!(c.contains("expected integer"), "failed value coercions name the expected type");
        assert!(c.contains("ttisinteger"));
    }

    #[test]
    fn test_concat_collects_parts() {
        let c = compile(
            "function greet(name: string, n: integer): string\n\
             return \"hello \" .. name .. \"/\" .. n\n\
             end",
        );
        assert!(c.contains("titan_concat(L, 4,"));
        assert!(c.contains("titan_int2str"));
    }

    #[test]
    fn test_string_literals_come_from_the_pool() {
        let c = compile("function s(): string return \"interned\" end");
        assert!(c.contains("tsvalue(&_G->array["));
        assert!(c.contains("\"interned\""));
    }

    #[test]
    fn test_record_constructor_and_field_access() {
        let c = compile(
            "record Point x: float y: float end\n\
             function norm2(p: Point): float return p.x * p.x + p.y * p.y end",
        );
        assert!(c.contains("test_Point_new_titan"));
        assert!(c.contains("titan_rec_get"));
        assert!(c.contains("luaH_new"));
    }

    #[test]
    fn test_imports_lower_to_symbol_lookups() {
        let loader =
            InMemoryLoader::new().add("mathx", "function inc(x: integer): integer return x + 1 end");
        let c = compile_with(
            "local m = import \"mathx\"\n\
             function f(): integer return m.inc(41) end",
            loader,
        );
        assert!(c.contains("titan_open_module"));
        assert!(c.contains("luaopen_mathx"));
        assert!(c.contains("mathx_inc_titan"));
        assert!(c.contains("test_fn_mathx_inc"));
    }

    #[test]
    fn test_reserved_slots_hold_name_and_types() {
        let c = compile("a = 1");
        assert!(c.contains("&_G->array[0]"));
        assert!(c.contains("&_G->array[1]"));
        assert!(c.contains("\"test\""));
        assert!(c.contains("module test"));
    }

    #[test]
    fn test_gc_slots_are_reserved_and_nilled() {
        let c = compile(
            "function join(a: string, b: string): string return a .. b end",
        );
        assert!(c.contains("TValue *_base = L->top;"));
        assert!(c.contains("setnilvalue(_base + _slot);"));
        assert!(c.contains("setsvalue2s(L, _base +"));
        assert!(c.contains("luaC_checkGC(L);"));
        assert!(c.contains("L->top = _base;"));
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let source = "record P x: float end\n\
                      xs: {integer} = {1, 2, 3}\n\
                      function f(p: P, i: integer): float\n\
                      local acc = p.x\n\
                      for k = 1, i do acc = acc + k end\n\
                      return acc\n\
                      end";
        assert_eq!(compile(source), compile(source));
    }

    #[test]
    fn test_diagnostics_block_emission() {
        let mut session = Session::new();
        let mut loader = InMemoryLoader::new();
        let err = compile_source_to_c(
            "test.titan",
            "test",
            "function f(): integer return x end",
            &mut session,
            &mut loader,
        )
        .unwrap_err();
        assert!(err[0].message.contains("not declared"));
    }

    #[test]
    fn test_multi_value_returns_use_out_params() {
        let c = compile(
            "function divmod(a: integer, b: integer): (integer, integer)\n\
             return a // b, a % b\n\
             end\n\
             function use(): integer\n\
             local q, r = divmod(7, 2)\n\
             return q + r\n\
             end",
        );
        assert!(c.contains("lua_Integer *_out1"));
        assert!(c.contains("*_out1 ="));
        assert!(c.contains("&_t"), "caller passes an out temporary");
    }

    #[test]
    fn test_indirect_call_goes_through_the_host_stack() {
        let c = compile(
            "function apply(f: integer -> integer, x: integer): integer\n\
             return f(x)\n\
             end",
        );
        assert!(c.contains("lua_call(L, 1, 1)"));
        assert!(c.contains("lua_pushinteger"));
    }
}
