//! Compilation driver
//!
//! Drives the pipeline for one module and hands the generated C to the
//! host toolchain: shared object for `require`, plain object file, or a
//! whole program (module + generated entry point, linked and stripped).
//! On toolchain failure the intermediate `.c` is preserved for
//! debugging; on success it is removed unless asked for.
//!
//! Next to every compiled module the driver writes a `.types` artifact
//! (the same text the emitted `<module>_types` function returns), so
//! later imports of the compiled module type-check without its source.

use crate::ast::Diagnostic;
use crate::codegen::mangle_name;
use crate::config::CompilerConfig;
use crate::loader::FilesystemLoader;
use crate::types::Session;
use std::path::{Path, PathBuf};
use std::process::Command;

/// What the toolchain should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    SharedObject,
    Object,
    Program,
}

#[derive(Debug)]
pub enum CompileError {
    /// Front-end diagnostics; the module was not emitted.
    Diagnostics(Vec<Diagnostic>),
    /// The external C compiler failed; its stderr is carried verbatim.
    Toolchain(String),
    Io(String),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Diagnostics(diagnostics) => {
                for d in sorted(diagnostics) {
                    writeln!(f, "{}", d)?;
                }
                Ok(())
            }
            CompileError::Toolchain(stderr) => {
                write!(f, "C compiler failed:\n{}", stderr)
            }
            CompileError::Io(message) => write!(f, "{}", message),
        }
    }
}

/// Diagnostics print in filename order (then position).
pub fn sorted(diagnostics: &[Diagnostic]) -> Vec<Diagnostic> {
    let mut sorted: Vec<Diagnostic> = diagnostics.to_vec();
    sorted.sort_by(|a, b| {
        (a.file.as_str(), a.loc.line, a.loc.column)
            .cmp(&(b.file.as_str(), b.loc.line, b.loc.column))
    });
    sorted
}

/// The module name a source path compiles under.
pub fn module_name_from_path(input: &Path) -> String {
    input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string())
}

/// Compile one `.titan` source into the requested artifact. Returns the
/// output path.
pub fn compile_file(
    input: &Path,
    output: Option<&Path>,
    kind: OutputKind,
    config: &CompilerConfig,
) -> Result<PathBuf, CompileError> {
    let source = std::fs::read_to_string(input)
        .map_err(|e| CompileError::Io(format!("cannot read {}: {}", input.display(), e)))?;
    let module_name = module_name_from_path(input);

    // The module's own directory heads the search path.
    let mut search_path = Vec::new();
    if let Some(parent) = input.parent() {
        if !parent.as_os_str().is_empty() {
            search_path.push(parent.to_path_buf());
        }
    }
    search_path.extend(config.search_path.iter().cloned());

    let mut session = Session::new();
    let mut loader = FilesystemLoader::new(search_path);
    let module = crate::compile_source_to_c(
        &input.display().to_string(),
        &module_name,
        &source,
        &mut session,
        &mut loader,
    )
    .map_err(CompileError::Diagnostics)?;

    let output = output.map(Path::to_path_buf).unwrap_or_else(|| {
        let extension = match kind {
            OutputKind::SharedObject => "so",
            OutputKind::Object => "o",
            OutputKind::Program => "",
        };
        input.with_extension(extension)
    });

    let c_path = output.with_extension("c");
    std::fs::write(&c_path, &module.c_source)
        .map_err(|e| CompileError::Io(format!("cannot write {}: {}", c_path.display(), e)))?;
    let types_path = output.with_extension("types");
    std::fs::write(&types_path, module.module_type.serialize_with(&session))
        .map_err(|e| CompileError::Io(format!("cannot write {}: {}", types_path.display(), e)))?;

    let result = match kind {
        OutputKind::SharedObject | OutputKind::Object => {
            run_toolchain(config, &cc_args(config, kind, &[c_path.clone()], &output))
        }
        OutputKind::Program => build_program(config, &module.module_name, &c_path, &output),
    };
    match result {
        Ok(()) => {
            if !config.keep_c {
                std::fs::remove_file(&c_path).ok();
            }
            Ok(output)
        }
        // The generated C stays on disk for debugging.
        Err(e) => Err(e),
    }
}

/// Argument list for one toolchain invocation.
fn cc_args(
    config: &CompilerConfig,
    kind: OutputKind,
    inputs: &[PathBuf],
    output: &Path,
) -> Vec<String> {
    let mut args = config.cflags.clone();
    for dir in &config.include_dirs {
        args.push(format!("-I{}", dir.display()));
    }
    match kind {
        OutputKind::SharedObject => {
            if cfg!(target_os = "macos") {
                args.push("-bundle".to_string());
                args.push("-undefined".to_string());
                args.push("dynamic_lookup".to_string());
            } else {
                args.push("-shared".to_string());
            }
        }
        OutputKind::Object => args.push("-c".to_string()),
        OutputKind::Program => {}
    }
    args.push("-o".to_string());
    args.push(output.display().to_string());
    for input in inputs {
        args.push(input.display().to_string());
    }
    if kind != OutputKind::Object {
        for object in &config.runtime_objects {
            args.push(object.display().to_string());
        }
        args.push("-lm".to_string());
        if cfg!(target_os = "linux") {
            args.push("-ldl".to_string());
        }
    }
    args
}

fn run_toolchain(config: &CompilerConfig, args: &[String]) -> Result<(), CompileError> {
    let output = Command::new(&config.cc)
        .args(args)
        .output()
        .map_err(|e| CompileError::Io(format!("cannot run '{}': {}", config.cc, e)))?;
    if !output.status.success() {
        return Err(CompileError::Toolchain(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// Program build: compile the module, write and compile the entry stub,
/// link, and strip the result (best effort).
fn build_program(
    config: &CompilerConfig,
    module_name: &str,
    c_path: &Path,
    output: &Path,
) -> Result<(), CompileError> {
    let entry_path = output.with_file_name(format!(
        "{}__entrypoint.c",
        module_name_from_path(output)
    ));
    std::fs::write(&entry_path, emit_entrypoint(module_name))
        .map_err(|e| CompileError::Io(format!("cannot write {}: {}", entry_path.display(), e)))?;

    let inputs = vec![c_path.to_path_buf(), entry_path.clone()];
    let result = run_toolchain(config, &cc_args(config, OutputKind::Program, &inputs, output));
    if result.is_ok() {
        std::fs::remove_file(&entry_path).ok();
        Command::new("strip").arg(output).output().ok();
    }
    result
}

/// The C entry point of a program build: create the host state, preload
/// the module's open function, require it and call its `main` with the
/// argument list.
pub fn emit_entrypoint(module_name: &str) -> String {
    let mangled = mangle_name(module_name);
    format!(
        r#"/* {module}: program entry point, generated by the Titan compiler. */
#include <stdio.h>

#include "lua.h"
#include "lauxlib.h"
#include "lualib.h"

int luaopen_{mangled} (lua_State *L);

int main (int argc, char **argv) {{
    int i;
    int code = 0;
    lua_State *L = luaL_newstate();
    if (L == NULL) {{
        fprintf(stderr, "cannot create host state\n");
        return 1;
    }}
    luaL_openlibs(L);
    luaL_getsubtable(L, LUA_REGISTRYINDEX, LUA_PRELOAD_TABLE);
    lua_pushcfunction(L, luaopen_{mangled});
    lua_setfield(L, -2, "{module}");
    lua_pop(L, 1);
    lua_getglobal(L, "require");
    lua_pushstring(L, "{module}");
    lua_call(L, 1, 1);
    lua_getfield(L, -1, "main");
    lua_createtable(L, argc, 0);
    for (i = 0; i < argc; i++) {{
        lua_pushstring(L, argv[i]);
        lua_rawseti(L, -2, i);
    }}
    if (lua_pcall(L, 1, 1, 0) != LUA_OK) {{
        fprintf(stderr, "%s\n", lua_tostring(L, -1));
        code = 1;
    }} else if (lua_isinteger(L, -1)) {{
        code = (int)lua_tointeger(L, -1);
    }}
    lua_close(L);
    return code;
}}
"#,
        module = module_name,
        mangled = mangled,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Location;

    #[test]
    fn test_module_name_from_path() {
        assert_eq!(module_name_from_path(Path::new("foo/bar.titan")), "bar");
        assert_eq!(module_name_from_path(Path::new("m.titan")), "m");
    }

    #[test]
    fn test_cc_args_shape() {
        let config = CompilerConfig::new()
            .with_include_dir("lua/src")
            .with_runtime_object("lua/src/liblua.a");
        let args = cc_args(
            &config,
            OutputKind::SharedObject,
            &[PathBuf::from("m.c")],
            Path::new("m.so"),
        );
        assert!(args.contains(&"--std=c99".to_string()));
        assert!(args.contains(&"-O2".to_string()));
        assert!(args.contains(&"-Wall".to_string()));
        assert!(args.contains(&"-fPIC".to_string()));
        assert!(args.contains(&"-Ilua/src".to_string()));
        assert!(args.contains(&"lua/src/liblua.a".to_string()));
        let o_pos = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[o_pos + 1], "m.so");
    }

    #[test]
    fn test_object_builds_skip_linking_inputs() {
        let config = CompilerConfig::new().with_runtime_object("liblua.a");
        let args = cc_args(
            &config,
            OutputKind::Object,
            &[PathBuf::from("m.c")],
            Path::new("m.o"),
        );
        assert!(args.contains(&"-c".to_string()));
        assert!(!args.contains(&"liblua.a".to_string()));
    }

    #[test]
    fn test_entrypoint_stub() {
        let stub = emit_entrypoint("app");
        assert!(stub.contains("luaopen_app"));
        assert!(stub.contains("LUA_PRELOAD_TABLE"));
        assert!(stub.contains("lua_getglobal(L, \"require\")"));
        assert!(stub.contains("lua_getfield(L, -1, \"main\")"));
    }

    #[test]
    fn test_sorted_diagnostics_by_filename() {
        let diagnostics = vec![
            Diagnostic::new("b.titan", Location::new(1, 1), "second"),
            Diagnostic::new("a.titan", Location::new(9, 1), "first"),
            Diagnostic::new("a.titan", Location::new(2, 1), "zeroth"),
        ];
        let sorted = sorted(&diagnostics);
        assert_eq!(sorted[0].message, "zeroth");
        assert_eq!(sorted[1].message, "first");
        assert_eq!(sorted[2].message, "second");
    }

    #[test]
    fn test_compile_file_writes_c_and_types() {
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        let input = temp.path().join("m.titan");
        std::fs::write(&input, "function id(x: integer): integer return x end").unwrap();

        // `true` stands in for the C compiler: it accepts anything and
        // produces nothing, which is all this test needs.
        let mut config = CompilerConfig::new().with_cc("true");
        config.keep_c = true;
        let output = compile_file(&input, None, OutputKind::SharedObject, &config).unwrap();
        assert_eq!(output, temp.path().join("m.so"));

        let c_text = std::fs::read_to_string(temp.path().join("m.c")).unwrap();
        assert!(c_text.contains("luaopen_m"));
        let types_text = std::fs::read_to_string(temp.path().join("m.types")).unwrap();
        assert!(types_text.starts_with("module m"));
        assert!(types_text.contains("func id"));
    }

    #[test]
    fn test_compile_file_reports_diagnostics() {
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        let input = temp.path().join("bad.titan");
        std::fs::write(&input, "function f(): integer return x end").unwrap();

        let config = CompilerConfig::new().with_cc("true");
        match compile_file(&input, None, OutputKind::SharedObject, &config) {
            Err(CompileError::Diagnostics(diagnostics)) => {
                assert!(diagnostics[0].message.contains("not declared"));
            }
            other => panic!("expected diagnostics, got {:?}", other),
        }
    }

    #[test]
    fn test_toolchain_failure_keeps_the_c_file() {
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        let input = temp.path().join("m.titan");
        std::fs::write(&input, "a = 1").unwrap();

        // `false` fails like a crashing compiler.
        let config = CompilerConfig::new().with_cc("false");
        match compile_file(&input, None, OutputKind::SharedObject, &config) {
            Err(CompileError::Toolchain(_)) => {}
            other => panic!("expected a toolchain error, got {:?}", other),
        }
        assert!(temp.path().join("m.c").exists());
    }
}
