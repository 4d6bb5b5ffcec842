//! Titan compiler CLI
//!
//! `titanc [options] <input.titan>`: compile a module to a shared object
//! the Lua 5.3 interpreter can `require`, an object file, or a whole
//! program. `--print-ast` and `--print-types` stop after the front end.

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::{generate, Shell};
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use titanc::driver::{self, CompileError, OutputKind};
use titanc::{CompilerConfig, FilesystemLoader, Session};

#[derive(ClapParser)]
#[command(name = "titanc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Titan compiler - compile .titan modules against the Lua runtime", long_about = None)]
struct Cli {
    /// Input .titan source file
    input: Option<PathBuf>,

    /// Pretty-print the parsed AST and exit
    #[arg(long)]
    print_ast: bool,

    /// Pretty-print the checked AST with type annotations and exit
    #[arg(long)]
    print_types: bool,

    /// Output path (defaults to the source path with its extension replaced)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep the generated C file next to the output
    #[arg(long)]
    keep_c: bool,

    /// Produce a plain object file instead of a shared object
    #[arg(long)]
    object: bool,

    /// Build an executable program (the module must define 'main')
    #[arg(long)]
    program: bool,

    /// Project configuration file (defaults to titan.toml next to the input)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Generate shell completion scripts and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "titanc", &mut io::stdout());
        return;
    }

    let Some(input) = cli.input else {
        eprintln!("titanc: no input file (try --help)");
        process::exit(1);
    };

    if cli.print_ast || cli.print_types {
        run_print(&input, cli.print_types);
        return;
    }

    let mut config = CompilerConfig::new();
    config.keep_c = cli.keep_c;
    let project_file = cli.config.clone().or_else(|| {
        let candidate = input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("titan.toml");
        candidate.exists().then_some(candidate)
    });
    if let Some(path) = project_file {
        config = match config.apply_project_file(&path) {
            Ok(config) => config,
            Err(message) => {
                eprintln!("titanc: {}", message);
                process::exit(1);
            }
        };
    }

    let kind = if cli.program {
        OutputKind::Program
    } else if cli.object {
        OutputKind::Object
    } else {
        OutputKind::SharedObject
    };

    match driver::compile_file(&input, cli.output.as_deref(), kind, &config) {
        Ok(output) => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Err(CompileError::Diagnostics(diagnostics)) => {
            for diagnostic in driver::sorted(&diagnostics) {
                eprintln!("{}", diagnostic);
            }
            process::exit(1);
        }
        Err(error) => {
            eprintln!("titanc: {}", error);
            process::exit(1);
        }
    }
}

/// The `--print-ast` / `--print-types` paths: run the front end and dump
/// the (possibly annotated) tree to stdout.
fn run_print(input: &Path, typed: bool) {
    let source = match std::fs::read_to_string(input) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("titanc: cannot read {}: {}", input.display(), error);
            process::exit(1);
        }
    };
    let filename = input.display().to_string();
    let module_name = driver::module_name_from_path(input);

    if typed {
        let mut session = Session::new();
        let mut loader = FilesystemLoader::new(titanc::config::titan_path_from_env());
        match titanc::check_source(&filename, &module_name, &source, &mut session, &mut loader) {
            Ok((program, _, _)) => print!("{}", titanc::source::print_typed(&program)),
            Err(diagnostics) => {
                for diagnostic in driver::sorted(&diagnostics) {
                    eprintln!("{}", diagnostic);
                }
                process::exit(1);
            }
        }
    } else {
        match titanc::parse_source(&filename, &module_name, &source) {
            Ok(program) => print!("{}", titanc::source::print_program(&program)),
            Err(diagnostics) => {
                for diagnostic in driver::sorted(&diagnostics) {
                    eprintln!("{}", diagnostic);
                }
                process::exit(1);
            }
        }
    }
}
