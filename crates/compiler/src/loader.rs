//! Module loaders
//!
//! A loader resolves an imported module name to its type. The memoization
//! table lives in the [`Session`] so every loader shares it: a module that
//! is observed in the `InProgress` state while being requested again is a
//! circular import, reported as a synthetic diagnostic.
//!
//! [`FilesystemLoader`] maps `foo.bar` to `foo/bar.titan` across the search
//! path, preferring the `.types` artifact written next to an
//! already-compiled module when it is newer than the source.
//! [`InMemoryLoader`] serves canned sources for tests.

use crate::ast::{Diagnostic, Location};
use crate::types::{ModuleState, ModuleType, Session};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub trait Loader {
    /// Resolve `name` to a module type, compiling it from source if needed.
    /// Errors come back as diagnostics for the caller to attach to the
    /// import site.
    fn load(&mut self, session: &mut Session, name: &str) -> Result<ModuleType, Vec<Diagnostic>>;
}

/// Check the memo before doing any work; returns a finished result when the
/// module is already loaded or currently loading (a cycle).
fn check_memo(
    session: &mut Session,
    name: &str,
) -> Option<Result<ModuleType, Vec<Diagnostic>>> {
    match session.modules.get(name) {
        Some(ModuleState::Loaded(module)) => Some(Ok(module.clone())),
        Some(ModuleState::InProgress) => Some(Err(vec![Diagnostic::new(
            format!("{}.titan", name.replace('.', "/")),
            Location::new(1, 1),
            format!("circular reference to module '{}'", name),
        )])),
        None => None,
    }
}

/// Compile a module's source text down to its module type, sharing the
/// session registry and memo. Used by both loader implementations.
fn load_source(
    loader: &mut dyn Loader,
    session: &mut Session,
    name: &str,
    filename: &str,
    source: &str,
) -> Result<ModuleType, Vec<Diagnostic>> {
    session
        .modules
        .insert(name.to_string(), ModuleState::InProgress);
    let result = front_end(loader, session, name, filename, source);
    match &result {
        Ok(module) => {
            session
                .modules
                .insert(name.to_string(), ModuleState::Loaded(module.clone()));
        }
        Err(_) => {
            // Leave no in-progress sentinel behind so a later retry does
            // not look like a cycle.
            session.modules.remove(name);
        }
    }
    result
}

fn front_end(
    loader: &mut dyn Loader,
    session: &mut Session,
    name: &str,
    filename: &str,
    source: &str,
) -> Result<ModuleType, Vec<Diagnostic>> {
    let (_, _, module_type) = crate::check_source(filename, name, source, session, loader)?;
    Ok(module_type)
}

/// Loads modules from `.titan` sources (or their `.types` artifacts) found
/// on the search path.
pub struct FilesystemLoader {
    search_path: Vec<PathBuf>,
}

impl FilesystemLoader {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        FilesystemLoader { search_path }
    }

    /// Locate the source (and possibly the compiled `.types`) for `name`.
    fn locate(&self, name: &str) -> Option<(PathBuf, Option<PathBuf>)> {
        let relative = name.replace('.', "/");
        for dir in &self.search_path {
            let source = dir.join(format!("{}.titan", relative));
            let types = dir.join(format!("{}.types", relative));
            if source.exists() {
                let types = if newer_than(&types, &source) { Some(types) } else { None };
                return Some((source, types));
            }
            if types.exists() {
                return Some((source, Some(types)));
            }
        }
        None
    }
}

/// True when `a` exists and is at least as new as `b`.
fn newer_than(a: &Path, b: &Path) -> bool {
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => match (ma.modified(), mb.modified()) {
            (Ok(ta), Ok(tb)) => ta >= tb,
            _ => false,
        },
        _ => false,
    }
}

impl Loader for FilesystemLoader {
    fn load(&mut self, session: &mut Session, name: &str) -> Result<ModuleType, Vec<Diagnostic>> {
        if let Some(done) = check_memo(session, name) {
            return done;
        }
        let (source_path, types_path) = self.locate(name).ok_or_else(|| {
            vec![Diagnostic::new(
                format!("{}.titan", name.replace('.', "/")),
                Location::new(1, 1),
                format!("module '{}' not found on the search path", name),
            )]
        })?;

        // A compiled module that is newer than its source wins: its .types
        // artifact carries everything an import site needs.
        if let Some(types_path) = types_path {
            let text = std::fs::read_to_string(&types_path).map_err(|e| {
                vec![Diagnostic::new(
                    types_path.display().to_string(),
                    Location::new(1, 1),
                    format!("cannot read module types: {}", e),
                )]
            })?;
            let module = ModuleType::parse(&text, session).map_err(|e| {
                vec![Diagnostic::new(
                    types_path.display().to_string(),
                    Location::new(1, 1),
                    format!("mismatched pre-compiled type for module '{}': {}", name, e),
                )]
            })?;
            session
                .modules
                .insert(name.to_string(), ModuleState::Loaded(module.clone()));
            return Ok(module);
        }

        let filename = source_path.display().to_string();
        let source = std::fs::read_to_string(&source_path).map_err(|e| {
            vec![Diagnostic::new(
                filename.clone(),
                Location::new(1, 1),
                format!("cannot read module source: {}", e),
            )]
        })?;
        load_source(self, session, name, &filename, &source)
    }
}

/// A pluggable in-memory loader for tests: module name -> source text.
#[derive(Default)]
pub struct InMemoryLoader {
    sources: HashMap<String, String>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        InMemoryLoader::default()
    }

    pub fn add(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(name.into(), source.into());
        self
    }
}

impl Loader for InMemoryLoader {
    fn load(&mut self, session: &mut Session, name: &str) -> Result<ModuleType, Vec<Diagnostic>> {
        if let Some(done) = check_memo(session, name) {
            return done;
        }
        let source = match self.sources.get(name) {
            Some(source) => source.clone(),
            None => {
                return Err(vec![Diagnostic::new(
                    format!("{}.titan", name.replace('.', "/")),
                    Location::new(1, 1),
                    format!("module '{}' not found on the search path", name),
                )]);
            }
        };
        let filename = format!("{}.titan", name.replace('.', "/"));
        load_source(self, session, name, &filename, &source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn test_in_memory_loader_loads_a_module() {
        let mut session = Session::new();
        let mut loader =
            InMemoryLoader::new().add("foo", "function inc(x: integer): integer return x + 1 end");
        let module = loader.load(&mut session, "foo").unwrap();
        let member = module.member("inc").unwrap();
        assert!(matches!(member.ty, Type::Function(_)));
    }

    #[test]
    fn test_missing_module_is_a_diagnostic() {
        let mut session = Session::new();
        let mut loader = InMemoryLoader::new();
        let err = loader.load(&mut session, "nope").unwrap_err();
        assert!(err[0].message.contains("module 'nope' not found"));
    }

    #[test]
    fn test_memoization_returns_same_type() {
        let mut session = Session::new();
        let mut loader = InMemoryLoader::new().add("foo", "a = 1");
        let first = loader.load(&mut session, "foo").unwrap();
        let second = loader.load(&mut session, "foo").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_circular_import_is_reported() {
        let mut session = Session::new();
        let mut loader = InMemoryLoader::new()
            .add("foo", "local bar = import \"bar\"")
            .add("bar", "local foo = import \"foo\"");
        let err = loader.load(&mut session, "foo").unwrap_err();
        let all: String = err.iter().map(|d| d.message.clone()).collect();
        assert!(
            all.contains("circular reference to module"),
            "got: {}",
            all
        );
    }

    #[test]
    fn test_filesystem_loader_finds_sources() {
        use std::fs;
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        let dir = temp.path().join("geo");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("point.titan"), "record Point x: float y: float end").unwrap();

        let mut session = Session::new();
        let mut loader = FilesystemLoader::new(vec![temp.path().to_path_buf()]);
        let module = loader.load(&mut session, "geo.point").unwrap();
        assert!(module.member("Point").is_some());
        assert!(session.record("geo.point.Point").is_some());
    }

    #[test]
    fn test_filesystem_loader_prefers_newer_types_artifact() {
        use std::fs;
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        fs::write(temp.path().join("m.titan"), "a = 1").unwrap();
        // The .types artifact is written after the source, so it wins.
        fs::write(temp.path().join("m.types"), "module m\nvar a @2 : float\n").unwrap();

        let mut session = Session::new();
        let mut loader = FilesystemLoader::new(vec![temp.path().to_path_buf()]);
        let module = loader.load(&mut session, "m").unwrap();
        assert_eq!(module.member("a").unwrap().ty, Type::Float);
    }

    #[test]
    fn test_mismatched_types_artifact_is_reported() {
        use std::fs;
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        fs::write(temp.path().join("m.types"), "not a module type\n").unwrap();

        let mut session = Session::new();
        let mut loader = FilesystemLoader::new(vec![temp.path().to_path_buf()]);
        let err = loader.load(&mut session, "m").unwrap_err();
        assert!(err[0].message.contains("mismatched pre-compiled type"));
    }
}
