//! Compiler configuration
//!
//! Where the generated C goes through the host toolchain and where
//! modules are looked up. Defaults come from the environment
//! (`TITAN_PATH_0_5`, falling back to `TITAN_PATH`); a `titan.toml` next
//! to the source can override the toolchain pieces.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default module search path; a `;;` in the environment value expands to
/// this.
pub const DEFAULT_TITAN_PATH: &str = ".;/usr/local/lib/titan/0.5";

const PATH_VAR: &str = "TITAN_PATH_0_5";
const PATH_VAR_COMPAT: &str = "TITAN_PATH";

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Host C compiler executable.
    pub cc: String,
    /// Flags passed on every toolchain invocation.
    pub cflags: Vec<String>,
    /// `-I` directories (the host runtime's headers).
    pub include_dirs: Vec<PathBuf>,
    /// Host runtime object files linked into every output.
    pub runtime_objects: Vec<PathBuf>,
    /// Directories searched for imported modules.
    pub search_path: Vec<PathBuf>,
    /// Keep the generated `.c` next to the output on success.
    pub keep_c: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            cc: "cc".to_string(),
            cflags: vec![
                "--std=c99".to_string(),
                "-O2".to_string(),
                "-Wall".to_string(),
                "-fPIC".to_string(),
            ],
            include_dirs: Vec::new(),
            runtime_objects: Vec::new(),
            search_path: titan_path_from_env(),
            keep_c: false,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc = cc.into();
        self
    }

    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn with_runtime_object(mut self, object: impl Into<PathBuf>) -> Self {
        self.runtime_objects.push(object.into());
        self
    }

    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_path.push(dir.into());
        self
    }

    /// Merge a `titan.toml` project file over this configuration.
    pub fn apply_project_file(mut self, path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let file: ProjectFile = toml::from_str(&text)
            .map_err(|e| format!("cannot parse {}: {}", path.display(), e))?;
        if let Some(cc) = file.cc {
            self.cc = cc;
        }
        if let Some(cflags) = file.cflags {
            self.cflags = cflags;
        }
        if let Some(dirs) = file.include_dirs {
            self.include_dirs.extend(dirs.into_iter().map(PathBuf::from));
        }
        if let Some(objects) = file.runtime_objects {
            self.runtime_objects
                .extend(objects.into_iter().map(PathBuf::from));
        }
        if let Some(dirs) = file.search_path {
            self.search_path.extend(dirs.into_iter().map(PathBuf::from));
        }
        Ok(self)
    }
}

/// Optional project file contents; every key overrides or extends the
/// defaults.
#[derive(Debug, Deserialize)]
struct ProjectFile {
    cc: Option<String>,
    cflags: Option<Vec<String>>,
    include_dirs: Option<Vec<String>>,
    runtime_objects: Option<Vec<String>>,
    search_path: Option<Vec<String>>,
}

/// The module search path from the environment: `TITAN_PATH_0_5` wins
/// over `TITAN_PATH`; the default applies when neither is set, and `;;`
/// splices the default into an explicit value.
pub fn titan_path_from_env() -> Vec<PathBuf> {
    let value = std::env::var(PATH_VAR)
        .or_else(|_| std::env::var(PATH_VAR_COMPAT))
        .unwrap_or_else(|_| DEFAULT_TITAN_PATH.to_string());
    parse_titan_path(&value)
}

pub fn parse_titan_path(value: &str) -> Vec<PathBuf> {
    let expanded = if value.contains(";;") {
        value.replacen(";;", &format!(";{};", DEFAULT_TITAN_PATH), 1)
    } else {
        value.to_string()
    };
    expanded
        .split(';')
        .filter(|segment| !segment.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flags() {
        let config = CompilerConfig::default();
        assert_eq!(config.cc, "cc");
        assert_eq!(config.cflags, vec!["--std=c99", "-O2", "-Wall", "-fPIC"]);
    }

    #[test]
    fn test_parse_titan_path() {
        let dirs = parse_titan_path("a;b/c");
        assert_eq!(dirs, vec![PathBuf::from("a"), PathBuf::from("b/c")]);
    }

    #[test]
    fn test_double_semicolon_expands_to_default() {
        let dirs = parse_titan_path("mine;;");
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("mine"),
                PathBuf::from("."),
                PathBuf::from("/usr/local/lib/titan/0.5"),
            ]
        );
    }

    #[test]
    fn test_builder() {
        let config = CompilerConfig::new()
            .with_cc("gcc")
            .with_include_dir("/usr/include/lua5.3")
            .with_runtime_object("liblua.a")
            .with_search_dir("deps");
        assert_eq!(config.cc, "gcc");
        assert_eq!(config.include_dirs, vec![PathBuf::from("/usr/include/lua5.3")]);
        assert_eq!(config.runtime_objects, vec![PathBuf::from("liblua.a")]);
        assert!(config.search_path.contains(&PathBuf::from("deps")));
    }

    #[test]
    fn test_project_file_overrides() {
        use std::io::Write as _;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("titan.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "cc = \"clang\"").unwrap();
        writeln!(file, "include_dirs = [\"lua/src\"]").unwrap();
        drop(file);

        let config = CompilerConfig::default().apply_project_file(&path).unwrap();
        assert_eq!(config.cc, "clang");
        assert!(config.include_dirs.contains(&PathBuf::from("lua/src")));
    }

    #[test]
    fn test_bad_project_file_is_an_error() {
        use std::io::Write as _;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("titan.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "cc = [nonsense").unwrap();
        drop(file);

        let err = CompilerConfig::default()
            .apply_project_file(&path)
            .unwrap_err();
        assert!(err.contains("cannot parse"), "got: {}", err);
    }
}
