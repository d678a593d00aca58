//! Code generation options and the `regil.toml` loader.
//!
//! ```toml
//! [codegen]
//! max_registers = 256
//! strip_unreachable = true
//! merge_nullify = true
//! parallel = true
//! comments = false
//! entry_point = "Main"
//! ```
//!
//! Every key is optional; missing keys keep their defaults. Command-line
//! flags are applied on top of whatever the file produced.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Register file size of the target VM.
pub const DEFAULT_MAX_REGISTERS: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodegenOptions {
    /// Physical registers available per function.
    pub max_registers: usize,
    /// Drop statements that follow an unconditional exit up to the next label.
    pub strip_unreachable: bool,
    /// Fold adjacent single-register `nullify` statements into ranges.
    pub merge_nullify: bool,
    /// Compile functions of a module on the rayon pool.
    pub parallel: bool,
    /// Keep source-level comments on emitted statements.
    pub comments: bool,
    /// Name of the static method used as the module entry point.
    pub entry_point: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            max_registers: DEFAULT_MAX_REGISTERS,
            strip_unreachable: true,
            merge_nullify: true,
            parallel: true,
            comments: false,
            entry_point: "Main".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("max_registers must be between 1 and 65536, got {0}")]
    RegisterLimit(usize),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    codegen: CodegenOptions,
}

impl CodegenOptions {
    /// Parse the `[codegen]` table of a config document.
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        file.codegen.validate()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Load `regil.toml` from `dir` if present, defaults otherwise.
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join("regil.toml");
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_registers == 0 || self.max_registers > 65536 {
            return Err(ConfigError::RegisterLimit(self.max_registers));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_vm() {
        let opts = CodegenOptions::default();
        assert_eq!(opts.max_registers, 256);
        assert!(opts.strip_unreachable);
        assert!(opts.parallel);
        assert_eq!(opts.entry_point, "Main");
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let opts = CodegenOptions::from_toml_str(
            "[codegen]\nmax_registers = 16\nparallel = false\n",
            Path::new("regil.toml"),
        )
        .unwrap();
        assert_eq!(opts.max_registers, 16);
        assert!(!opts.parallel);
        assert!(opts.strip_unreachable);
    }

    #[test]
    fn empty_document_is_default() {
        let opts = CodegenOptions::from_toml_str("", Path::new("regil.toml")).unwrap();
        assert_eq!(opts, CodegenOptions::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = CodegenOptions::from_toml_str(
            "[codegen]\nmax_regs = 4\n",
            Path::new("regil.toml"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn zero_registers_is_invalid() {
        let err = CodegenOptions::from_toml_str(
            "[codegen]\nmax_registers = 0\n",
            Path::new("regil.toml"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::RegisterLimit(0)));
    }

    #[test]
    fn discover_reads_file_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            CodegenOptions::discover(dir.path()).unwrap(),
            CodegenOptions::default()
        );
        std::fs::write(
            dir.path().join("regil.toml"),
            "[codegen]\nstrip_unreachable = false\n",
        )
        .unwrap();
        let opts = CodegenOptions::discover(dir.path()).unwrap();
        assert!(!opts.strip_unreachable);
    }
}
