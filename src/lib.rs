pub mod cfg;
pub mod config;
pub mod diagnostic;
pub mod emit;
pub mod error;
pub mod fixup;
pub mod ir;
pub mod leave;
pub mod lower;
pub mod module;
pub mod pack;
pub mod pipeline;
pub mod span;
pub mod tree;
pub mod types;

pub use config::CodegenOptions;
pub use error::{CodegenError, FunctionError};
pub use module::{compile_module, CompiledFunction, CompiledModule, ModuleContext};
pub use tree::{Method, SymbolOracle, SymbolTable, Unit};

use std::path::{Path, PathBuf};

use diagnostic::Diagnostic;

/// Failure to read or decode a JSON unit.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid unit '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode a unit from JSON text.
pub fn parse_unit(text: &str, path: &Path) -> Result<Unit, UnitError> {
    let mut unit: Unit = serde_json::from_str(text).map_err(|source| UnitError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    if unit.file.is_empty() {
        unit.file = path.display().to_string();
    }
    Ok(unit)
}

pub fn load_unit(path: &Path) -> Result<Unit, UnitError> {
    let text = std::fs::read_to_string(path).map_err(|source| UnitError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_unit(&text, path)
}

/// Compile a unit and render it as module text.
pub fn compile_unit(unit: &Unit, options: &CodegenOptions) -> Result<String, FunctionError> {
    let module = compile_module(unit, options)?;
    Ok(emit::emit_module(&module))
}

/// Like [`compile_unit`], but renders the failure against the unit's
/// source text before returning it.
pub fn compile_unit_reporting(
    unit: &Unit,
    options: &CodegenOptions,
) -> Result<String, Vec<Diagnostic>> {
    compile_unit(unit, options).map_err(|err| {
        let diagnostics = vec![Diagnostic::from(&err)];
        diagnostic::render_diagnostics(
            &diagnostics,
            &unit.file,
            unit.source.as_deref().unwrap_or(""),
        );
        diagnostics
    })
}
