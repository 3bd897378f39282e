//! # Compiler Configuration
//!
//! Request-wide [`CompileOptions`] and per-function [`ContextFlags`].
//!
//! Options deserialize from JSON with every field optional:
//!
//! ```rust
//! use pbbc::CompileOptions;
//!
//! let options = CompileOptions::from_json(r#"{ "parallel": false }"#).unwrap();
//! assert!(!options.parallel);
//! assert!(options.enable_peephole);
//! ```

use serde::{Deserialize, Serialize};

use crate::context::ContextKind;
use crate::error::{CompileError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Run the adjacent-jump merge after linearization
    pub enable_peephole: bool,
    /// Compile function contexts on worker threads
    pub parallel: bool,
    /// Nesting limit for macro and composite expansion
    pub max_expansion_depth: usize,
    /// Generate a stub function per ubergraph event
    pub emit_event_stubs: bool,
    /// Warn about nodes unreachable from any entry point
    pub prune_isolated_nodes: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            enable_peephole: true,
            parallel: true,
            max_expansion_depth: 32,
            emit_event_stubs: true,
            prune_isolated_nodes: true,
        }
    }
}

impl CompileOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_expansion_depth == 0 {
            return Err(CompileError::InvalidConfiguration(
                "max_expansion_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Special compilation modes of a single function context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextFlags {
    /// Reject writes to non-local storage
    pub const_enforcement: bool,
    /// Skip lowering and emit an empty shell
    pub interface_stub: bool,
    /// Wrap the body in replication checks
    pub networked: bool,
}

impl ContextFlags {
    pub fn validate(&self, function: &str, kind: ContextKind) -> Result<()> {
        if self.const_enforcement && self.interface_stub {
            return Err(CompileError::InvalidConfiguration(format!(
                "'{}' cannot be both const-enforced and an interface stub",
                function
            )));
        }
        if self.interface_stub && kind == ContextKind::Ubergraph {
            return Err(CompileError::InvalidConfiguration(format!(
                "ubergraph '{}' cannot be an interface stub",
                function
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults_from_empty_json() {
        let options = CompileOptions::from_json("{}").unwrap();
        assert_eq!(options, CompileOptions::default());
    }

    #[test]
    fn test_options_reject_zero_depth() {
        let result = CompileOptions::from_json(r#"{ "max_expansion_depth": 0 }"#);
        assert!(matches!(result, Err(CompileError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_options_malformed_json() {
        let result = CompileOptions::from_json("{ not json");
        assert!(matches!(result, Err(CompileError::Serialization(_))));
    }

    #[test]
    fn test_flag_combinations() {
        let bad = ContextFlags {
            const_enforcement: true,
            interface_stub: true,
            networked: false,
        };
        assert!(bad.validate("GetHealth", ContextKind::Function).is_err());

        let stub_ubergraph = ContextFlags {
            interface_stub: true,
            ..Default::default()
        };
        assert!(stub_ubergraph.validate("EventGraph", ContextKind::Ubergraph).is_err());

        let networked = ContextFlags {
            networked: true,
            const_enforcement: true,
            ..Default::default()
        };
        assert!(networked.validate("ServerFire", ContextKind::Function).is_ok());
    }
}
