//! Run configuration.
//!
//! One explicit [`RunConfig`] is handed to the batch runner; nothing reads
//! global state. Files are TOML; the CLI overlays flags on top.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{Result, SpliceError};

pub const DEFAULT_ENDPOINT: &str = "https://api.mistral.ai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "codestral-latest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Directory for the `splice.log` file layer.
    pub log_dir: Option<PathBuf>,
    pub source_file: PathBuf,
    /// Explicit function identifiers, in file order. `name@k` selects the k-th overload.
    pub functions: Vec<String>,
    /// Number of functions to mutate (N). Zero means "all of `functions`".
    pub num_funcs: u32,
    pub llm_model: String,
    pub output_dir: PathBuf,
    /// Candidate store root. Defaults to `<output_dir>/.splice`.
    pub store_dir: Option<PathBuf>,
    pub trials: u32,
    /// Merge-back window K. Defaults to N.
    pub merge_back: Option<u32>,
    pub auto_fix: bool,
    pub run_tests: bool,
    pub parallel: usize,
    pub use_cache: bool,
    pub max_fix_attempts: u32,
    pub generation: GenerationSettings,
    pub toolchain: ToolchainSettings,
    pub environment: EnvironmentSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            source_file: PathBuf::new(),
            functions: Vec::new(),
            num_funcs: 0,
            llm_model: DEFAULT_MODEL.to_string(),
            output_dir: PathBuf::from("splice-out"),
            store_dir: None,
            trials: 1,
            merge_back: None,
            auto_fix: true,
            run_tests: false,
            parallel: 4,
            use_cache: false,
            max_fix_attempts: 3,
            generation: GenerationSettings::default(),
            toolchain: ToolchainSettings::default(),
            environment: EnvironmentSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub endpoint: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key_env: "SPLICE_API_KEY".to_string(),
            timeout_secs: 60,
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSettings {
    /// Compiler argv template with `{input}` / `{output}` placeholders. None picks gcc/g++ by extension.
    pub command: Option<Vec<String>>,
    pub include_dirs: Vec<PathBuf>,
    /// Working directory for the compiler, so project-relative includes resolve.
    pub build_context: Option<PathBuf>,
    /// Parent for scratch directories. Defaults to the system temp dir.
    pub scratch_dir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub test_timeout_secs: u64,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            command: None,
            include_dirs: Vec::new(),
            build_context: None,
            scratch_dir: None,
            timeout_secs: 30,
            test_timeout_secs: 10,
        }
    }
}

/// Extra rules for classifying compiler failures as environment-expected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Additional regexes; an error line matching any of them is environment-expected.
    pub patterns: Vec<String>,
    /// Headers allowed to be missing. Empty means any missing header is environment-expected.
    pub expected_headers: Vec<String>,
}

impl RunConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load a TOML file. Relative paths inside it are resolved against the file's directory.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.rebase(base);
        }
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() && !p.as_os_str().is_empty() {
                *p = base.join(&*p);
            }
        };
        fix(&mut self.source_file);
        fix(&mut self.output_dir);
        if let Some(p) = self.store_dir.as_mut() {
            fix(p);
        }
        if let Some(p) = self.log_dir.as_mut() {
            fix(p);
        }
        if let Some(p) = self.toolchain.build_context.as_mut() {
            fix(p);
        }
        if let Some(p) = self.toolchain.scratch_dir.as_mut() {
            fix(p);
        }
        for p in self.toolchain.include_dirs.iter_mut() {
            fix(p);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_file.as_os_str().is_empty() {
            return Err(SpliceError::InvalidConfig("source_file is required".into()));
        }
        if self.trials == 0 {
            return Err(SpliceError::InvalidConfig("trials must be at least 1".into()));
        }
        if self.parallel == 0 {
            return Err(SpliceError::InvalidConfig("parallel must be at least 1".into()));
        }
        if self.num_funcs == 0 && self.functions.is_empty() {
            return Err(SpliceError::InvalidConfig(
                "set num_funcs or list functions".into(),
            ));
        }
        if !self.functions.is_empty() && self.num_funcs as usize > self.functions.len() {
            return Err(SpliceError::InvalidConfig(format!(
                "num_funcs is {} but only {} functions are listed",
                self.num_funcs,
                self.functions.len()
            )));
        }
        if self.merge_back == Some(0) {
            return Err(SpliceError::InvalidConfig("merge_back must be at least 1".into()));
        }
        if let Some(cmd) = &self.toolchain.command {
            if cmd.is_empty() {
                return Err(SpliceError::InvalidConfig("toolchain.command is empty".into()));
            }
        }
        if self.generation.timeout_secs == 0 || self.toolchain.timeout_secs == 0 {
            return Err(SpliceError::InvalidConfig("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn store_root(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join(".splice"))
    }

    /// Merge-back window for a unit with `function_count` functions.
    pub fn merge_back_for(&self, function_count: u32) -> u32 {
        self.merge_back
            .unwrap_or(function_count)
            .min(function_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.max_fix_attempts, 3);
        assert_eq!(config.parallel, 4);
        assert_eq!(config.trials, 1);
        assert!(config.auto_fix);
        assert!(!config.use_cache);
        assert_eq!(config.generation.timeout_secs, 60);
        assert_eq!(config.toolchain.timeout_secs, 30);
        assert_eq!(config.store_root(), PathBuf::from("splice-out/.splice"));
    }

    #[test]
    fn test_parse_toml_with_sections() {
        let raw = r#"
source_file = "src/server.c"
functions = ["parse_args", "handle_client"]
trials = 2
use_cache = true
max_fix_attempts = 5

[generation]
endpoint = "http://localhost:8000/v1/chat/completions"
temperature = 0.2

[toolchain]
command = ["clang", "-c", "{input}", "-o", "{output}"]
include_dirs = ["include"]

[environment]
expected_headers = ["windows.h"]
"#;
        let config = RunConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.functions.len(), 2);
        assert_eq!(config.trials, 2);
        assert!(config.use_cache);
        assert_eq!(config.max_fix_attempts, 5);
        assert_eq!(config.generation.temperature, 0.2);
        assert_eq!(config.generation.top_p, 0.9);
        assert_eq!(config.toolchain.command.as_ref().unwrap()[0], "clang");
        assert_eq!(config.environment.expected_headers, vec!["windows.h"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_file_paths_are_rebased() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splice.toml");
        std::fs::write(&path, "source_file = \"a.c\"\nnum_funcs = 1\n").unwrap();
        let config = RunConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.source_file, dir.path().join("a.c"));
        assert_eq!(config.output_dir, dir.path().join("splice-out"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = RunConfig {
            source_file: PathBuf::from("a.c"),
            num_funcs: 2,
            ..Default::default()
        };
        base.validate().unwrap();

        let zero_trials = RunConfig {
            trials: 0,
            ..base.clone()
        };
        assert!(zero_trials.validate().is_err());

        let zero_parallel = RunConfig {
            parallel: 0,
            ..base.clone()
        };
        assert!(zero_parallel.validate().is_err());

        let nothing_selected = RunConfig {
            num_funcs: 0,
            ..base.clone()
        };
        assert!(nothing_selected.validate().is_err());

        let too_many = RunConfig {
            num_funcs: 3,
            functions: vec!["a".into(), "b".into()],
            ..base.clone()
        };
        assert!(too_many.validate().is_err());

        let no_source = RunConfig {
            source_file: PathBuf::new(),
            ..base
        };
        assert!(no_source.validate().is_err());
    }

    #[test]
    fn test_merge_back_defaults_to_function_count() {
        let mut config = RunConfig::default();
        assert_eq!(config.merge_back_for(3), 3);
        config.merge_back = Some(2);
        assert_eq!(config.merge_back_for(3), 2);
        config.merge_back = Some(10);
        assert_eq!(config.merge_back_for(3), 3);
    }

    #[test]
    fn test_unknown_toml_type_errors() {
        assert!(RunConfig::from_toml_str("trials = \"many\"").is_err());
    }
}
