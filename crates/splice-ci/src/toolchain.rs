//! Compiler invocation.
//!
//! [`CommandToolchain`] expands an argv template with `{input}` and
//! `{output}` placeholders. Without an explicit template the preset is picked
//! from the file extension.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use splice_core::ToolchainSettings;
use thiserror::Error;

use crate::runner::ProcessRunner;

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("no compiler preset for '.{0}' files")]
    UnsupportedLanguage(String),

    #[error("compiler command is empty")]
    EmptyCommand,

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
}

/// Built-in compiler presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilerPreset {
    /// gcc -Wall -Wextra -std=c11 -O2
    Gcc,
    /// g++ -Wall -Wextra -std=c++17 -O2
    Gxx,
}

impl CompilerPreset {
    pub fn for_extension(ext: &str) -> Result<Self, ToolchainError> {
        match ext {
            "c" | "h" => Ok(Self::Gcc),
            "cpp" | "cc" | "cxx" | "C" | "hpp" | "hh" => Ok(Self::Gxx),
            other => Err(ToolchainError::UnsupportedLanguage(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gcc => "gcc",
            Self::Gxx => "g++",
        }
    }

    /// Argv template for this preset.
    pub fn command(&self) -> Vec<String> {
        let standard = match self {
            Self::Gcc => "-std=c11",
            Self::Gxx => "-std=c++17",
        };
        [self.name(), "-Wall", "-Wextra", standard, "-O2", "{input}", "-o", "{output}"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

/// Where and how to compile one materialized file.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Compiler working directory. Defaults to the directory holding the input.
    pub working_dir: Option<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    /// Path of the executable to produce.
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Set when the compiler exited 0 and the output file exists.
    pub executable: Option<PathBuf>,
    pub duration_ms: u64,
}

impl CompileOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined(&self) -> String {
        match (self.stderr.is_empty(), self.stdout.is_empty()) {
            (true, _) => self.stdout.clone(),
            (false, true) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stderr, self.stdout),
        }
    }
}

/// Compiles one source file.
#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn compile(
        &self,
        input: &Path,
        ctx: &BuildContext,
    ) -> Result<CompileOutput, ToolchainError>;
}

/// Runs a compiler process per call.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    template: Option<Vec<String>>,
    timeout: Duration,
}

impl CommandToolchain {
    pub fn new(template: Option<Vec<String>>, timeout: Duration) -> Self {
        Self { template, timeout }
    }

    pub fn from_settings(settings: &ToolchainSettings) -> Self {
        Self::new(
            settings.command.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    /// Expand the template for `input`, inserting `-I` flags after the program name.
    pub fn argv(&self, input: &Path, ctx: &BuildContext) -> Result<Vec<String>, ToolchainError> {
        let template = match &self.template {
            Some(t) => t.clone(),
            None => {
                let ext = input
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default();
                CompilerPreset::for_extension(&ext)?.command()
            }
        };
        let (program, rest) = template.split_first().ok_or(ToolchainError::EmptyCommand)?;

        let input = input.to_string_lossy();
        let output = ctx.output.to_string_lossy();
        let mut argv = vec![program.clone()];
        argv.extend(ctx.include_dirs.iter().map(|d| format!("-I{}", d.display())));
        argv.extend(rest.iter().map(|arg| {
            arg.replace("{input}", &input)
                .replace("{output}", &output)
        }));
        Ok(argv)
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    async fn compile(
        &self,
        input: &Path,
        ctx: &BuildContext,
    ) -> Result<CompileOutput, ToolchainError> {
        let argv = self.argv(input, ctx)?;
        let working_dir = ctx
            .working_dir
            .as_deref()
            .or_else(|| input.parent());
        let out = ProcessRunner::run(&argv, working_dir, self.timeout).await?;

        let executable = (out.success() && ctx.output.exists()).then(|| ctx.output.clone());
        Ok(CompileOutput {
            exit_code: out.exit_code,
            stdout: out.stdout,
            stderr: out.stderr,
            executable,
            duration_ms: out.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &Path) -> BuildContext {
        BuildContext {
            working_dir: None,
            include_dirs: vec![PathBuf::from("/opt/inc")],
            output: dir.join("a.out"),
        }
    }

    #[test]
    fn test_preset_by_extension() {
        assert_eq!(CompilerPreset::for_extension("c").unwrap(), CompilerPreset::Gcc);
        assert_eq!(CompilerPreset::for_extension("cpp").unwrap(), CompilerPreset::Gxx);
        assert!(matches!(
            CompilerPreset::for_extension("rs"),
            Err(ToolchainError::UnsupportedLanguage(_))
        ));
        assert!(CompilerPreset::Gxx.command().contains(&"-std=c++17".to_string()));
    }

    #[test]
    fn test_argv_expands_placeholders_and_includes() {
        let tc = CommandToolchain::new(None, Duration::from_secs(5));
        let argv = tc
            .argv(Path::new("/tmp/x/unit.c"), &ctx(Path::new("/tmp/x")))
            .unwrap();
        assert_eq!(argv[0], "gcc");
        assert_eq!(argv[1], "-I/opt/inc");
        assert!(argv.contains(&"/tmp/x/unit.c".to_string()));
        assert_eq!(argv.last().unwrap(), "/tmp/x/a.out");
    }

    #[test]
    fn test_custom_template() {
        let tc = CommandToolchain::new(
            Some(vec!["clang".into(), "-c".into(), "{input}".into()]),
            Duration::from_secs(5),
        );
        let argv = tc
            .argv(Path::new("u.rs"), &ctx(Path::new("/tmp")))
            .unwrap();
        assert_eq!(argv, vec!["clang", "-I/opt/inc", "-c", "u.rs"]);

        let empty = CommandToolchain::new(Some(vec![]), Duration::from_secs(5));
        assert!(matches!(
            empty.argv(Path::new("u.c"), &ctx(Path::new("/tmp"))),
            Err(ToolchainError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn test_compile_with_shell_template() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("unit.c");
        std::fs::write(&input, "int main(void) { return 0; }\n").unwrap();

        let tc = CommandToolchain::new(
            Some(vec![
                "sh".into(),
                "-c".into(),
                "cp \"$0\" \"$1\"".into(),
                "{input}".into(),
                "{output}".into(),
            ]),
            Duration::from_secs(10),
        );
        let ctx = BuildContext {
            working_dir: None,
            include_dirs: vec![],
            output: dir.path().join("unit.out"),
        };
        let out = tc.compile(&input, &ctx).await.unwrap();
        assert!(out.success());
        assert_eq!(out.executable.as_deref(), Some(ctx.output.as_path()));
    }
}
