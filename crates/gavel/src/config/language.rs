use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::types::BudgetOverrides;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Default PATH for sandboxed processes
pub const DEFAULT_SANDBOX_PATH: &str = "/usr/bin:/bin";

/// Configuration for a programming language.
///
/// Toolchain selection is a pure function of the submission's declared
/// language: the language table maps a key to this record, and an unknown
/// key is a configuration error before any sandbox work happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name for the language (e.g., "C++17 (GCC)")
    pub name: String,

    /// File extension
    pub extension: FileExtension,

    /// Compilation configuration (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileConfig>,

    /// Execution configuration
    pub run: RunConfig,
}

impl Language {
    /// Check if the language is compiled
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Get the source file name for this language
    pub fn source_name(&self) -> String {
        if let Some(ref compile) = self.compile {
            compile.source_name.clone()
        } else {
            format!("main.{}", self.extension)
        }
    }

    /// Expand placeholders in the given command
    pub fn expand_command(command: &[String], source: &str, artifact: &str) -> Vec<String> {
        command
            .iter()
            .map(|arg| {
                arg.replace("{source}", source)
                    .replace("{output}", artifact)
                    .replace("{artifact}", artifact)
            })
            .collect()
    }
}

/// File extension without dot (e.g., "cpp")
#[derive(Debug, Clone, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {output}
    pub command: Vec<String>,

    /// Source file name in the workspace (e.g., "main.cpp")
    pub source_name: String,

    /// Output artifact name (e.g., "main")
    pub output_name: String,

    /// Environment variables to set during compilation
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Budget adjustments for compilation (memory, processes); the wall
    /// ceiling always stays at the configured compile time limit.
    #[serde(default)]
    pub limits: Option<BudgetOverrides>,
}

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {artifact}
    pub command: Vec<String>,

    /// Environment variables visible to the judged program
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// PATH inside the sandbox
    #[serde(default = "default_run_path")]
    pub path: String,

    /// Budget adjustments for execution (e.g., extra processes for
    /// runtimes with mandatory helper threads)
    #[serde(default)]
    pub limits: Option<BudgetOverrides>,
}

fn default_run_path() -> String {
    DEFAULT_SANDBOX_PATH.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_run() -> RunConfig {
        RunConfig {
            command: vec!["./{artifact}".to_string()],
            env: HashMap::new(),
            path: default_run_path(),
            limits: None,
        }
    }

    #[test]
    fn file_extension_rejects_separator_chars() {
        assert!(FileExtension::new("cpp").is_ok());
        assert!(FileExtension::new("tar.gz").is_err());
        assert!(FileExtension::new("a/b").is_err());
    }

    #[test]
    fn source_name_for_interpreted_language() {
        let lang = Language {
            name: "Python 3".to_string(),
            extension: FileExtension::new("py").unwrap(),
            compile: None,
            run: minimal_run(),
        };
        assert_eq!(lang.source_name(), "main.py");
        assert!(!lang.is_compiled());
    }

    #[test]
    fn source_name_for_compiled_language() {
        let lang = Language {
            name: "C++17".to_string(),
            extension: FileExtension::new("cpp").unwrap(),
            compile: Some(CompileConfig {
                command: vec!["g++".to_string(), "{source}".to_string()],
                source_name: "main.cpp".to_string(),
                output_name: "main".to_string(),
                env: HashMap::new(),
                limits: None,
            }),
            run: minimal_run(),
        };
        assert_eq!(lang.source_name(), "main.cpp");
        assert!(lang.is_compiled());
    }

    #[test]
    fn expand_command_replaces_placeholders() {
        let command = vec![
            "g++".to_string(),
            "-O2".to_string(),
            "{source}".to_string(),
            "-o".to_string(),
            "{output}".to_string(),
        ];
        let expanded = Language::expand_command(&command, "main.cpp", "main");
        assert_eq!(expanded, vec!["g++", "-O2", "main.cpp", "-o", "main"]);
    }

    #[test]
    fn expand_command_handles_artifact_placeholder() {
        let command = vec!["{artifact}".to_string()];
        let expanded = Language::expand_command(&command, "main.cpp", "/judge/ws1/main");
        assert_eq!(expanded, vec!["/judge/ws1/main"]);
    }
}
