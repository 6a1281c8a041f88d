//! Agent configuration, loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::sandbox::JuliaSandbox;
use crate::runtime::error::{GraphError, GraphResult};
use crate::runtime::provider::OpenAiChatModelConfig;

/// Agent configuration (TOML). Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Generation attempts per request before a forced stop.
    pub max_iterations: u32,
    /// Pause for review before validating generated code.
    pub human_in_the_loop: bool,
    /// In human mode, also review the retrieval query and documents.
    /// Set to false to review only the generated code.
    pub review_retrieval: bool,
    /// Keep earlier turns in the conversation sent to the model.
    pub carry_history: bool,
    /// Query the retriever on every request instead of only the first.
    pub retrieve_each_turn: bool,
    pub retrieval_limit: usize,
    /// Node executions allowed per run.
    pub recursion_limit: usize,
    /// Steps kept in reserve for finalize when deciding whether a tool
    /// round trip still fits the recursion limit.
    pub min_remaining_steps: usize,
    pub quit_tokens: Vec<String>,
    pub sandbox: SandboxConfig,
    pub model: ModelConfig,
    /// Where the final code block is written.
    pub output_path: Option<PathBuf>,
    /// Directory for pending-decision checkpoints.
    pub checkpoint_dir: Option<PathBuf>,
    /// Overrides the built-in system prompt.
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub binary: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub temperature: Option<f32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            human_in_the_loop: false,
            review_retrieval: true,
            carry_history: true,
            retrieve_each_turn: true,
            retrieval_limit: 5,
            recursion_limit: crate::runtime::constants::DEFAULT_RECURSION_LIMIT,
            min_remaining_steps: 2,
            quit_tokens: vec!["exit".to_string(), "quit".to_string(), "q".to_string()],
            sandbox: SandboxConfig::default(),
            model: ModelConfig::default(),
            output_path: None,
            checkpoint_dir: None,
            system_prompt: None,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            binary: "julia".to_string(),
            args: vec!["--startup-file=no".to_string(), "--color=no".to_string()],
            timeout_secs: 60,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_ms: 60_000,
            temperature: None,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> GraphResult<()> {
        if self.max_iterations == 0 {
            return Err(config_error("max_iterations must be > 0"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(config_error("sandbox.timeout_secs must be > 0"));
        }
        let loop_steps = self.minimum_recursion_limit();
        if self.recursion_limit < loop_steps {
            return Err(GraphError::Config(format!(
                "recursion_limit must be at least {loop_steps} for {} iterations",
                self.max_iterations
            )));
        }
        if self.min_remaining_steps < 1 {
            return Err(config_error("min_remaining_steps must be > 0"));
        }
        if self.min_remaining_steps >= self.recursion_limit {
            return Err(config_error(
                "min_remaining_steps must be below recursion_limit",
            ));
        }
        if self.sandbox.binary.trim().is_empty() {
            return Err(config_error("sandbox.binary must be set"));
        }
        if self.quit_tokens.iter().all(|token| token.trim().is_empty()) {
            return Err(config_error("quit_tokens must contain at least one token"));
        }
        Ok(())
    }

    /// Steps a request needs without tool calls: the three retrieval nodes,
    /// finalize, and generate, human_check, validate per iteration.
    pub fn minimum_recursion_limit(&self) -> usize {
        4 + 3 * self.max_iterations as usize
    }

    /// Case-insensitive match against the configured quit tokens.
    pub fn is_quit(&self, input: &str) -> bool {
        let input = input.trim();
        self.quit_tokens
            .iter()
            .any(|token| token.trim().eq_ignore_ascii_case(input))
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox.timeout_secs)
    }

    /// Retrieval-review checkpoints only run in human mode.
    pub fn reviews_retrieval(&self) -> bool {
        self.human_in_the_loop && self.review_retrieval
    }
}

impl SandboxConfig {
    pub fn build(&self) -> JuliaSandbox {
        JuliaSandbox::new(&self.binary).with_args(self.args.clone())
    }
}

impl ModelConfig {
    pub fn openai(&self) -> OpenAiChatModelConfig {
        let mut config = OpenAiChatModelConfig::new(&self.name)
            .with_api_key_env(&self.api_key_env)
            .with_timeout_ms(self.timeout_ms)
            .with_temperature(self.temperature);
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url);
        }
        config
    }
}

fn config_error(message: &str) -> GraphError {
    GraphError::Config(message.to_string())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> GraphResult<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path)
        .map_err(|err| GraphError::io(format!("reading {}", path.display()), err))?;
    let cfg: AgentConfig = toml::from_str(&contents)
        .map_err(|err| GraphError::Config(format!("parse {}: {err}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}
