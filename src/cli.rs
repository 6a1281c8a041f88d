//! Command-line arguments and terminal adapters.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Map, Value};

use juliacoder::agent::human::{DecisionKind, DecisionRequest, HumanDecision, ReviewCheckpoint};
use juliacoder::agent::session::{Console, HumanInterruptPresenter};
use juliacoder::agent::AgentConfig;
use juliacoder::runtime::component::{ContextChunk, InMemoryRetriever};
use juliacoder::runtime::error::{GraphError, GraphResult};

/// Line that ends multi-line input.
const END_OF_TEXT: &str = ".";

#[derive(Parser, Debug)]
#[command(
    name = "juliacoder",
    version,
    about = "Julia coding assistant that runs and repairs its own code"
)]
pub struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(short, long, default_value = "juliacoder.toml")]
    pub config: PathBuf,

    /// Review generated code before it runs.
    #[arg(long)]
    pub human: bool,

    /// In human mode, also review the retrieval query and documents.
    #[arg(long, value_name = "BOOL")]
    pub review_retrieval: Option<bool>,

    /// Generation attempts per request.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Write the final code here.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// JSON array of documents (`source_id`, `heading`, `content`) to search.
    #[arg(long)]
    pub docs: Option<PathBuf>,

    /// Append every runtime event as a JSON line to this file.
    #[arg(long)]
    pub event_log: Option<PathBuf>,

    /// Answer one request and exit.
    #[arg(long)]
    pub once: Option<String>,

    /// More logging (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Flags win over the config file.
    pub fn apply(&self, config: &mut AgentConfig) {
        if self.human {
            config.human_in_the_loop = true;
        }
        if let Some(review) = self.review_retrieval {
            config.review_retrieval = review;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(output) = &self.output {
            config.output_path = Some(output.clone());
        }
    }
}

pub fn load_docs(path: &Path) -> Result<InMemoryRetriever> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let chunks: Vec<ContextChunk> =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(InMemoryRetriever::from_chunks("docs", chunks))
}

fn read_stdin_line() -> GraphResult<Option<String>> {
    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|err| GraphError::io("reading stdin", err))?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn prompt(text: &str) -> GraphResult<()> {
    let mut stdout = io::stdout().lock();
    write!(stdout, "{text}")
        .and_then(|()| stdout.flush())
        .map_err(|err| GraphError::io("writing stdout", err))
}

/// Lines until a lone `.` or end of input.
fn read_block() -> GraphResult<String> {
    let mut lines = Vec::new();
    while let Some(line) = read_stdin_line()? {
        if line.trim() == END_OF_TEXT {
            break;
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

pub struct StdioConsole;

impl Console for StdioConsole {
    fn read_line(&mut self, text: &str) -> GraphResult<Option<String>> {
        prompt(text)?;
        read_stdin_line()
    }

    fn show(&mut self, text: &str) {
        println!("{text}\n");
    }
}

/// Asks for review decisions on the terminal.
pub struct StdioPresenter;

impl StdioPresenter {
    fn choose(&self, allowed: &[DecisionKind]) -> GraphResult<DecisionKind> {
        let options: Vec<&str> = allowed.iter().map(DecisionKind::as_str).collect();
        loop {
            prompt(&format!("[{}] > ", options.join("/")))?;
            let Some(line) = read_stdin_line()? else {
                return Err(GraphError::protocol("input closed during review"));
            };
            match DecisionKind::parse(&line) {
                Some(kind) if allowed.contains(&kind) => return Ok(kind),
                _ => println!("Please answer one of: {}", options.join(", ")),
            }
        }
    }

    fn edit_payload(&self, request: &DecisionRequest) -> GraphResult<Value> {
        match request.checkpoint {
            ReviewCheckpoint::CheckCode => {
                println!("Enter the new code, then a line with a single '.':");
                Ok(Value::Object(Map::from_iter([(
                    "code".to_string(),
                    Value::String(read_block()?),
                )])))
            }
            ReviewCheckpoint::ReviewQuery => {
                prompt("New query: ")?;
                Ok(Value::String(read_stdin_line()?.unwrap_or_default()))
            }
            ReviewCheckpoint::ReviewDocuments => {
                let mut slots = Map::new();
                for slot in request.args.keys() {
                    prompt(&format!(
                        "{slot}: Enter keeps it, '-' removes it, anything else replaces it: "
                    ))?;
                    match read_stdin_line()?.as_deref().map(str::trim) {
                        None | Some("") => {}
                        Some("-") => {
                            slots.insert(slot.clone(), Value::String(String::new()));
                        }
                        Some(text) => {
                            slots.insert(slot.clone(), Value::String(text.to_string()));
                        }
                    }
                }
                Ok(Value::Object(slots))
            }
        }
    }
}

impl HumanInterruptPresenter for StdioPresenter {
    fn present(&self, request: &DecisionRequest) -> GraphResult<HumanDecision> {
        println!("== {} ==\n{}", request.action, request.description);
        for (name, value) in &request.args {
            if !value.is_empty() {
                println!("--- {name}\n{value}");
            }
        }
        let kind = self.choose(&request.allowed)?;
        Ok(match kind {
            DecisionKind::Edit => HumanDecision::edit(self.edit_payload(request)?),
            DecisionKind::Accept => HumanDecision::accept(),
            DecisionKind::Ignore => HumanDecision::ignore(),
            DecisionKind::Respond => {
                prompt("Response: ")?;
                HumanDecision::respond(read_stdin_line()?.unwrap_or_default())
            }
        })
    }
}
