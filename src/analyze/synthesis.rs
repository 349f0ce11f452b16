//! Synthesis engines: prompt text in, raw text out, within a time box.
//!
//! Every failure is a [`SynthesisError`]; the pipeline turns it into an error
//! string on the run report and persists nothing for that run.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::config::synthesis::SynthesisConfig;

pub const ENV_TEST_MODE: &str = "SYNTHESIS_TEST_MODE";

/// Cap on captured stderr in error messages.
const STDERR_SNIPPET_CHARS: usize = 400;

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("synthesis disabled: {0}")]
    Disabled(String),
    #[error("synthesis misconfigured: {0}")]
    Config(String),
    #[error("failed to start synthesis command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),
    #[error("synthesis command exited with status {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("synthesis http call failed: {0}")]
    Http(String),
    #[error("synthesis returned an empty response")]
    EmptyResponse,
}

pub type SynthesisFuture<'a> = Pin<Box<dyn Future<Output = Result<String, SynthesisError>> + Send + 'a>>;

pub trait SynthesisEngine: Send + Sync {
    fn synthesize<'a>(&'a self, prompt: &'a str) -> SynthesisFuture<'a>;
    /// Provider name for logs and reports.
    fn name(&self) -> &'static str;
}

pub type DynEngine = Arc<dyn SynthesisEngine>;

/// Factory: build an engine according to config and environment variables.
///
/// * If `SYNTHESIS_TEST_MODE=mock`, returns the deterministic mock.
/// * Else if `config.enabled == false`, returns a disabled engine.
/// * Else builds the configured provider. A configuration problem (no
///   command, missing key) yields a disabled engine carrying the reason, so
///   only synthesis is affected.
pub fn build_engine(config: &SynthesisConfig) -> DynEngine {
    match try_build_engine(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::warn!(error = %e, "synthesis engine unavailable");
            Arc::new(DisabledEngine::new(e.to_string()))
        }
    }
}

pub fn try_build_engine(config: &SynthesisConfig) -> Result<DynEngine, SynthesisError> {
    if std::env::var(ENV_TEST_MODE)
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockEngine::default()));
    }

    if !config.enabled {
        return Ok(Arc::new(DisabledEngine::new("disabled in config")));
    }

    match config.provider.as_str() {
        "command" => {
            let engine = CommandEngine::from_argv(&config.command, config.timeout())
                .ok_or_else(|| SynthesisError::Config("`command` is empty".to_string()))?;
            Ok(Arc::new(engine))
        }
        "openai" => {
            let key = config
                .resolved_api_key()
                .map_err(|e| SynthesisError::Config(e.to_string()))?;
            Ok(Arc::new(OpenAiEngine::new(config, key)))
        }
        other => Err(SynthesisError::Config(format!(
            "unsupported provider in config: {other}"
        ))),
    }
}

// ------------------------------------------------------------
// External command
// ------------------------------------------------------------

/// Spawns a program, writes the prompt to its stdin, reads stdout.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// `argv[0]` is the program. `None` for an empty list.
    pub fn from_argv(argv: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec(), timeout))
    }

    async fn run(&self, prompt: &str) -> Result<String, SynthesisError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SynthesisError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A child that exits without reading is reported through its status.
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            }
        };

        // Dropping the child on timeout kills it.
        let output = match tokio::time::timeout(self.timeout, async {
            let (_, out) = tokio::join!(feed, child.wait_with_output());
            out
        })
        .await
        {
            Ok(Ok(out)) => out,
            Ok(Err(source)) => {
                return Err(SynthesisError::Spawn {
                    program: self.program.clone(),
                    source,
                })
            }
            Err(_) => return Err(SynthesisError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SynthesisError::Exit {
                code: output.status.code(),
                stderr: stderr.trim().chars().take(STDERR_SNIPPET_CHARS).collect(),
            });
        }
        non_empty(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl SynthesisEngine for CommandEngine {
    fn synthesize<'a>(&'a self, prompt: &'a str) -> SynthesisFuture<'a> {
        Box::pin(self.run(prompt))
    }
    fn name(&self) -> &'static str {
        "command"
    }
}

// ------------------------------------------------------------
// OpenAI-compatible chat completions
// ------------------------------------------------------------

pub struct OpenAiEngine {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiEngine {
    pub fn new(config: &SynthesisConfig, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("signal-radar/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout())
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
        }
    }

    async fn call(&self, prompt: &str) -> Result<String, SynthesisError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
            temperature: 0.2,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| self.http_err(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SynthesisError::Http(format!("status {status}")));
        }
        let body: Resp = resp.json().await.map_err(|e| self.http_err(e))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        non_empty(content)
    }

    fn http_err(&self, e: reqwest::Error) -> SynthesisError {
        if e.is_timeout() {
            SynthesisError::Timeout(self.timeout)
        } else {
            SynthesisError::Http(e.to_string())
        }
    }
}

impl SynthesisEngine for OpenAiEngine {
    fn synthesize<'a>(&'a self, prompt: &'a str) -> SynthesisFuture<'a> {
        Box::pin(self.call(prompt))
    }
    fn name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Disabled + mock
// ------------------------------------------------------------

/// Always fails with `Disabled`; used when synthesis is off or misconfigured.
pub struct DisabledEngine {
    reason: String,
}

impl DisabledEngine {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl SynthesisEngine for DisabledEngine {
    fn synthesize<'a>(&'a self, _prompt: &'a str) -> SynthesisFuture<'a> {
        let reason = self.reason.clone();
        Box::pin(async move { Err(SynthesisError::Disabled(reason)) })
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Canned answer for `SYNTHESIS_TEST_MODE=mock`: prose around a valid array,
/// one converged p0, one single-source p0 and one absence finding.
pub const MOCK_RESPONSE: &str = r#"Here is what stands out this window:
[
  {"kind": "trend", "topic": "Agent sandboxing moves into vendor SDKs", "summary": "Primary, expert and crowd sources all describe sandbox defaults shipping inside agent SDKs within the same week.", "confidence": 0.8, "priority": "p0", "sources": ["anthropic_news", "simonwillison", "lobsters"], "convergence_tiers": ["primary", "expert", "crowd"], "pattern": "none"},
  {"kind": "tool_mention", "topic": "A single viral repo for local model routing", "summary": "One aggregator thread drives all the attention.", "confidence": 0.4, "priority": "p0", "sources": ["hackernews"], "convergence_tiers": ["raw", "crowd", "expert"], "pattern": "none"},
  {"kind": "gap", "topic": "No evaluation numbers for the new coding agents", "summary": "Launch posts describe capabilities but none publish benchmark results.", "confidence": 0.6, "priority": "p1", "sources": ["openai_blog", "the_verge_ai"], "pattern": "absence"}
]
Let me know if you need more detail."#;

#[derive(Clone)]
pub struct MockEngine {
    pub fixed: String,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new(MOCK_RESPONSE)
    }
}

impl MockEngine {
    pub fn new(fixed: impl Into<String>) -> Self {
        Self {
            fixed: fixed.into(),
        }
    }
}

impl SynthesisEngine for MockEngine {
    fn synthesize<'a>(&'a self, _prompt: &'a str) -> SynthesisFuture<'a> {
        let out = self.fixed.clone();
        Box::pin(async move { non_empty(out) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

fn non_empty(s: String) -> Result<String, SynthesisError> {
    if s.trim().is_empty() {
        Err(SynthesisError::EmptyResponse)
    } else {
        Ok(s)
    }
}
