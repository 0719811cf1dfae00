//! Startup configuration: CLI flags with environment fallbacks.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use atlas_agent::{CodeToolConfig, OrchestratorConfig};
use atlas_llm::OpenAIAdapterConfig;
use atlas_sandbox::E2bConfig;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "atlas", version, about = "Atlas data analyst chat server")]
pub struct Cli {
    /// Address to listen on (env: ATLAS_BIND)
    #[arg(long, env = "ATLAS_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Base URL clients use to reach this server; defaults to http://<bind>
    #[arg(long, env = "ATLAS_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Directory uploaded files are stored in (env: ATLAS_UPLOAD_DIR)
    #[arg(long, env = "ATLAS_UPLOAD_DIR", default_value = "api/uploads")]
    pub upload_dir: PathBuf,

    /// Largest accepted upload body in bytes
    #[arg(long, env = "ATLAS_MAX_UPLOAD_BYTES", default_value_t = 50 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    /// Model driving the chat loop (env: ATLAS_MODEL)
    #[arg(long, env = "ATLAS_MODEL", default_value = "gpt-4.1-mini")]
    pub model: String,

    /// Model that writes analysis code (env: ATLAS_CODE_MODEL)
    #[arg(long, env = "ATLAS_CODE_MODEL", default_value = "gpt-5.1")]
    pub code_model: String,

    /// Model that answers research queries (env: ATLAS_RESEARCH_MODEL)
    #[arg(long, env = "ATLAS_RESEARCH_MODEL", default_value = "gpt-5.1")]
    pub research_model: String,

    /// Reasoning effort for the research model, e.g. "none" or "low"
    #[arg(long, env = "ATLAS_RESEARCH_REASONING")]
    pub research_reasoning: Option<String>,

    /// Generation calls allowed per chat request
    #[arg(long, env = "ATLAS_MAX_ITERATIONS", default_value_t = 5)]
    pub max_iterations: usize,

    #[arg(long, env = "E2B_API_KEY", hide_env_values = true)]
    pub e2b_api_key: Option<String>,

    #[arg(long, env = "E2B_API_URL")]
    pub e2b_api_url: Option<String>,

    #[arg(long, env = "E2B_DOMAIN")]
    pub e2b_domain: Option<String>,

    /// Seconds a single snippet may run in the sandbox
    #[arg(long, env = "ATLAS_EXECUTE_TIMEOUT_SECS", default_value_t = 120)]
    pub execute_timeout_secs: u64,
}

/// Fully resolved server configuration.
#[derive(Clone, Debug)]
pub struct AtlasConfig {
    pub bind: SocketAddr,
    pub public_url: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub openai: OpenAIAdapterConfig,
    pub e2b: E2bConfig,
    pub orchestrator: OrchestratorConfig,
    pub code: CodeToolConfig,
    pub research_model: String,
    pub research_reasoning: Option<String>,
}

impl AtlasConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let openai_key = cli
            .openai_api_key
            .context("OPENAI_API_KEY is not set (flag --openai-api-key)")?;
        let mut openai = OpenAIAdapterConfig::new(openai_key);
        if let Some(base_url) = cli.openai_base_url {
            openai = openai.with_base_url(validated_url(&base_url, "OPENAI_BASE_URL")?);
        }

        let e2b_key = cli
            .e2b_api_key
            .context("E2B_API_KEY is not set (flag --e2b-api-key)")?;
        let mut e2b = E2bConfig::new(e2b_key);
        if let Some(api_url) = cli.e2b_api_url {
            e2b.api_url = validated_url(&api_url, "E2B_API_URL")?;
        }
        if let Some(domain) = cli.e2b_domain {
            e2b.domain = domain;
        }

        let public_url = match cli.public_url {
            Some(url) => validated_url(&url, "ATLAS_PUBLIC_URL")?,
            None => format!("http://{}", cli.bind),
        };

        let mut code = CodeToolConfig {
            model: cli.code_model,
            ..Default::default()
        };
        code.session_timeouts.execute = Duration::from_secs(cli.execute_timeout_secs);

        Ok(Self {
            bind: cli.bind,
            public_url: public_url.trim_end_matches('/').to_string(),
            upload_dir: cli.upload_dir,
            max_upload_bytes: cli.max_upload_bytes,
            openai,
            e2b,
            orchestrator: OrchestratorConfig {
                model: cli.model,
                max_iterations: cli.max_iterations,
                ..Default::default()
            },
            code,
            research_model: cli.research_model,
            research_reasoning: cli.research_reasoning,
        })
    }
}

fn validated_url(raw: &str, key: &str) -> Result<String> {
    let url = url::Url::parse(raw).with_context(|| format!("{key} is not a valid URL: {raw}"))?;
    anyhow::ensure!(
        matches!(url.scheme(), "http" | "https"),
        "{key} must be an http(s) URL: {raw}"
    );
    Ok(raw.trim_end_matches('/').to_string())
}

/// Load a .env file without overriding variables already set.
pub fn load_env(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    for item in dotenvy::from_path_iter(path).context("load .env")? {
        let (key, value) = item?;
        if std::env::var_os(&key).is_none() {
            // Called before the runtime starts any other thread.
            unsafe {
                std::env::set_var(&key, &value);
            }
        }
    }
    Ok(())
}
