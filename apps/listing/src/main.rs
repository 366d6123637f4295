mod config;
mod errors;
mod generation;
mod llm_client;
mod models;
mod output;
mod rules;
mod translation;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::errors::AppError;
use crate::generation::bilingual::generate_bilingual_document;
use crate::generation::backoff::RetryPolicy;
use crate::generation::escalation::{ModelEscalation, NoEscalation, ReasoningFallback};
use crate::generation::generator::generate_document;
use crate::generation::GenerationOptions;
use crate::llm_client::balance::query_balance;
use crate::llm_client::{GenerationClient, HttpLlmClient, LlmSettings};
use crate::models::requirement::{is_requirement, Requirement};
use crate::rules::loader::load_rules;
use crate::translation::{
    deepl, ChatTranslator, DeepLTranslator, TranslationClient, TranslationProvider,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    init_tracing(&config);
    info!("Starting listing generator v{}", env!("CARGO_PKG_VERSION"));

    let inputs: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if inputs.is_empty() {
        bail!("usage: listing <requirement file or directory>...");
    }

    let rules = Arc::new(
        load_rules(&config.rules_dir)
            .with_context(|| format!("loading rules from {}", config.rules_dir.display()))?,
    );
    info!(
        "Rules loaded from {} (bullets: {}, paragraphs: {})",
        config.rules_dir.display(),
        rules.bullet_count(),
        rules.description_paragraphs()
    );

    let http_llm = Arc::new(HttpLlmClient::new(config.llm_settings())?);
    let llm: Arc<dyn GenerationClient> = http_llm.clone();
    info!(
        "LLM client initialized (provider: {}, model: {})",
        config.llm_provider, config.llm_model
    );
    let escalation = build_escalation(&config);
    let translator = build_translator(&config, llm.clone())?;
    if config.bilingual() {
        info!(
            "Bilingual mode: {} → {} via {:?}",
            config.source_lang, config.target_lang, config.translation.provider
        );
    }

    let files = collect_inputs(&inputs)?;
    let started = Instant::now();
    let mut failed = 0usize;
    let mut handles = Vec::new();

    for path in files {
        let requirement = match load_requirement(&path) {
            Ok(requirement) => Arc::new(requirement),
            Err(e) => {
                error!(input = %path.display(), error = %e, "Skipping requirement");
                failed += config.candidates;
                continue;
            }
        };
        for warning in &requirement.warnings {
            warn!(input = %path.display(), "{warning}");
        }

        for candidate in 1..=config.candidates {
            let job = CandidateJob {
                opts: GenerationOptions {
                    requirement: requirement.clone(),
                    rules: rules.clone(),
                    llm: llm.clone(),
                    model: config.llm_model.clone(),
                    escalation: escalation.clone(),
                    char_tolerance: config.char_tolerance,
                    max_retries: config.max_retries,
                    lang: config.source_lang.clone(),
                },
                translator: translator.clone(),
                output_dir: config.output_dir.clone(),
                target_lang: config.target_lang.clone(),
            };
            let span = info_span!("candidate", input = %path.display(), candidate);
            handles.push(tokio::spawn(run_candidate(job).instrument(span)));
        }
    }

    let mut succeeded = 0usize;
    for handle in handles {
        match handle.await {
            Ok(true) => succeeded += 1,
            Ok(false) => failed += 1,
            Err(e) => {
                error!(error = %e, "Candidate task aborted");
                failed += 1;
            }
        }
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let balance = account_balance(&http_llm, config.max_retries).await;
    info!(succeeded, failed, elapsed_ms, balance = %balance, "Job finished");
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Account balance for the summary line. Never fails the job.
async fn account_balance(client: &HttpLlmClient, max_retries: u32) -> String {
    let policy = RetryPolicy {
        max_delay: Duration::from_secs(5),
        jitter: 0.2,
        ..RetryPolicy::new(max_retries)
    };
    match query_balance(client, &policy).await {
        None => "n/a".to_string(),
        Some(Ok(balance)) => balance,
        Some(Err(e)) => {
            warn!(error = %e, "Balance query failed");
            "query failed".to_string()
        }
    }
}

fn build_escalation(config: &Config) -> Arc<dyn ModelEscalation> {
    match &config.reasoning_model {
        Some(model) if config.escalation_enabled => Arc::new(ReasoningFallback::new(
            model.clone(),
            config.escalation_attempt,
            true,
        )),
        _ => Arc::new(NoEscalation),
    }
}

fn build_translator(
    config: &Config,
    llm: Arc<dyn GenerationClient>,
) -> Result<Option<Arc<dyn TranslationClient>>> {
    let t = &config.translation;
    let source = config.source_lang.as_str();
    let target = config.target_lang.as_str();

    match t.provider {
        TranslationProvider::None => Ok(None),
        TranslationProvider::Chat => {
            // Reuse the generation client unless a separate endpoint is configured.
            let client: Arc<dyn GenerationClient> = if t.base_url.is_empty() && t.api_key.is_empty() {
                llm
            } else {
                let defaults = config.llm_settings();
                Arc::new(HttpLlmClient::new(LlmSettings {
                    base_url: non_empty_or(&t.base_url, &defaults.base_url),
                    api_key: non_empty_or(&t.api_key, &defaults.api_key),
                    ..defaults
                })?)
            };
            let model = non_empty_or(&t.model, &config.llm_model);
            Ok(Some(Arc::new(ChatTranslator::new(client, model, source, target))))
        }
        TranslationProvider::DeepL => {
            if t.api_key.is_empty() {
                bail!("TRANSLATION_API_KEY is required for the deepl provider");
            }
            let translator = DeepLTranslator::new(
                non_empty_or(&t.base_url, deepl::DEFAULT_BASE_URL),
                t.api_key.clone(),
                source,
                target,
                config.request_timeout,
            )?;
            Ok(Some(Arc::new(translator)))
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Expands directories (non-recursively) into requirement files.
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
            continue;
        }
        if !input.is_dir() {
            bail!("input not found: {}", input.display());
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(input)
            .with_context(|| format!("reading directory {}", input.display()))?
        {
            let path = entry?.path();
            if is_requirement_file(&path) {
                found.push(path);
            }
        }
        found.sort();
        if found.is_empty() {
            warn!("No requirement files found in {}", input.display());
        }
        files.extend(found);
    }
    Ok(files)
}

fn is_requirement_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if !matches!(ext.as_deref(), Some("md" | "txt")) || !path.is_file() {
        return false;
    }
    std::fs::read_to_string(path)
        .map(|raw| is_requirement(&raw))
        .unwrap_or(false)
}

fn load_requirement(path: &Path) -> Result<Requirement, AppError> {
    let requirement = Requirement::from_file(path)?;
    requirement.ensure_complete()?;
    Ok(requirement)
}

struct CandidateJob {
    opts: GenerationOptions,
    translator: Option<Arc<dyn TranslationClient>>,
    output_dir: PathBuf,
    target_lang: String,
}

/// Runs one candidate end to end and logs its outcome. Files are written only
/// when every stage passed.
async fn run_candidate(job: CandidateJob) -> bool {
    let started = Instant::now();
    let source_lang = job.opts.lang.clone();
    let result = match job.translator {
        None => match generate_document(&job.opts).await {
            Ok(generated) => {
                info!(latency_ms = generated.latency_ms, "Document generated");
                output::write_documents(
                    &job.output_dir,
                    &job.opts.requirement,
                    &[(source_lang.as_str(), &generated.document)],
                )
                .await
            }
            Err(e) => Err(e),
        },
        Some(translator) => match generate_bilingual_document(&job.opts, translator).await {
            Ok(out) => {
                info!(
                    source_latency_ms = out.source_latency_ms,
                    target_latency_ms = out.target_latency_ms,
                    "Bilingual document generated"
                );
                output::write_documents(
                    &job.output_dir,
                    &job.opts.requirement,
                    &[
                        (source_lang.as_str(), &out.source),
                        (job.target_lang.as_str(), &out.target),
                    ],
                )
                .await
            }
            Err(e) => Err(e),
        },
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(paths) => {
            for path in &paths {
                info!(path = %path.display(), "Wrote listing");
            }
            info!(elapsed_ms, "Candidate succeeded");
            true
        }
        Err(e) => {
            error!(elapsed_ms, error = %e, "Candidate failed");
            false
        }
    }
}
