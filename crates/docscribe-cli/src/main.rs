use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use docscribe_core::pool::JobResult;
use docscribe_core::{
    Config, ExtractedText, GeneratedDocument, GenerationJob, GenerationOptions,
    GenerationOutcome, LlmBackend, OpenAiBackend, OutputFormat, ProgressEvent, Task,
    config_file, generate_batch, prompt,
};
use tokio_util::sync::CancellationToken;

mod inputs;
mod output;

use inputs::InputDoc;
use output::ColorMode;

/// Turn PDFs and text files into summaries, reports and notes with an LLM
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate documents from PDF, text, Markdown or archive inputs
    Generate {
        /// Input files or glob patterns (e.g. "papers/*.pdf"); zip and tar.gz are expanded
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output format: docx, pdf, md or txt
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// What to generate: summary, report, notes or custom
        #[arg(short, long)]
        task: Option<Task>,

        /// Extra instructions for the model
        #[arg(short, long)]
        instructions: Option<String>,

        /// Directory for generated files (default: current directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Model name
        #[arg(long)]
        model: Option<String>,

        /// Base URL of an OpenAI-compatible API
        #[arg(long)]
        api_base: Option<String>,

        /// API key (default: OPENAI_API_KEY)
        #[arg(long)]
        api_key: Option<String>,

        /// Maximum characters of source text sent to the model (0 = unlimited)
        #[arg(long)]
        max_input_chars: Option<usize>,

        /// Number of documents generated concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Dry run: extract text and report prompt size without calling the model
        #[arg(long)]
        dry_run: bool,

        /// Also write the structured document as JSON next to the output
        #[arg(long)]
        save_json: bool,
    },

    /// Print or save the normalized text extracted from a file
    Extract {
        /// PDF, text or Markdown file
        input: PathBuf,

        /// Write the text to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a saved document JSON (from --save-json) into another format
    Render {
        /// Document JSON file
        json: PathBuf,

        /// Output format: docx, pdf, md or txt
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Output file (default: JSON path with the format's extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the resolved configuration (file, environment and defaults)
    Show {
        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
    /// Write a starter config file to the platform config directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Flags of `generate` that override file and environment configuration.
struct Overrides {
    model: Option<String>,
    api_base: Option<String>,
    api_key: Option<String>,
    max_input_chars: Option<usize>,
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Generate {
            inputs,
            format,
            task,
            instructions,
            output_dir,
            model,
            api_base,
            api_key,
            max_input_chars,
            workers,
            no_color,
            dry_run,
            save_json,
        } => {
            let config = resolve_config(Overrides {
                model,
                api_base,
                api_key,
                max_input_chars,
                workers,
            });
            let format = format.unwrap_or(config.default_format);
            let options = GenerationOptions::new(task.unwrap_or(config.default_task), instructions);
            let color = ColorMode(!no_color);

            if dry_run {
                dry_run_generate(&inputs, &config, &options, color).await
            } else {
                let output_dir = output_dir
                    .or_else(|| config.output_dir.clone())
                    .unwrap_or_else(|| PathBuf::from("."));
                generate(&inputs, config, options, format, &output_dir, save_json, color).await
            }
        }
        Command::Extract { input, output } => extract(input, output).await,
        Command::Render {
            json,
            format,
            output,
        } => {
            let config = resolve_config(Overrides::none());
            render(&json, format.unwrap_or(config.default_format), output)
        }
        Command::Config { action } => match action {
            ConfigAction::Show { no_color } => config_show(ColorMode(!no_color)),
            ConfigAction::Init { force } => config_init(force),
        },
    }
}

impl Overrides {
    fn none() -> Self {
        Self {
            model: None,
            api_base: None,
            api_key: None,
            max_input_chars: None,
            workers: None,
        }
    }
}

/// RUST_LOG controls verbosity; warnings only by default so progress output stays readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve configuration: CLI flags > env vars > config file > defaults
fn resolve_config(overrides: Overrides) -> Config {
    let file = config_file::load_config();
    merge_config(&file, |key| std::env::var(key).ok(), overrides)
}

fn merge_config(
    file: &config_file::ConfigFile,
    env: impl Fn(&str) -> Option<String>,
    overrides: Overrides,
) -> Config {
    let mut config = Config::from_config_file(file).apply_env(env);

    if let Some(model) = overrides.model {
        config.model = model;
    }
    if let Some(base) = overrides.api_base {
        config.api_base = base;
    }
    if let Some(key) = overrides.api_key.filter(|k| !k.trim().is_empty()) {
        config.api_key = Some(key);
    }
    if let Some(n) = overrides.max_input_chars {
        config.max_input_chars = n;
    }
    if let Some(n) = overrides.workers {
        config.num_workers = n.max(1);
    }
    config
}

/// Cancel `token` on the first Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });
    cancel
}

async fn extract_one(doc: &InputDoc) -> anyhow::Result<ExtractedText> {
    let path = doc.path.clone();
    let mut text = tokio::task::spawn_blocking(move || docscribe_ingest::extract_file(&path))
        .await??;
    // Archive members live under index-prefixed scratch names.
    text.filename = doc.filename.clone();
    Ok(text)
}

/// Resolve inputs, expand archives and extract text from each document.
/// Failed extractions are reported and skipped.
async fn collect_sources(
    patterns: &[String],
    scratch: &Path,
    max_archive_bytes: u64,
    color: ColorMode,
    out: &mut dyn Write,
) -> anyhow::Result<(Vec<ExtractedText>, usize)> {
    let paths = inputs::resolve_patterns(patterns)?;
    let (docs, warnings) = inputs::expand_archives(&paths, scratch, max_archive_bytes)?;
    for w in &warnings {
        output::print_warning(out, w, color)?;
    }

    let mut sources = Vec::with_capacity(docs.len());
    let mut failed = 0;
    for doc in &docs {
        match extract_one(doc).await {
            Ok(text) => {
                output::print_extraction_summary(out, &text, color)?;
                sources.push(text);
            }
            Err(e) => {
                failed += 1;
                output::print_progress(
                    out,
                    &ProgressEvent::Failed {
                        filename: doc.filename.clone(),
                        message: e.to_string(),
                    },
                    color,
                )?;
            }
        }
    }
    Ok((sources, failed))
}

async fn dry_run_generate(
    patterns: &[String],
    config: &Config,
    options: &GenerationOptions,
    color: ColorMode,
) -> anyhow::Result<()> {
    let scratch = tempfile::tempdir()?;
    let mut out = std::io::stdout();
    let (sources, _) =
        collect_sources(patterns, scratch.path(), config.max_archive_bytes(), color, &mut out)
            .await?;

    writeln!(out)?;
    writeln!(out, "[dry-run] task: {}, model: {}", options.task, config.model)?;
    for source in &sources {
        let (request, stats) = prompt::build_request(source, options, config);
        let prompt_chars: usize = request.messages.iter().map(|m| m.content.chars().count()).sum();
        let note = if stats.truncated {
            format!(" (truncated from {})", stats.original_chars)
        } else {
            String::new()
        };
        writeln!(
            out,
            "  {}: {} source chars{}, {} prompt chars",
            source.filename, stats.input_chars, note, prompt_chars
        )?;
    }
    Ok(())
}

async fn generate(
    patterns: &[String],
    config: Config,
    options: GenerationOptions,
    format: OutputFormat,
    output_dir: &Path,
    save_json: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};

    let backend: Arc<dyn LlmBackend> = Arc::new(OpenAiBackend::from_config(&config)?);
    let scratch = tempfile::tempdir()?;
    let mut err = std::io::stderr();

    let (sources, extract_failures) = collect_sources(
        patterns,
        scratch.path(),
        config.max_archive_bytes(),
        color,
        &mut err,
    )
    .await?;
    if sources.is_empty() {
        anyhow::bail!("No documents could be read");
    }
    std::fs::create_dir_all(output_dir)?;

    let bar = ProgressBar::new(sources.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:30.green/dim}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_message(config.model.clone());

    let progress: Arc<dyn Fn(ProgressEvent) + Send + Sync> = {
        let bar = bar.clone();
        Arc::new(move |event: ProgressEvent| {
            if matches!(
                event,
                ProgressEvent::Generated { .. } | ProgressEvent::Failed { .. }
            ) {
                bar.inc(1);
            }
            bar.suspend(|| {
                let _ = output::print_progress(&mut std::io::stderr(), &event, color);
            });
        })
    };

    let jobs: Vec<GenerationJob> = sources
        .into_iter()
        .map(|source| GenerationJob {
            source,
            options: options.clone(),
        })
        .collect();
    let names: Vec<String> = jobs.iter().map(|j| j.source.filename.clone()).collect();

    let cancel = cancel_on_ctrl_c();
    let results = generate_batch(
        jobs,
        Arc::new(config),
        backend,
        progress,
        cancel.clone(),
    )
    .await;
    bar.finish_and_clear();

    let (succeeded, write_failures) =
        write_results(&names, results, format, output_dir, save_json, color, &mut err)?;
    let failed = extract_failures + write_failures;

    output::print_summary(&mut err, succeeded, failed, color)?;
    if cancel.is_cancelled() {
        anyhow::bail!("Cancelled");
    }
    if succeeded == 0 {
        anyhow::bail!("No documents were generated");
    }
    Ok(())
}

/// Write each generated document in order. A render or write failure is
/// reported and counted; the remaining documents are still written.
/// Returns (succeeded, failed).
fn write_results(
    names: &[String],
    results: Vec<JobResult>,
    format: OutputFormat,
    output_dir: &Path,
    save_json: bool,
    color: ColorMode,
    out: &mut dyn Write,
) -> anyhow::Result<(usize, usize)> {
    let mut taken = HashSet::new();
    let mut succeeded = 0;
    let mut failed = 0;
    for (name, result) in names.iter().zip(results) {
        // Generation failures were already reported through the progress callback.
        let Ok(outcome) = result else {
            failed += 1;
            continue;
        };
        let path = inputs::unique_output_path(
            output_dir,
            &docscribe_render::output_filename(name, format),
            &mut taken,
        );
        match write_outcome(&outcome, &path, format, save_json) {
            Ok(()) => {
                output::print_written(out, &outcome, &path, color)?;
                succeeded += 1;
            }
            Err(e) => {
                tracing::warn!(
                    file = %name,
                    path = %path.display(),
                    error = %e,
                    "could not write output"
                );
                output::print_progress(
                    out,
                    &ProgressEvent::Failed {
                        filename: name.clone(),
                        message: format!("could not write {}: {}", path.display(), e),
                    },
                    color,
                )?;
                failed += 1;
            }
        }
    }
    Ok((succeeded, failed))
}

fn write_outcome(
    outcome: &GenerationOutcome,
    path: &Path,
    format: OutputFormat,
    save_json: bool,
) -> anyhow::Result<()> {
    let bytes = docscribe_render::render(&outcome.document, format)?;
    std::fs::write(path, bytes)?;
    if save_json {
        let json_path = path.with_extension("json");
        std::fs::write(&json_path, serde_json::to_vec_pretty(&outcome.document)?)?;
    }
    Ok(())
}

async fn extract(input: PathBuf, output: Option<PathBuf>) -> anyhow::Result<()> {
    let doc = InputDoc {
        filename: input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| input.display().to_string()),
        path: input,
    };
    let text = extract_one(&doc).await?;
    let color = ColorMode(output.is_some());

    match output {
        Some(path) => {
            std::fs::write(&path, &text.text)?;
            output::print_extraction_summary(&mut std::io::stderr(), &text, color)?;
            eprintln!("Wrote {}", path.display());
        }
        None => {
            let mut out = std::io::stdout();
            writeln!(out, "{}", text.text)?;
        }
    }
    Ok(())
}

fn render(json: &Path, format: OutputFormat, output: Option<PathBuf>) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(json)?;
    let mut doc: GeneratedDocument = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("{} is not a document JSON: {}", json.display(), e))?;
    doc.normalize();
    let source_name = json.display().to_string();
    doc.ensure_title(&source_name);

    let bytes = docscribe_render::render(&doc, format)?;
    let path = output.unwrap_or_else(|| json.with_extension(format.extension()));
    std::fs::write(&path, bytes)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn config_show(color: ColorMode) -> anyhow::Result<()> {
    let config = resolve_config(Overrides::none());
    let mut sources = Vec::new();
    if let Some(path) = config_file::config_path() {
        sources.push((path.display().to_string(), path.exists()));
    }
    let cwd = PathBuf::from(".docscribe.toml");
    sources.push((cwd.display().to_string(), cwd.exists()));

    output::print_config(&mut std::io::stdout(), &config, &sources, color)?;
    Ok(())
}

fn config_init(force: bool) -> anyhow::Result<()> {
    let path = config_file::config_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        );
    }
    let path = config_file::save_config(&config_file::starter()).map_err(anyhow::Error::msg)?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docscribe_core::{CoreError, ParseMode, Section};

    fn outcome(filename: &str, title: &str) -> GenerationOutcome {
        GenerationOutcome {
            filename: filename.into(),
            document: GeneratedDocument {
                title: title.into(),
                summary: None,
                sections: vec![Section {
                    heading: "Body".into(),
                    paragraphs: vec!["Text.".into()],
                    bullets: vec![],
                }],
            },
            parse_mode: ParseMode::Json,
            truncated: false,
            input_chars: 5,
            usage: None,
            elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn write_failure_does_not_stop_later_results() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where a.md should go makes that one write fail.
        std::fs::create_dir(dir.path().join("a.md")).unwrap();

        let names = vec!["a.pdf".to_string(), "b.pdf".into(), "c.pdf".into()];
        let results = vec![
            Ok(outcome("a.pdf", "A")),
            Err(CoreError::Cancelled),
            Ok(outcome("c.pdf", "C")),
        ];
        let mut out = Vec::new();
        let (succeeded, failed) = write_results(
            &names,
            results,
            OutputFormat::Markdown,
            dir.path(),
            true,
            ColorMode(false),
            &mut out,
        )
        .unwrap();

        assert_eq!((succeeded, failed), (1, 2));
        let c = std::fs::read_to_string(dir.path().join("c.md")).unwrap();
        assert!(c.starts_with("# C"));
        assert!(dir.path().join("c.json").exists());

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("a.pdf -> FAILED could not write"));
        assert!(printed.contains("Wrote"));
    }

    #[test]
    fn flags_override_env_and_env_overrides_file() {
        let file = config_file::ConfigFile {
            llm: Some(config_file::LlmConfig {
                model: Some("file-model".into()),
                api_base: Some("http://file.example/v1".into()),
                ..Default::default()
            }),
            limits: Some(config_file::LimitsConfig {
                max_input_chars: Some(1000),
                ..Default::default()
            }),
            ..Default::default()
        };
        let env = |key: &str| match key {
            "DOCSCRIBE_MODEL" => Some("env-model".to_string()),
            "MAX_INPUT_CHARS" => Some("2000".to_string()),
            _ => None,
        };

        let config = merge_config(&file, env, Overrides::none());
        assert_eq!(config.model, "env-model");
        assert_eq!(config.max_input_chars, 2000);
        assert_eq!(config.api_base, "http://file.example/v1");

        let config = merge_config(
            &file,
            env,
            Overrides {
                model: Some("flag-model".into()),
                api_key: Some("  ".into()),
                workers: Some(0),
                ..Overrides::none()
            },
        );
        assert_eq!(config.model, "flag-model");
        assert_eq!(config.max_input_chars, 2000);
        assert_eq!(config.api_key, None);
        assert_eq!(config.num_workers, 1);
    }
}
