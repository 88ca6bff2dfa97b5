//! WeChat Writer - command-line assistant for WeChat Official Account articles
//!
//! Every command prints a single JSON envelope on stdout. Logs go to stderr
//! and a daily log file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod account;
mod config;
mod converter;
mod draft;
mod error;
mod humanizer;
mod image;
mod wechat;
mod writer;

use crate::config::Config;
use crate::converter::{ConvertRequest, ConvertStep};
use crate::draft::DraftService;
use crate::error::{success_envelope, AppError};
use crate::humanizer::{FocusPattern, HumanizeRequest, HumanizeStep, Intensity};
use crate::image::processor::ImageProcessor;
use crate::image::{build_client, ImageProvider};
use crate::writer::{InputType, StyleManager, WriteAiRequest, WriteRequest};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "wechat_writer", author, version, about, long_about = None)]
struct Cli {
    /// Enable debug level logging
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// Config file (otherwise the standard locations are searched)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload, download or generate images as WeChat material
    #[command(subcommand)]
    Image(ImageCommand),
    /// Create drafts
    #[command(subcommand)]
    Draft(DraftCommand),
    /// Remove AI writing traces from a text
    Humanize(HumanizeArgs),
    /// Convert Markdown to WeChat HTML, optionally uploading images and creating a draft
    Convert(ConvertArgs),
    /// Prepare a writing request in a writer's style
    Write(WriteArgs),
    /// Inspect configured accounts
    #[command(subcommand)]
    Accounts(AccountsCommand),
    /// Show, validate or create the config file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ImageCommand {
    /// Upload a local image
    Upload {
        path: PathBuf,
        #[arg(long)]
        account: Option<String>,
    },
    /// Download an image and upload it
    Download {
        url: String,
        #[arg(long)]
        account: Option<String>,
    },
    /// Generate an image with the configured provider and upload it
    Generate {
        prompt: String,
        /// e.g. 1024x1024
        #[arg(long)]
        size: Option<String>,
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum DraftCommand {
    /// Create a draft from a `{"articles": [...]}` JSON file
    Create {
        file: PathBuf,
        #[arg(long)]
        account: Option<String>,
    },
    /// Create a one-article draft from an HTML file and a cover image
    Test {
        html: PathBuf,
        cover: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Args, Debug)]
struct HumanizeArgs {
    /// Text file to process
    file: PathBuf,
    /// gentle | medium | aggressive
    #[arg(long, default_value = "medium")]
    intensity: String,
    #[arg(long, default_value_t = false)]
    show_changes: bool,
    /// content, language, style, filler, collaboration
    #[arg(long, value_delimiter = ',')]
    focus: Vec<String>,
    /// Writing style to preserve
    #[arg(long)]
    style: Option<String>,
    /// e.g. ai-generated, human-written
    #[arg(long)]
    source_hint: Option<String>,
    /// Write the humanized text to this file
    #[arg(long)]
    output: Option<PathBuf>,
    /// File holding the model's reply to a previous humanize request
    #[arg(long)]
    ai_response: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Markdown file
    markdown: PathBuf,
    #[arg(long, default_value = converter::DEFAULT_THEME)]
    theme: String,
    /// Formatting instructions used instead of the built-in ones
    #[arg(long)]
    custom_prompt: Option<String>,
    /// File holding the model's HTML for a previous conversion request
    #[arg(long)]
    ai_html: Option<PathBuf>,
    /// Write the HTML (or the prompt, without --ai-html) to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Upload images and replace their placeholders
    #[arg(long, default_value_t = false)]
    upload: bool,
    /// Upload images, then create a draft (needs --cover)
    #[arg(long, default_value_t = false)]
    draft: bool,
    #[arg(long)]
    cover: Option<PathBuf>,
    /// Write a `{"articles": [...]}` draft file
    #[arg(long)]
    save_draft: Option<PathBuf>,
    /// Overrides the title taken from the Markdown
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    account: Option<String>,
}

#[derive(Args, Debug)]
struct WriteArgs {
    /// Input file; stdin is read when omitted
    file: Option<PathBuf>,
    #[arg(long, default_value = writer::DEFAULT_STYLE)]
    style: String,
    /// idea | fragment | outline | title
    #[arg(long)]
    input_type: Option<String>,
    /// essay | commentary | story | tutorial | review | suibi
    #[arg(long, default_value = "essay")]
    article_type: String,
    /// short | medium | long
    #[arg(long, default_value = "medium")]
    length: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// List available styles
    #[arg(long, default_value_t = false)]
    list: bool,
    /// Restyle the input instead of writing from it
    #[arg(long, default_value_t = false)]
    refine: bool,
    /// Reader feedback for --refine
    #[arg(long)]
    feedback: Option<String>,
    /// Attach a humanize pass to the request
    #[arg(long, default_value_t = false)]
    humanize: bool,
    #[arg(long, default_value = "medium")]
    humanize_intensity: String,
    /// Style directory (otherwise ./writers and the home locations)
    #[arg(long)]
    styles_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum AccountsCommand {
    /// List accounts
    List,
    /// Show which account would be used
    Select {
        /// Free text matched against account keywords
        #[arg(long)]
        context: Option<String>,
        /// Account id or name
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration
    Show {
        #[arg(long, default_value_t = false)]
        show_secret: bool,
    },
    /// Load and validate the configuration
    Validate,
    /// Write a template config file
    Init { path: Option<PathBuf> },
}

fn init_logging(debug: bool) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    // Determine log level based on --debug flag
    let log_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_dir = std::env::var_os("WRITER_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("wechat-writer").join("logs"));
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "writer.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        // stdout carries the JSON result
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .try_init()
        .context("initialize logging")?;

    tracing::debug!("Log level: {}", log_level);
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let guard = init_logging(cli.debug)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, canceling");
            ctrl_c.cancel();
        }
    });

    let outcome = run(cli, &cancel).await;
    cancel.cancel();

    match outcome {
        Ok(data) => {
            print_json(&success_envelope(data));
            Ok(())
        }
        Err(e) => {
            tracing::error!("{}", e);
            print_json(&e.envelope());
            drop(guard);
            std::process::exit(1);
        }
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!("{}", value),
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<Value, AppError> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Image(cmd) => run_image(cmd, config_path, cancel).await,
        Command::Draft(cmd) => run_draft(cmd, config_path).await,
        Command::Humanize(args) => run_humanize(args).await,
        Command::Convert(args) => run_convert(args, config_path, cancel).await,
        Command::Write(args) => run_write(args).await,
        Command::Accounts(cmd) => run_accounts(cmd, config_path),
        Command::Config(cmd) => run_config(cmd, config_path),
    }
}

async fn run_image(
    cmd: ImageCommand,
    config_path: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<Value, AppError> {
    let mut cfg = Config::load(config_path)?;
    let registry = cfg.account_registry();

    match cmd {
        ImageCommand::Upload { path, account } => {
            let account = registry.select(None, account.as_deref())?;
            let result = ImageProcessor::new(&cfg, account)?
                .upload_local(&path)
                .await?;
            Ok(serde_json::to_value(result)?)
        }
        ImageCommand::Download { url, account } => {
            let account = registry.select(None, account.as_deref())?;
            let result = ImageProcessor::new(&cfg, account)?
                .download_and_upload(&url)
                .await?;
            Ok(serde_json::to_value(result)?)
        }
        ImageCommand::Generate {
            prompt,
            size,
            account,
        } => {
            if let Some(size) = size.filter(|s| !s.is_empty()) {
                cfg.image_size = size;
            }
            let account = registry.select(Some(&prompt), account.as_deref())?;
            let provider = ImageProvider::from_config(&cfg)?;
            let result = ImageProcessor::new(&cfg, account)?
                .generate_and_upload(&provider, &prompt, cancel)
                .await?;
            Ok(serde_json::to_value(result)?)
        }
    }
}

async fn run_draft(cmd: DraftCommand, config_path: Option<&Path>) -> Result<Value, AppError> {
    let cfg = Config::load(config_path)?;
    let http = build_client(Duration::from_secs(cfg.http_timeout))?;
    let service = DraftService::new(cfg.account_registry(), http);

    let result = match cmd {
        DraftCommand::Create { file, account } => {
            service.create_from_file(&file, account.as_deref()).await?
        }
        DraftCommand::Test {
            html,
            cover,
            title,
            account,
        } => {
            service
                .create_test_draft(&html, &cover, title.as_deref(), account.as_deref())
                .await?
        }
    };

    tracing::info!(
        "Draft created: {} (account {})",
        wechat::mask_media_id(&result.media_id),
        result.account_id
    );
    Ok(serde_json::to_value(result)?)
}

async fn run_humanize(args: HumanizeArgs) -> Result<Value, AppError> {
    let content = tokio::fs::read_to_string(&args.file).await.map_err(|e| {
        AppError::NotFound(format!("read {}: {}", args.file.display(), e))
    })?;

    let request = HumanizeRequest {
        content,
        intensity: Intensity::parse(&args.intensity),
        focus_on: FocusPattern::parse_list(&args.focus),
        preserve_style: args.style.is_some(),
        original_style: args.style,
        show_changes: args.show_changes,
        include_score: true,
        source_hint: args.source_hint,
    };

    let reply = match &args.ai_response {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };

    if request.content.trim().is_empty() {
        return Err(AppError::BadRequest("输入内容为空".to_string()));
    }

    match humanizer::humanize(&request, reply.as_deref()) {
        HumanizeStep::NeedsExternalGeneration(ai) => {
            tracing::info!(
                "Humanize request prepared ({} intensity, {} chars)",
                ai.intensity.as_str(),
                ai.content.chars().count()
            );
            let mut out = json!({
                "action": "humanize_request",
                "request": ai,
            });
            if let Some(output) = &args.output {
                tokio::fs::write(output, &ai.prompt).await?;
                tracing::info!("Humanize prompt written to {}", output.display());
                out["output_file"] = json!(output.display().to_string());
            }
            Ok(out)
        }
        HumanizeStep::Ready(result) => {
            let mut out = result.to_output();
            if !result.success {
                tracing::warn!(
                    "Humanize reply not usable: {}",
                    result.error.as_deref().unwrap_or_default()
                );
                return Ok(out);
            }
            if let Some(output) = &args.output {
                tokio::fs::write(output, &result.content).await?;
                tracing::info!("Humanized text written to {}", output.display());
                out["output_file"] = json!(output.display().to_string());
            }
            tracing::info!(
                "Humanized: {} change(s), score {}",
                result.change_count(),
                humanizer::rating_of(result.score.as_ref())
            );
            Ok(out)
        }
    }
}

async fn run_convert(
    args: ConvertArgs,
    config_path: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<Value, AppError> {
    let markdown = tokio::fs::read_to_string(&args.markdown).await.map_err(|e| {
        AppError::NotFound(format!("read {}: {}", args.markdown.display(), e))
    })?;

    let request = ConvertRequest {
        markdown,
        theme: args.theme.clone(),
        custom_prompt: args.custom_prompt.clone(),
    };
    let ai_html = match &args.ai_html {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };

    let mut article = match converter::convert(&request, ai_html.as_deref())? {
        ConvertStep::NeedsExternalGeneration(ai) => {
            let mut out = json!({
                "mode": "ai",
                "action": "ai_request",
                "markdown_file": args.markdown.display().to_string(),
                "theme": ai.theme,
                "prompt": ai.prompt,
                "images": ai.images,
            });
            if let Some(output) = &args.output {
                tokio::fs::write(output, &ai.prompt).await?;
                tracing::info!("Conversion prompt written to {}", output.display());
                out["output_file"] = json!(output.display().to_string());
            }
            return Ok(out);
        }
        ConvertStep::Ready(article) => article,
    };
    if let Some(title) = args.title.as_deref().filter(|t| !t.is_empty()) {
        article.title = title.to_string();
    }

    let mut out = json!({});

    if args.upload || args.draft {
        let cfg = Config::load(config_path)?;
        let registry = cfg.account_registry();
        let account = registry.select(Some(&article.title), args.account.as_deref())?;
        let processor = ImageProcessor::new(&cfg, account)?;

        let needs_provider = article
            .images
            .iter()
            .any(|i| i.kind == converter::ImageKind::Ai);
        let provider = if needs_provider {
            ImageProvider::from_config(&cfg)
                .map_err(|e| tracing::warn!("Image provider unavailable: {}", e))
                .ok()
        } else {
            None
        };

        let base_dir = args
            .markdown
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let uploaded =
            converter::upload_images(&mut article, &processor, provider.as_ref(), &base_dir, cancel)
                .await;
        tracing::info!("{}/{} image(s) uploaded", uploaded, article.images.len());
        out["uploaded_images"] = json!(uploaded);

        if args.draft {
            let cover = args.cover.as_deref().ok_or_else(|| {
                AppError::BadRequest("--draft requires a cover image (--cover)".to_string())
            })?;
            let http = build_client(Duration::from_secs(cfg.http_timeout))?;
            let result = DraftService::new(registry.clone(), http)
                .create_with_cover(
                    article.html.clone(),
                    cover,
                    Some(&article.title),
                    Some(&account.id),
                )
                .await?;
            tracing::info!(
                "Draft created: {} (account {})",
                wechat::mask_media_id(&result.media_id),
                result.account_id
            );
            out["draft"] = serde_json::to_value(result)?;
        }
    }

    if let Some(path) = &args.save_draft {
        let draft = json!({
            "articles": [{ "title": article.title, "content": article.html }],
        });
        tokio::fs::write(path, serde_json::to_string_pretty(&draft)?).await?;
        tracing::info!("Draft JSON written to {}", path.display());
        out["draft_file"] = json!(path.display().to_string());
    }

    match &args.output {
        Some(output) => {
            tokio::fs::write(output, &article.html).await?;
            tracing::info!("HTML written to {}", output.display());
            out["output_file"] = json!(output.display().to_string());
        }
        None => out["html"] = json!(article.html),
    }

    out["title"] = json!(article.title);
    out["theme"] = json!(article.theme);
    out["images"] = serde_json::to_value(&article.images)?;
    Ok(out)
}

fn read_stdin() -> Result<Option<String>, AppError> {
    use std::io::{IsTerminal, Read};

    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut input = String::new();
    stdin.read_to_string(&mut input)?;
    Ok(Some(input))
}

async fn run_write(args: WriteArgs) -> Result<Value, AppError> {
    let styles = StyleManager::load(args.styles_dir.as_deref());

    if args.list {
        let list = styles.list();
        return Ok(json!({
            "count": list.len(),
            "styles": list,
            "dir": styles.dir().map(|d| d.display().to_string()),
        }));
    }

    let style = styles.get(&args.style)?;

    let (input, from_file) = match &args.file {
        Some(path) => (
            tokio::fs::read_to_string(path).await.map_err(|e| {
                AppError::NotFound(format!("read {}: {}", path.display(), e))
            })?,
            true,
        ),
        None => (read_stdin()?.unwrap_or_default(), false),
    };

    let humanize = args
        .humanize
        .then(|| Intensity::parse(&args.humanize_intensity));

    let ai = if args.refine {
        let prompt = writer::build_refine_prompt(style, &input, args.feedback.as_deref())?;
        WriteAiRequest {
            style: style.name.clone(),
            english_name: style.english_name.clone(),
            prompt,
            humanizer: humanize.map(|i| writer::humanizer_follow_up(style, i)),
        }
    } else {
        let input_type = match args.input_type.as_deref() {
            Some(t) => t.parse::<InputType>()?,
            None if from_file => InputType::Fragment,
            None => InputType::default(),
        };
        let request = WriteRequest {
            input,
            input_type,
            article_type: args.article_type.parse()?,
            length: args.length.parse()?,
            title: args.title.clone(),
        };
        writer::prepare(style, &request, humanize)?
    };

    let action = if args.refine {
        "ai_refine_request"
    } else {
        "ai_write_request"
    };
    let mut out = json!({
        "mode": "ai",
        "action": action,
    });
    if let (Value::Object(map), Value::Object(fields)) = (&mut out, serde_json::to_value(&ai)?) {
        map.extend(fields);
    }

    if let Some(output) = &args.output {
        tokio::fs::write(output, serde_json::to_string_pretty(&out)?).await?;
        tracing::info!("Writing request written to {}", output.display());
        out["output_file"] = json!(output.display().to_string());
    }

    Ok(out)
}

fn run_accounts(cmd: AccountsCommand, config_path: Option<&Path>) -> Result<Value, AppError> {
    let cfg = Config::load(config_path)?;
    let registry = cfg.account_registry();

    match cmd {
        AccountsCommand::List => {
            if registry.is_empty() {
                tracing::warn!("No WeChat accounts configured");
            }
            let accounts: Vec<Value> = registry
                .accounts()
                .iter()
                .map(|acc| config::account_json(acc, true))
                .collect();
            Ok(json!({
                "accounts": accounts,
                "count": accounts.len(),
                "default": registry.default_account().map(|a| a.id.clone()),
            }))
        }
        AccountsCommand::Select { context, account } => {
            let selected = registry.select(context.as_deref(), account.as_deref())?;
            Ok(json!({ "account": config::account_json(selected, true) }))
        }
    }
}

fn run_config(cmd: ConfigCommand, config_path: Option<&Path>) -> Result<Value, AppError> {
    match cmd {
        ConfigCommand::Show { show_secret } => {
            let cfg = Config::load(config_path)?;
            Ok(cfg.to_json(!show_secret))
        }
        ConfigCommand::Validate => {
            let cfg = Config::load(config_path)?;
            Ok(json!({
                "valid": true,
                "config_file": cfg.config_file.as_ref().map(|p| p.display().to_string()),
                "accounts": cfg.wechat_accounts.len(),
            }))
        }
        ConfigCommand::Init { path } => {
            let path = path.unwrap_or_else(config::default_config_path);
            config::write_template(&path)?;
            tracing::info!("Config template written to {}", path.display());
            Ok(json!({ "path": path.display().to_string() }))
        }
    }
}
