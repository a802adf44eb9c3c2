//! Operator CLI for the localization pipeline.
//!
//! Usage:
//!   auto-localize add-language <code> <name>
//!   auto-localize translate-all <target> [--source <code>]
//!   auto-localize progress <code>
//!   auto-localize list-languages
//!   auto-localize remove-language <code>
//!   auto-localize stats
//!   auto-localize health
//!   auto-localize check-key
//!
//! Environment: GEMINI_API_KEY, LOCALES_DIR, SOURCE_LANGUAGE and friends
//! (see `config.rs`). A `.env` file is loaded when present.

use anyhow::{bail, Context, Result};
use auto_localize::config::Config;
use auto_localize::operator::{render_progress_bar, Operator};
use auto_localize::pipeline::Pipeline;
use std::time::Duration;
use tracing::info;

const PROGRESS_BAR_WIDTH: usize = 30;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn print_usage() {
    println!(
        r#"auto-localize - AI-backed translation file management

USAGE:
    auto-localize <command> [args]

COMMANDS:
    add-language <code> <name>          Copy the source language and translate it
    translate-all <target> [--source c] Translate missing keys into <target>
    progress <code>                     Show translation progress of a language
    list-languages                      List registered languages
    remove-language <code>              Delete a language
    stats                               Cache, queue and API counters
    health                              System health report
    check-key                           Validate the Gemini API key
    help                                Show this message"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored when absent)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("auto_localize=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }
    let command = args[1].as_str();
    if matches!(command, "help" | "--help" | "-h") {
        print_usage();
        return Ok(());
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    let pipeline = Pipeline::build(&config).context("Failed to build translation pipeline")?;
    pipeline
        .start()
        .await
        .context("Failed to initialize translation manager")?;
    let operator = pipeline.operator();

    let result = match command {
        "add-language" => {
            let (code, name) = two_args(&args, "add-language <code> <name>")?;
            add_language(&operator, code, name).await
        }
        "translate-all" => translate_all(&operator, &args).await,
        "progress" => {
            let code = one_arg(&args, "progress <code>")?;
            show_progress(&operator, code).await
        }
        "list-languages" => {
            list_languages(&operator);
            Ok(())
        }
        "remove-language" => {
            let code = one_arg(&args, "remove-language <code>")?;
            operator
                .remove_language(code)
                .await
                .with_context(|| format!("Failed to remove {}", code))?;
            println!("Removed {}", code);
            Ok(())
        }
        "stats" => {
            println!("{}", serde_json::to_string_pretty(&operator.stats())?);
            Ok(())
        }
        "health" => show_health(&operator).await,
        "check-key" => check_key(&operator).await,
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            std::process::exit(1);
        }
    };

    pipeline.shutdown(SHUTDOWN_TIMEOUT).await;
    result
}

fn one_arg<'a>(args: &'a [String], usage: &str) -> Result<&'a str> {
    match args.get(2) {
        Some(value) => Ok(value.as_str()),
        None => bail!("Usage: auto-localize {}", usage),
    }
}

fn two_args<'a>(args: &'a [String], usage: &str) -> Result<(&'a str, &'a str)> {
    match (args.get(2), args.get(3)) {
        (Some(a), Some(b)) => Ok((a.as_str(), b.as_str())),
        _ => bail!("Usage: auto-localize {}", usage),
    }
}

async fn add_language(operator: &Operator, code: &str, name: &str) -> Result<()> {
    let suggestion = operator.validate_and_suggest(code, name);
    if !suggestion.is_valid {
        for error in &suggestion.errors {
            eprintln!("  - {}", error);
        }
        if let Some(known) = &suggestion.suggested_name {
            eprintln!("Known name for {}: {}", code, known);
        }
        if !suggestion.similar_codes.is_empty() {
            eprintln!("Similar codes: {}", suggestion.similar_codes.join(", "));
        }
        bail!("Cannot add language {}", code);
    }

    info!("Adding {} ({})", code, name);
    let queued = operator
        .add_language(code, name)
        .await
        .with_context(|| format!("Failed to add language {}", code))?;
    println!("Added {} ({}), {} keys translated", code, name, queued);
    show_progress(operator, code).await
}

async fn translate_all(operator: &Operator, args: &[String]) -> Result<()> {
    let target = one_arg(args, "translate-all <target> [--source <code>]")?;
    let source = args
        .iter()
        .position(|a| a == "--source")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
        .unwrap_or_else(|| operator.manager().source_language().as_str());

    let mut job = operator
        .translate_all(source, target)
        .with_context(|| format!("Cannot translate {} -> {}", source, target))?;

    while let Some(update) = job.progress.recv().await {
        println!(
            "{} {}",
            render_progress_bar(update.progress, PROGRESS_BAR_WIDTH),
            update.key
        );
    }

    let total = job
        .handle
        .await
        .context("Translation task panicked")?
        .with_context(|| format!("Translation into {} failed", target))?;
    println!("Finished {} keys for {}", total, target);
    show_progress(operator, target).await
}

async fn show_progress(operator: &Operator, code: &str) -> Result<()> {
    let progress = operator
        .get_progress(code)
        .await
        .with_context(|| format!("Failed to read progress for {}", code))?;
    println!(
        "{:<6} {} {}/{} translated, {} pending",
        progress.language,
        render_progress_bar(progress.percentage, PROGRESS_BAR_WIDTH),
        progress.translated,
        progress.total,
        progress.pending
    );
    Ok(())
}

fn list_languages(operator: &Operator) {
    for language in operator.list_languages() {
        let marker = if language.is_source { " (source)" } else { "" };
        println!("{:<6} {}{}", language.code.as_str(), language.name, marker);
    }
}

async fn show_health(operator: &Operator) -> Result<()> {
    let health = operator.health().await;
    println!("Overall: {}", health.overall.as_str());
    for (name, service) in [
        ("ai", &health.services.ai),
        ("file system", &health.services.file_system),
        ("cache", &health.services.cache),
        ("network", &health.services.network),
    ] {
        println!(
            "  {:<12} {:<9} {}",
            name,
            service.status.as_str(),
            service.message.as_deref().unwrap_or("")
        );
    }
    for issue in &health.issues {
        println!("  ! {}: {} -> {}", issue.service, issue.message, issue.suggested_action);
    }
    Ok(())
}

async fn check_key(operator: &Operator) -> Result<()> {
    let validation = operator.check_key().await;
    println!("{}", validation.message);
    if let Some(action) = &validation.suggested_action {
        println!("{}", action);
    }
    if !validation.is_valid {
        bail!("API key check failed");
    }
    Ok(())
}
