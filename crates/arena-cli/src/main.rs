use anyhow::{Context, Result};
use arena_core::{migrate_stored, ArenaConfig, ArenaError, JsonFilePersister, ProgressionStore};
use arena_scoring::{score, TextProfile};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::io::Read;
use std::path::{Path, PathBuf};

fn cli() -> Command {
    Command::new("arena")
        .version(arena_core::VERSION)
        .about("Prompt Arena operator tool")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("score")
                .about("Score text from a file or stdin")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("File to score (defaults to stdin)"),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("stats")
                .about("Show experience, level and achievements")
                .arg(state_arg())
                .arg(config_arg())
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("library")
                .about("List saved experiments")
                .arg(state_arg())
                .arg(config_arg())
                .arg(
                    Arg::new("search")
                        .long("search")
                        .help("Case-insensitive filter on name or prompt"),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("migrate")
                .about("Rewrite retired model ids in saved experiments")
                .arg(state_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("config-check")
                .about("Load and validate a configuration file")
                .arg(config_arg().required(true)),
        )
}

fn state_arg() -> Arg {
    Arg::new("state")
        .long("state")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .help("Path to the progression state document")
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(clap::value_parser!(PathBuf))
        .help("Arena configuration (TOML)")
}

fn json_flag() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("score", args)) => cmd_score(args),
        Some(("stats", args)) => cmd_stats(args),
        Some(("library", args)) => cmd_library(args),
        Some(("migrate", args)) => cmd_migrate(args),
        Some(("config-check", args)) => cmd_config_check(args),
        _ => Ok(()),
    }
}

fn load_config(args: &ArgMatches) -> Result<ArenaConfig, ArenaError> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => Ok(ArenaConfig::load(path)?),
        None => Ok(ArenaConfig::default()),
    }
}

fn state_path(args: &ArgMatches) -> Result<&Path> {
    args.get_one::<PathBuf>("state")
        .map(PathBuf::as_path)
        .context("--state is required")
}

fn open_store(args: &ArgMatches) -> Result<ProgressionStore> {
    let config = load_config(args).context("loading config")?;
    let persister = JsonFilePersister::new(state_path(args)?);
    tracing::debug!(path = %persister.path().display(), "Opening state");
    Ok(ProgressionStore::open(
        &persister,
        &config.achievements,
        &config.migrations,
    ))
}

fn cmd_score(args: &ArgMatches) -> Result<()> {
    let text = match args.get_one::<PathBuf>("file") {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading stdin")?;
            buf
        }
    };

    let metrics = score(&text);
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    let profile = TextProfile::new(&text);
    println!("Overall:     {:.2}", metrics.overall);
    println!("Readability: {:.2}", metrics.readability);
    println!("Coherence:   {:.2}", metrics.coherence);
    println!("Vocabulary:  {:.2}", metrics.vocabulary);
    println!(
        "({} sentences, {} words, {} syllables)",
        profile.sentences().len(),
        profile.words().len(),
        profile.syllables()
    );
    Ok(())
}

fn cmd_stats(args: &ArgMatches) -> Result<()> {
    let state = open_store(args)?.snapshot();

    if args.get_flag("json") {
        let report = serde_json::json!({
            "xp": state.xp,
            "level": state.level,
            "experiment_count": state.experiment_count,
            "saved_experiments": state.saved_experiments.len(),
            "achievements": state.achievements.values().collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Level {} ({} XP)", state.level, state.xp);
    println!("Experiments run: {}", state.experiment_count);
    println!("Saved experiments: {}", state.saved_experiments.len());
    println!();
    println!("Achievements:");
    for a in state.achievements.values() {
        let mark = if a.unlocked { "x" } else { " " };
        println!(
            "  [{mark}] {:<18} {:>6}/{:<6} {:>4.0}%  {}",
            a.id,
            a.progress,
            a.target,
            a.completion() * 100.0,
            a.description
        );
    }
    Ok(())
}

fn cmd_library(args: &ArgMatches) -> Result<()> {
    let store = open_store(args)?;
    let query = args.get_one::<String>("search").map_or("", String::as_str);
    let entries = store.search_saved(query);

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No saved experiments");
        return Ok(());
    }
    for e in &entries {
        let summary = e.results.summary();
        println!(
            "{}  {}  {:<24} {} models, {} tokens, ${:.4}",
            e.id,
            e.created_at.format("%Y-%m-%d %H:%M"),
            e.name,
            e.results.len(),
            summary.total_tokens,
            summary.total_cost
        );
    }
    Ok(())
}

fn cmd_migrate(args: &ArgMatches) -> Result<()> {
    let config = load_config(args).context("loading config")?;
    let path = state_path(args)?;
    let persister = JsonFilePersister::new(path);

    let report = migrate_stored(&persister, &config.achievements, &config.migrations)
        .with_context(|| format!("migrating state {}", path.display()))?;
    match report {
        Some(report) => println!(
            "Renamed {} result keys across {} saved experiments",
            report.keys_renamed, report.experiments_touched
        ),
        None => println!("No state at {}", path.display()),
    }
    Ok(())
}

fn cmd_config_check(args: &ArgMatches) -> Result<()> {
    let config = load_config(args).context("loading config")?;
    println!("Configuration OK");
    println!("  models: {}", config.models.len());
    for m in &config.models {
        println!("    {:<20} ${}/1k tokens", m.id.as_str(), m.price_per_1k_tokens);
    }
    println!("  request timeout: {}s", config.request_timeout_secs);
    println!("  migrations: {}", config.migrations.len());
    println!("  achievements: {}", config.achievements.len());
    Ok(())
}
