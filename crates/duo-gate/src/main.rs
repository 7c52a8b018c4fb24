//! duo-gate - Local policy decisions for second-factor login
//!
//! "Ask for the second factor only when it matters."

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use duo_core::{net, DuoConfig, Identity, Logger, Paths};
use duo_gate::{
    evaluator::PolicyEvaluator,
    groups::{GroupDecision, GroupGate, GroupSource, SystemGroups},
    trust_cache::TrustCache,
};

/// duo-gate - Local policy decisions for second-factor login
#[derive(Parser)]
#[command(name = "duo-gate")]
#[command(version = "1.0.0")]
#[command(about = "Local policy decisions for second-factor login")]
#[command(long_about = "Local policy decisions for second-factor login.\n\n\
    Decides whether a user is subject to second-factor policy at all, and\n\
    whether a recent successful verification from the same origin lets the\n\
    remote challenge be skipped.")]
pub struct Cli {
    /// Configuration file (default: $DUO_CONFIG or /etc/duo/login_duo.conf)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log to stderr instead of syslog
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide what to do for a login attempt
    #[command(about = "Decide whether a login needs the second factor")]
    Check {
        /// User logging in (default: current user)
        #[arg(long, short = 'u')]
        user: Option<String>,

        /// Network origin of the login
        #[arg(long, short = 'o')]
        origin: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a successful remote verification
    #[command(about = "Create or refresh the trusted-origin marker")]
    Record {
        /// User that verified (default: current user)
        #[arg(long, short = 'u')]
        user: Option<String>,

        /// Network origin of the login
        #[arg(long, short = 'o')]
        origin: Option<String>,
    },

    /// Show group memberships and the gate decision
    #[command(about = "Show group memberships and whether policy applies")]
    Groups {
        /// User to inspect (default: current user)
        #[arg(long, short = 'u')]
        user: Option<String>,
    },

    /// Show the resolved configuration
    #[command(about = "Show the resolved configuration (secret key hidden)")]
    Config,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let logger = Logger::from_debug_flag(cli.debug);
    let config_path = Paths::new().config_file_or(cli.config);
    let config = DuoConfig::load(&config_path, &logger)?;

    match cli.command {
        Commands::Check { user, origin, json } => cmd_check(&config, &logger, user, origin, json),
        Commands::Record { user, origin } => cmd_record(&config, &logger, user, origin),
        Commands::Groups { user } => cmd_groups(&config, &logger, user),
        Commands::Config => cmd_config(&config),
    }
}

fn resolve_identity(user: Option<String>) -> Result<Identity> {
    match user {
        Some(name) => Identity::lookup(&name).with_context(|| format!("Unknown user {}", name)),
        None => Identity::current().context("Cannot determine current user"),
    }
}

fn cmd_check(
    config: &DuoConfig,
    logger: &Logger,
    user: Option<String>,
    origin: Option<String>,
    json_output: bool,
) -> Result<()> {
    let identity = resolve_identity(user)?;
    let origin = net::resolve_origin(origin.as_deref(), config);

    let evaluator = PolicyEvaluator::new(config, SystemGroups, logger);
    let decision = evaluator.evaluate(&identity, origin.as_deref());

    if json_output {
        println!("{}", serde_json::to_string_pretty(&decision)?);
    } else {
        println!(
            "{}: {} from {}",
            decision.action.as_str().to_uppercase(),
            decision.user,
            decision.origin
        );
        println!("  Details: {}", decision.details);
    }

    // Exit with appropriate code
    std::process::exit(decision.action.exit_code());
}

fn cmd_record(
    config: &DuoConfig,
    logger: &Logger,
    user: Option<String>,
    origin: Option<String>,
) -> Result<()> {
    let identity = resolve_identity(user)?;
    let origin = net::resolve_origin(origin.as_deref(), config);
    let cache = TrustCache::new(config, logger);

    if !cache.enabled() {
        println!("Trusted access is disabled (taexpire = 0); nothing recorded");
        return Ok(());
    }

    cache.record_success(&identity, origin.as_deref());
    println!(
        "Recorded trusted access: {}",
        cache.marker_path(&identity, origin.as_deref()).display()
    );
    Ok(())
}

fn cmd_groups(config: &DuoConfig, logger: &Logger, user: Option<String>) -> Result<()> {
    let identity = resolve_identity(user)?;

    println!("User: {} (gid {})", identity.name, identity.gid);
    match SystemGroups.resolve(&identity) {
        Ok(membership) => println!("Groups: {}", membership.names().join(" ")),
        Err(e) => println!("Groups: <unavailable: {}>", e),
    }

    if config.groups.is_empty() {
        println!("Configured patterns: <none, policy applies to everyone>");
    } else {
        println!("Configured patterns: {}", config.groups.join(" "));
    }

    let gate = GroupGate::new(&config.groups, SystemGroups, logger);
    let verdict = match gate.evaluate(&identity) {
        GroupDecision::Applies => "applies".to_string(),
        GroupDecision::DoesNotApply => "does not apply".to_string(),
        GroupDecision::EvaluationError(reason) => format!(
            "undetermined ({}); failmode {}",
            reason,
            config.fail_mode.as_str()
        ),
    };
    println!("Second-factor policy: {}", verdict);

    Ok(())
}

fn cmd_config(config: &DuoConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
