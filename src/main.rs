use anyhow::Result;
use clap::{Arg, ArgAction, Command};

use edgewatch::commands;

fn build_cli() -> Command {
    Command::new("edgewatch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Edge monitoring agent with local analytics, graded alerts and rollback-safe self-update")
        .disable_version_flag(true)
        .arg(
            Arg::new("version")
                .short('v')
                .short_alias('V')
                .long("version")
                .help("Print version information")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to the agent configuration file")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Default log level (RUST_LOG overrides it)")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .global(true),
        )
        .subcommand(Command::new("run").about("Run the agent until Ctrl+C"))
        .subcommand(Command::new("status").about("Show persisted update state, health and recent alerts"))
        .subcommand(
            Command::new("check-update")
                .about("Run a single update cycle now, including the post-update health check"),
        )
        .subcommand(
            Command::new("config")
                .about("Inspect or create the configuration file")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(Command::new("show").about("Print the effective configuration"))
                .subcommand(
                    Command::new("init")
                        .about("Write a default configuration file")
                        .arg(
                            Arg::new("force")
                                .long("force")
                                .help("Overwrite an existing file")
                                .action(ArgAction::SetTrue),
                        ),
                ),
        )
        .subcommand(Command::new("version").about("Shows version information"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .help("Shell to generate completions for (bash, zsh, fish, powershell, elvish)")
                        .required(true)
                        .index(1),
                ),
        )
}

fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .and_then(|l| l.parse().ok())
        .unwrap_or(log::LevelFilter::Info);
    edgewatch::init_logging_with(level);

    if matches.get_flag("version") {
        return commands::version();
    }

    match matches.subcommand() {
        Some(("run", _)) => commands::run::execute(&matches)?,
        Some(("status", _)) => commands::status::execute(&matches)?,
        Some(("check-update", _)) => commands::update::execute(&matches)?,
        Some(("config", sub_matches)) => commands::config::handle_config(&matches, sub_matches)?,
        Some(("version", _)) => commands::version()?,
        Some(("completions", sub_matches)) => {
            commands::completions::execute(sub_matches, &mut build_cli())?
        }
        _ => {
            println!("Welcome to edgewatch!");
            println!("Use 'edgewatch --help' for more information.");
        }
    }

    Ok(())
}
