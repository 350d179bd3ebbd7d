//! Tests for command-line parsing

use clap::Parser;
use lightwire_cli::commands::config::ConfigCommands;
use lightwire_cli::commands::reputation::ReputationCommands;
use lightwire_cli::{Cli, Commands, LogFormat, OutputFormat};
use std::path::PathBuf;

#[test]
fn test_parse_config_check() {
    let cli = Cli::try_parse_from(["lightwire", "config", "check", "lightwire.toml"]).unwrap();
    match cli.command {
        Commands::Config(ConfigCommands::Check { ref path }) => {
            assert_eq!(*path, PathBuf::from("lightwire.toml"));
        }
        other => panic!("unexpected command: {other:?}"),
    }
    assert_eq!(cli.output, OutputFormat::Text);
    assert_eq!(cli.log_format, None);
    assert_eq!(cli.log_settings(), ("warn,lightwire=info".to_string(), LogFormat::Pretty));
}

#[test]
fn test_log_settings_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lightwire.toml");
    std::fs::write(&path, "[logging]\nlevel = \"debug\"\nformat = \"json\"\n").unwrap();
    let path_arg = path.to_str().unwrap();

    let cli = Cli::try_parse_from(["lightwire", "--config", path_arg, "version"]).unwrap();
    assert_eq!(cli.log_settings(), ("warn,lightwire=debug".to_string(), LogFormat::Json));

    let cli = Cli::try_parse_from(["lightwire", "--config", path_arg, "--log-format", "pretty", "-v", "version"])
        .unwrap();
    assert_eq!(cli.log_settings(), ("info,lightwire=debug".to_string(), LogFormat::Pretty));
}

#[test]
fn test_parse_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "lightwire",
        "reputation",
        "show",
        "rep.json",
        "--limit",
        "5",
        "--output",
        "json",
        "-vv",
    ])
    .unwrap();
    assert_eq!(cli.output, OutputFormat::Json);
    assert_eq!(cli.verbose, 2);
    assert!(matches!(
        cli.command,
        Commands::Reputation(ReputationCommands::Show { limit: Some(5), .. })
    ));
}

#[test]
fn test_parse_topic_defaults_to_version_two() {
    let cli = Cli::try_parse_from(["lightwire", "topic", "--genesis", "0xabcd"]).unwrap();
    match cli.command {
        Commands::Topic(args) => {
            assert_eq!(args.version, 2);
            assert_eq!(args.genesis, "0xabcd");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_topic_requires_genesis() {
    assert!(Cli::try_parse_from(["lightwire", "topic"]).is_err());
}
