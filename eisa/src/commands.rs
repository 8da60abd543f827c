use clap::{arg, command, value_parser};
use std::path::PathBuf;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

fn config_arg() -> clap::Arg {
    arg!(-c --"config" <PATH>)
        .required(false)
        .help("Path to eisa.toml (default: ~/.config/eisa/eisa.toml)")
        .value_parser(value_parser!(PathBuf))
}

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("eisa")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("eisa")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" "Log debug output to stderr")
                .required(false)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Writes a template eisa.toml into the configuration directory")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Configuration directory")
                        .default_value("~/.config/eisa/"),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite an existing eisa.toml without asking")
                        .required(false),
                ),
        )
        .subcommand(
            command!("resources")
                .about("Lists the resources the EISA service exposes")
                .arg(config_arg()),
        )
        .subcommand(
            command!("fetch")
                .about("Prints the flattened records of one resource as JSON lines")
                .arg(
                    arg!(<RESOURCE>)
                        .required(true)
                        .help("Name of the resource, as listed by `eisa resources`"),
                )
                .arg(config_arg())
                .arg(
                    arg!(-l --"limit" <COUNT>)
                        .required(false)
                        .help("Stop after this many records")
                        .value_parser(value_parser!(usize)),
                ),
        )
        .subcommand(
            command!("run")
                .about("Loads every resource (or the selected ones) into the SQLite destination")
                .arg(config_arg())
                .arg(
                    arg!(-r --"resource" <NAME>)
                        .required(false)
                        .help("Only load this resource (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"dataset" <NAME>)
                        .required(false)
                        .help("Dataset name, also the default database file name"),
                )
                .arg(
                    arg!(--"database" <PATH>)
                        .required(false)
                        .help("SQLite database file (default: ~/.config/eisa/<dataset>.db)"),
                )
                .arg(
                    arg!(--"export-schema" <DIR>)
                        .required(false)
                        .help("Directory to export the schema snapshot to"),
                )
                .arg(
                    arg!(--"on-fetch-error" <POLICY>)
                        .required(false)
                        .help("What to do when a page request fails: abort or truncate")
                        .value_parser(["abort", "truncate"]),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Load report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        )
}
