use colored::Colorize;
use eisa::command_argument_builder;
use eisa::handlers::{handle_fetch, handle_init, handle_resources, handle_run, init_tracing};
use eisa_core::print_banner;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");
    init_tracing(chosen_command.get_flag("verbose"));

    // JSON lines on stdout must stay clean
    let is_fetch = matches!(chosen_command.subcommand(), Some(("fetch", _)));
    if !quiet && !is_fetch {
        print_banner();
    }

    let result = match chosen_command.subcommand() {
        None => return,
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("resources", primary_command)) => handle_resources(primary_command).await,
        Some(("fetch", primary_command)) => handle_fetch(primary_command).await,
        Some(("run", primary_command)) => handle_run(primary_command).await,
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
