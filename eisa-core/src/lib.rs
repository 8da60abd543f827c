use colored::Colorize;

pub mod config;
pub mod destination;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod source;

pub use error::{ConfigError, LoadError};

pub fn print_banner() {
    let banner = r#"
   ___  _  ___   _
  / _ \| |/ __| /_\
 |  __/| |\__ \/ _ \
  \___||_||___/_/ \_\
"#;
    println!("{}", banner.bright_cyan().bold());
    println!(
        "  {} {}\n",
        "survey response loader".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
}
