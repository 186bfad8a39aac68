pub mod command;

pub use command::{execute_command, Commands};

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "agent",
    about = "Host agent that rents out this machine's compute as containers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}
