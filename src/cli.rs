use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Data directory (defaults to ~/.sema)
    #[clap(long)]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start sema as an HTTP service.
    Daemon {
        /// Address to listen on (overrides config)
        #[clap(long)]
        listen: Option<String>,
    },

    /// Chat interactively in the terminal. Type 'exit' to quit.
    Chat {},

    /// Ask a single question and exit.
    Ask {
        /// The question text
        question: String,

        /// Learn a fallback answer without asking for confirmation
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Add a knowledge entry directly, bypassing the feedback flow.
    Add {
        /// The question this entry answers
        #[clap(short, long)]
        question: String,

        /// The stored answer
        #[clap(short, long)]
        content: String,

        /// Response kind: text or code
        #[clap(short, long, default_value = "text")]
        kind: String,

        /// Optional explanation shown alongside code answers
        #[clap(short, long)]
        explanation: Option<String>,
    },
}
