mod cmd_config;
mod cmd_init;
mod cmd_play;
mod cmd_serve;
mod cmd_session;
mod logging;
mod render;
mod workspace;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gitdojo", version, about = "Practice Git in a simulated repository")]
struct Cli {
    /// Learner whose progress is read and written
    #[arg(long, global = true, env = "GITDOJO_LEARNER", default_value = "local")]
    learner: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a .gitdojo/ workspace with a starter practice
    Init,
    /// List practices and your progress on each
    List,
    /// Start an interactive session on a practice
    Play {
        /// Practice id
        practice: String,
    },
    /// Run one command against a practice session
    Exec {
        /// Practice id
        practice: String,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
        /// Command and arguments (after --)
        #[arg(last = true)]
        argv: Vec<String>,
    },
    /// Check the session against the practice goal
    Validate {
        /// Practice id
        practice: String,
        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discard progress on a practice
    Reset {
        /// Practice id
        practice: String,
        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },
    /// Start the HTTP API server
    Serve {
        /// Bind address (defaults to the `bind` config value)
        #[arg(long)]
        bind: Option<String>,
        /// Port (defaults to the `port` config value)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Manage workspace configuration
    Config {
        #[command(subcommand)]
        cmd: cmd_config::ConfigCmd,
    },
}

fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();
    let root = std::env::current_dir()?;
    let learner = cli.learner.as_str();

    match cli.cmd {
        Command::Init => cmd_init::execute(&root),
        Command::List => cmd_session::list(&root, learner),
        Command::Play { practice } => cmd_play::execute(&root, learner, &practice),
        Command::Exec {
            practice,
            json,
            argv,
        } => cmd_session::exec(&root, learner, &practice, &argv, json),
        Command::Validate { practice, json } => {
            cmd_session::validate(&root, learner, &practice, json)
        }
        Command::Reset { practice, yes } => cmd_session::reset(&root, learner, &practice, yes),
        Command::Serve { bind, port } => cmd_serve::execute(&root, bind, port),
        Command::Config { cmd } => cmd_config::run(cmd, &root),
    }
}
