use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use xrank::cli::analyze::{AnalyzeOptions, CandidateSelection};
use xrank::core::Strategy;
use xrank::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Rank conversion paths through intermediate currencies
    Analyze(AnalyzeArgs),
    /// List currencies the rate source can quote
    Currencies {
        /// Use approximate demo rates instead of live providers
        #[arg(long)]
        offline: bool,
    },
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Amount of the source currency to convert
    #[arg(short, long, default_value_t = 10000.0)]
    amount: f64,

    /// Source currency (defaults to the configured one)
    #[arg(long)]
    from: Option<String>,

    /// Target currency (defaults to the configured one)
    #[arg(long)]
    to: Option<String>,

    /// Comma-separated intermediate currencies
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["popular", "all"])]
    currencies: Option<Vec<String>>,

    /// Try the commonly traded currencies only
    #[arg(long, conflicts_with = "all")]
    popular: bool,

    /// Try every currency the source can quote
    #[arg(long)]
    all: bool,

    /// Use approximate demo rates instead of live providers
    #[arg(long)]
    offline: bool,

    /// auto, sequential or bulk
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Maximum number of paths to display
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

impl AnalyzeArgs {
    fn into_options(self, verbose: bool) -> AnalyzeOptions {
        let selection = match (self.currencies, self.popular, self.all) {
            (Some(codes), _, _) => CandidateSelection::Listed(codes),
            (None, true, _) => CandidateSelection::Popular,
            (None, _, true) => CandidateSelection::All,
            _ => CandidateSelection::Default,
        };
        AnalyzeOptions {
            amount: self.amount,
            from: self.from,
            to: self.to,
            selection,
            offline: self.offline,
            strategy: self.strategy,
            limit: self.limit,
            verbose,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config_path = cli.config_path.as_deref();
    let result = match cli.command {
        Some(Commands::Setup) => xrank::cli::setup::setup(),
        Some(Commands::Analyze(args)) => {
            let command = xrank::AppCommand::Analyze(args.into_options(cli.verbose));
            xrank::run_command(command, config_path).await
        }
        Some(Commands::Currencies { offline }) => {
            xrank::run_command(xrank::AppCommand::Currencies { offline }, config_path).await
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
