use clap::{Parser as ClapParser, Subcommand};
use sieve_lang::Dialect;
use sieve_lang::cli::{self, CheckOptions, CheckResult, CliError};
use std::io::{self, Read};
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "sieve")]
#[command(about = "Sieve - compile predicates for in-memory objects and SQL backends")]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, compile and run a predicate
    Check {
        /// The predicate format string
        predicate: String,

        /// JSON input (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<String>,

        /// Treat the format string as an expression
        #[arg(long)]
        expr: bool,

        /// Positional argument for a %-placeholder, as JSON (repeatable)
        #[arg(short, long = "arg")]
        args: Vec<String>,

        /// Target dialect: objects or backend
        #[arg(short, long, default_value = "objects")]
        dialect: Dialect,

        /// The backend already compares strings case-insensitively
        #[arg(long)]
        case_insensitive_collation: bool,

        /// Filter a top-level JSON array element by element
        #[arg(long)]
        filter: bool,

        /// Only validate syntax, don't execute
        #[arg(long)]
        syntax_only: bool,

        /// Print the canonical formatting before the result
        #[arg(long)]
        format: bool,

        /// Pretty-print the output
        #[arg(short, long)]
        pretty: bool,
    },
}

fn init_tracing(log_level: &str) -> Result<(), CliError> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .map_err(|e| CliError::InvalidOption(format!("log level '{log_level}': {e}")))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let result = init_tracing(&cli.log_level).and_then(|()| match cli.command {
        Commands::Check {
            predicate,
            input,
            expr,
            args,
            dialect,
            case_insensitive_collation,
            filter,
            syntax_only,
            format,
            pretty,
        } => {
            let options = CheckOptions {
                source: predicate,
                input,
                arguments: args,
                expression: expr,
                dialect,
                case_insensitive_collation,
                syntax_only,
                format,
                filter,
            };
            run_check(options, pretty)
        }
    });

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run_check(mut options: CheckOptions, pretty: bool) -> Result<(), CliError> {
    let needs_input = !options.syntax_only && options.dialect == Dialect::Objects;
    if options.input.is_none() && needs_input && !atty::is(atty::Stream::Stdin) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        options.input = Some(buffer);
    }

    let output = cli::execute_check(&options)?;

    if let Some(formatted) = output.formatted {
        println!("{}", formatted);
    }

    match output.result {
        CheckResult::SyntaxValid => println!("Syntax is valid"),
        CheckResult::Sql(sql) => println!("{}", sql),
        CheckResult::Value(value) => {
            let json = if pretty {
                serde_json::to_string_pretty(&value)
            } else {
                serde_json::to_string(&value)
            }?;
            println!("{}", json);
        }
    }
    Ok(())
}
