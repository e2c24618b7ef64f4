use clap::{Args, Parser, Subcommand};

/// Soak tester for the interlock lock manager.
///
/// Runs threads that take ordered locks and scheduling rules in conflicting
/// orders for a while, then reports what the deadlock detector did and
/// whether the graph drained back to empty.
#[derive(Parser, Debug)]
#[command(name = "interlock-soak", about = "Deadlock soak tests for the interlock lock manager")]
pub struct CliArgs {
    /// Path to a TOML config file (defaults to environment variables)
    #[arg(long, env = "INTERLOCK_CONFIG")]
    pub config: Option<String>,

    /// Print the final metrics as a single JSON document
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub scenario: Scenario,
}

#[derive(Subcommand, Debug)]
pub enum Scenario {
    /// Threads take overlapping triples of locks in rotating order
    Rotate {
        #[command(flatten)]
        run: RunArgs,
        /// Number of locks in the ring
        #[arg(long, default_value = "6")]
        locks: usize,
    },
    /// Pairs of threads take two locks in opposite order
    AbBa {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Threads mix scheduling rules and locks in both orders
    Mixed {
        #[command(flatten)]
        run: RunArgs,
        /// Number of distinct rules and locks
        #[arg(long, default_value = "5")]
        width: usize,
    },
    /// Jobs on the scheduler take nested rules and locks
    Jobs {
        #[command(flatten)]
        run: RunArgs,
        /// Number of jobs to schedule per round
        #[arg(long, default_value = "15")]
        jobs: usize,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// How long to run, in seconds
    #[arg(long, default_value = "5")]
    pub seconds: u64,

    /// Number of participating threads
    #[arg(long, default_value = "6")]
    pub threads: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_scenario_with_defaults() {
        let args = CliArgs::try_parse_from(["interlock-soak", "rotate", "--threads", "12"]).unwrap();
        match args.scenario {
            Scenario::Rotate { run, locks } => {
                assert_eq!(run.threads, 12);
                assert_eq!(run.seconds, 5);
                assert_eq!(locks, 6);
            }
            other => panic!("unexpected scenario {:?}", other),
        }
    }

    #[test]
    fn scenario_is_required() {
        assert!(CliArgs::try_parse_from(["interlock-soak"]).is_err());
    }
}
