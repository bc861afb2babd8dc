use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sockethub")]
#[command(version)]
#[command(about = "Sockethub daemon - relays messages between clients and platforms", long_about = None)]
pub(crate) struct Cli {
    /// Config file (defaults to $SOCKETHUB_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the supervisor in the foreground (default)
    Run,

    /// Run the readiness check against redis once and report
    Check,

    /// Run a worker process (internal, spawned by the supervisor)
    #[command(hide = true)]
    Worker {
        /// Identifier shared by every worker of one supervisor run
        sockethub_id: String,

        #[arg(long, default_value = "1")]
        worker_id: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::try_parse_from(["sockethub"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_worker_requires_sockethub_id() {
        assert!(Cli::try_parse_from(["sockethub", "worker"]).is_err());
    }

    #[test]
    fn test_worker_args() {
        let cli = Cli::try_parse_from([
            "sockethub",
            "worker",
            "abc",
            "--worker-id",
            "3",
            "--config",
            "/tmp/sockethub.toml",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Worker {
                sockethub_id,
                worker_id,
            }) => {
                assert_eq!(sockethub_id, "abc");
                assert_eq!(worker_id, 3);
            }
            _ => panic!("expected worker command"),
        }
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/sockethub.toml")));
    }

    #[test]
    fn test_worker_id_defaults_to_one() {
        let cli = Cli::try_parse_from(["sockethub", "worker", "abc"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Worker { worker_id: 1, .. })
        ));
    }
}
