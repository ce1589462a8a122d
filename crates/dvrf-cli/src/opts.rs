use gumdrop::Options;
use std::default::Default;

#[derive(Debug, Options, Clone)]
pub struct ZkDvrfOpts {
    help: bool,
    #[options(command)]
    pub command: Option<Command>,
}

// The supported commands
#[derive(Debug, Options, Clone)]
pub enum Command {
    #[options(help = "creates a new keypair which you must fund to take part in the committee")]
    Keygen(KeygenOpts),

    #[options(help = "runs the administrator: permissions nodes, drives the DKG and opens rounds")]
    Admin(RunOpts),

    #[options(help = "runs a committee member: registers, submits parameters and evaluations")]
    Node(RunOpts),

    #[options(help = "prints the contract's phase and round counters")]
    Status(StatusOpts),
}

#[derive(Debug, Options, Clone)]
pub struct KeygenOpts {
    help: bool,

    #[options(help = "path to the file where the keys will be written (stdout if none provided)")]
    pub path: Option<String>,
}

#[derive(Debug, Options, Clone)]
pub struct RunOpts {
    help: bool,

    #[options(help = "path to the TOML configuration", default = "zkdvrf.toml")]
    pub config: String,

    #[options(
        help = "hex private key of the sending wallet (falls back to ZKDVRF_PRIVATE_KEY)"
    )]
    pub private_key: Option<String>,

    #[options(help = "overrides the configured RPC endpoint")]
    pub node_url: Option<String>,
}

#[derive(Debug, Options, Clone)]
pub struct StatusOpts {
    help: bool,

    #[options(help = "path to the TOML configuration", default = "zkdvrf.toml")]
    pub config: String,

    #[options(help = "overrides the configured RPC endpoint")]
    pub node_url: Option<String>,

    #[options(help = "also print the registry entry of this address")]
    pub address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_options_default_the_config_path() {
        let opts = ZkDvrfOpts::parse_args_default(&["node"]).unwrap();
        match opts.command {
            Some(Command::Node(run)) => {
                assert_eq!(run.config, "zkdvrf.toml");
                assert!(run.private_key.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn status_takes_an_address() {
        let opts = ZkDvrfOpts::parse_args_default(&[
            "status",
            "--config",
            "local.toml",
            "--address",
            "0x00000000000000000000000000000000000000aa",
        ])
        .unwrap();
        match opts.command {
            Some(Command::Status(status)) => {
                assert_eq!(status.config, "local.toml");
                assert_eq!(
                    status.address.as_deref(),
                    Some("0x00000000000000000000000000000000000000aa")
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
