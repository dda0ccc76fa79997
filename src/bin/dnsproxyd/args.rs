// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements command-line argument parsing.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The dnsproxy caching DNS proxy
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server
    Run(RunArgs),

    /// Print the default configuration file
    PrintDefaultConfig,
}

#[derive(Debug, Default, Parser)]
pub struct RunArgs {
    /// Set the configuration file to use
    #[clap(
        long,
        conflicts_with_all = &["bind", "upstreams", "no_cache", "min", "max"],
        value_name = "FILE"
    )]
    pub config: Option<PathBuf>,

    /// Set the server bind IP address and port
    #[clap(long, value_name = "IP:PORT")]
    pub bind: Option<SocketAddr>,

    /// Add an upstream resolver (at most three are used)
    #[clap(long = "upstream", value_name = "HOST[:PORT]")]
    pub upstreams: Vec<String>,

    /// Disable the answer cache
    #[clap(long)]
    pub no_cache: bool,

    /// Set the minimum number of worker threads
    #[clap(long, value_name = "N")]
    pub min: Option<usize>,

    /// Set the maximum number of worker threads
    #[clap(long, value_name = "N")]
    pub max: Option<usize>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn upstreams_accumulate() {
        let args = Args::try_parse_from([
            "dnsproxyd",
            "run",
            "--upstream",
            "1.1.1.1",
            "--upstream",
            "9.9.9.9:5353",
            "--no-cache",
            "--min",
            "2",
        ])
        .unwrap();
        match args.command {
            Command::Run(run_args) => {
                assert_eq!(run_args.upstreams, ["1.1.1.1", "9.9.9.9:5353"]);
                assert!(run_args.no_cache);
                assert_eq!(run_args.min, Some(2));
                assert_eq!(run_args.max, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn config_file_conflicts_with_inline_options() {
        assert!(Args::try_parse_from([
            "dnsproxyd",
            "run",
            "--config",
            "dnsproxy.toml",
            "--no-cache",
        ])
        .is_err());
    }
}
