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

//! The `dnsproxyd` caching DNS proxy daemon.

mod args;
mod config;
mod run;

use std::process;

use args::Command;

fn main() {
    let args = args::parse();
    match args.command {
        Command::Run(run_args) => run::run(run_args),
        Command::PrintDefaultConfig => match config::default_toml() {
            Ok(toml) => print!("{}", toml),
            Err(e) => {
                eprintln!("Failed to produce the default configuration: {:#}", e);
                process::exit(1);
            }
        },
    }
}
