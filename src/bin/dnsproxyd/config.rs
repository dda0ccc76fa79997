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

//! Implements the server configuration file.

use std::fmt::Write;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::Level::Debug;
use log::{debug, log_enabled};
use serde::{Deserialize, Serialize};

use dnsproxy::resolver::{DEFAULT_UPSTREAM, MAX_UPSTREAMS};
use dnsproxy::server;

use crate::args::RunArgs;

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the server configuration from the file given by `path`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let dir = match path.as_ref().parent() {
        Some(p) => p,
        None => return Err(anyhow!("the configuration file path has no parent")),
    };
    let raw_config = fs::read(path.as_ref()).context("failed to read the configuration file")?;
    let mut config: Config =
        toml::from_slice(&raw_config).context("failed to parse the configuration file")?;

    // The cache file path is relative to the configuration file.
    if let Some(ref mut file) = config.cache.file {
        if file.is_relative() {
            *file = dir.join(&*file);
        }
    }

    log_config_summary(&config);
    Ok(config)
}

/// Loads the server configuration from the parsed command line
/// arguments given by `args`.
pub fn load_from_args(args: RunArgs) -> Config {
    let defaults = Config::default();
    let config = Config {
        bind: args.bind.unwrap_or(defaults.bind),
        upstreams: if args.upstreams.is_empty() {
            defaults.upstreams
        } else {
            args.upstreams
        },
        worker_pool_min: args.min.unwrap_or(defaults.worker_pool_min),
        worker_pool_max: args.max.unwrap_or(defaults.worker_pool_max),
        cache: CacheConfig {
            enabled: !args.no_cache,
            ..defaults.cache
        },
    };
    log_config_summary(&config);
    config
}

/// Renders the default configuration as TOML.
pub fn default_toml() -> Result<String> {
    toml::to_string(&Config::default()).context("failed to serialize the configuration")
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        // Don't compute the message if it will never be printed.
        return;
    }

    let cache_status = match (config.cache.enabled, config.cache.sweep_interval) {
        (false, _) => "disabled".to_owned(),
        (true, None) => "enabled".to_owned(),
        (true, Some(secs)) => format!("enabled, swept every {}s", secs),
    };
    let mut message = format!(
        "Configuration loaded:\n         Bind address: {}\n         Workers:      {} to {}\n         Cache:        {}\n         Upstreams:    ",
        config.bind, config.worker_pool_min, config.worker_pool_max, cache_status,
    );
    for (i, upstream) in config.upstreams.iter().enumerate() {
        if i == MAX_UPSTREAMS {
            write!(message, "\n  ({} more ignored)", config.upstreams.len() - i).unwrap();
            break;
        }
        write!(message, "\n  {}", upstream).unwrap();
    }
    debug!("{}", message);
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default = "default_upstreams")]
    pub upstreams: Vec<String>,
    #[serde(default = "default_worker_pool_min")]
    pub worker_pool_min: usize,
    #[serde(default = "default_worker_pool_max")]
    pub worker_pool_max: usize,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Converts the file's configuration into the library's.
    pub fn into_server_config(self) -> server::Config {
        server::Config {
            addr: self.bind,
            upstreams: self.upstreams,
            with_cache: self.cache.enabled,
            cache_file: self.cache.file,
            cache_sweep_interval: self
                .cache
                .sweep_interval
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
            worker_pool_min: self.worker_pool_min,
            worker_pool_max: self.worker_pool_max,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upstreams: default_upstreams(),
            worker_pool_min: default_worker_pool_min(),
            worker_pool_max: default_worker_pool_max(),
            cache: CacheConfig::default(),
        }
    }
}

const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
const DEFAULT_BIND_PORT: u16 = 53;

fn default_bind() -> SocketAddr {
    SocketAddr::new(DEFAULT_BIND_IP, DEFAULT_BIND_PORT)
}

fn default_upstreams() -> Vec<String> {
    vec![DEFAULT_UPSTREAM.to_owned()]
}

fn default_worker_pool_min() -> usize {
    10
}

fn default_worker_pool_max() -> usize {
    100
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: CACHE                                       //
////////////////////////////////////////////////////////////////////////

#[derive(Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Reserved for cache persistence; never read or written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Seconds between sweeps of expired entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<u64>,
}

fn default_cache_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            file: None,
            sweep_interval: None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
