// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Args, Parser, Subcommand};
use std::fmt;
use std::path::PathBuf;

use crate::ami::{HostKeyPolicy, NativeDebugOptions};

#[derive(Parser, Debug)]
#[command(
    name = "ami",
    version,
    about = "Abstract model interface agent - inspect and drive a workload backend",
    long_about = "ami exposes the abstract model interface of the configured backend on the command line.\nIt reports node facts, records application state, streams service logs and opens\ninteractive remote shells through the backend's remote command support.",
    after_help = "EXAMPLES:\n  Node facts:              ami node-info\n  Remote shell:            ami shell --host 10.0.0.5 --user admin\n  Last lines of a log:     ami logs web --tail 50\n  Label this node:         ami label zone=a rack=12"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long,
        help = "Configuration file path [default: ~/.config/ami/config.yaml]"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'v',
        long,
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Open an interactive shell on a remote host",
        long_about = "Connects over SSH with password authentication and attaches the local terminal\nto a remote login shell. The remote terminal is xterm, 80 rows by 160 columns.\nThe session ends when the remote shell exits or the connection drops."
    )]
    Shell(ShellArgs),

    #[command(about = "Print identity, version and capacity of the node as JSON")]
    NodeInfo,

    #[command(about = "Print current resource utilisation of the node as JSON")]
    NodeStats,

    #[command(
        about = "Merge labels into the labels of a node",
        after_help = "Examples:\n  ami label zone=a rack=12\n  ami label --node edge-01 role=gateway"
    )]
    Label {
        #[arg(long, help = "Node to label [default: the master node]")]
        node: Option<String>,

        #[arg(required = true, value_parser = parse_label, help = "Labels in KEY=VALUE form")]
        labels: Vec<(String, String)>,
    },

    #[command(
        about = "Record the desired state of an application",
        long_about = "Reads a JSON document with an `app` object and optional `configs` and `secrets`\nmaps, and applies it. Applying the same document again leaves the same state."
    )]
    Apply {
        #[arg(short = 'n', long, default_value = "default")]
        namespace: String,

        #[arg(help = "JSON file describing the application")]
        file: PathBuf,
    },

    #[command(about = "Print the status of every application in a namespace as JSON")]
    Apps {
        #[arg(short = 'n', long, default_value = "default")]
        namespace: String,
    },

    #[command(about = "Remove an application")]
    Delete {
        #[arg(short = 'n', long, default_value = "default")]
        namespace: String,

        name: String,
    },

    #[command(about = "Print the log of a service")]
    Logs {
        #[arg(short = 'n', long, default_value = "default")]
        namespace: String,

        service: String,

        #[arg(long, help = "Only print the last N lines")]
        tail: Option<u64>,

        #[arg(long, help = "Only print output written in the last N seconds")]
        since: Option<u64>,
    },
}

#[derive(Args)]
pub struct ShellArgs {
    #[arg(short = 'H', long, help = "Remote host name or address")]
    pub host: String,

    #[arg(short = 'p', long, default_value = "22", help = "Remote SSH port")]
    pub port: String,

    #[arg(short = 'u', long, help = "Login user")]
    pub user: String,

    #[arg(
        long,
        env = "AMI_SSH_PASSWORD",
        hide_env_values = true,
        help = "Login password"
    )]
    pub password: String,

    #[arg(
        long,
        help = "Verify the host key against ~/.ssh/known_hosts",
        conflicts_with_all = ["known_hosts_file", "host_key"]
    )]
    pub known_hosts: bool,

    #[arg(
        long,
        help = "Verify the host key against this known_hosts file",
        conflicts_with = "host_key"
    )]
    pub known_hosts_file: Option<PathBuf>,

    #[arg(long, help = "Accept only this base64 encoded host public key")]
    pub host_key: Option<String>,
}

impl fmt::Debug for ShellArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellArgs")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host_key_policy", &self.host_key_policy())
            .finish()
    }
}

impl ShellArgs {
    pub fn host_key_policy(&self) -> HostKeyPolicy {
        if let Some(key) = &self.host_key {
            HostKeyPolicy::PublicKey { key: key.clone() }
        } else if let Some(path) = &self.known_hosts_file {
            HostKeyPolicy::KnownHostsFile { path: path.clone() }
        } else if self.known_hosts {
            HostKeyPolicy::KnownHosts
        } else {
            HostKeyPolicy::Ignore
        }
    }

    pub fn to_options(&self) -> NativeDebugOptions {
        NativeDebugOptions::new(
            self.host.clone(),
            self.port.clone(),
            self.user.clone(),
            self.password.clone(),
        )
        .with_host_key(self.host_key_policy())
    }
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}
