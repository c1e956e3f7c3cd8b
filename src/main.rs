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

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use ami::{
    cli::{Cli, Commands, ShellArgs},
    config::AmiConfig,
    terminal::{force_terminal_cleanup, RawModeGuard},
    utils::init_logging,
    Ami, Application, CommandOptions, Configuration, Pipe, Secret,
};

/// Input of `ami apply`.
#[derive(Debug, Deserialize)]
struct ApplyDocument {
    app: Application,
    #[serde(default)]
    configs: HashMap<String, Configuration>,
    #[serde(default)]
    secrets: HashMap<String, Secret>,
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{rendered}");
    Ok(())
}

async fn run_shell(backend: &dyn Ami, args: &ShellArgs) -> Result<()> {
    let options = CommandOptions::Native(args.to_options());
    let mut pipe = Pipe::stdio();

    let guard = RawModeGuard::enter_if_tty()?;
    let result = backend.remote_command(&options, &mut pipe).await;
    drop(guard);

    result.with_context(|| format!("Remote shell on {}:{} failed", args.host, args.port))
}

async fn apply_from_file(backend: &dyn Ami, namespace: &str, file: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let doc: ApplyDocument = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse application document {}", file.display()))?;
    backend
        .apply_app(namespace, &doc.app, &doc.configs, &doc.secrets)
        .await?;
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(AmiConfig::default_path);
    let config = AmiConfig::load(&config_path).await?;
    let backend: Arc<dyn Ami> = config.build_backend()?;

    match cli.command {
        Commands::Shell(args) => run_shell(backend.as_ref(), &args).await?,
        Commands::NodeInfo => print_json(&backend.collect_node_info().await?)?,
        Commands::NodeStats => print_json(&backend.collect_node_stats().await?)?,
        Commands::Label { node, labels } => {
            let node = node.unwrap_or_else(|| backend.master_node_name());
            let labels: BTreeMap<String, String> = labels.into_iter().collect();
            backend.update_node_labels(&node, &labels).await?;
        }
        Commands::Apply { namespace, file } => {
            apply_from_file(backend.as_ref(), &namespace, &file).await?
        }
        Commands::Apps { namespace } => print_json(&backend.stats_apps(&namespace).await?)?,
        Commands::Delete { namespace, name } => backend.delete_app(&namespace, &name).await?,
        Commands::Logs {
            namespace,
            service,
            tail,
            since,
        } => {
            let mut stream = backend.fetch_log(&namespace, &service, tail, since).await?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut stream, &mut stdout)
                .await
                .context("Failed to write log output")?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            force_terminal_cleanup();
            eprintln!("Error: {e:#}");
            1
        }
    };

    // A pending stdin read from an interactive session would keep the
    // runtime from shutting down.
    std::process::exit(code);
}
