// Copyright 2025 Neutree Authors
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

use clap::{Parser, Subcommand};
use neutree_core::config::{PluginServerArgs, RenderRouterArgs, ServerArgs};

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "neutree-core")]
#[command(about = "Neutree control plane core", long_about = None)]
#[command(version = build::CLAP_LONG_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the plugin registration server and the cluster controller
    Server(ServerArgs),

    /// Serve one internal accelerator plugin over the external plugin API
    PluginServer(PluginServerArgs),

    /// Output the router manifests for a cluster in YAML
    RenderRouter(RenderRouterArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => neutree_core::run(args).await?,
        Commands::PluginServer(args) => neutree_core::run_plugin_server(args).await?,
        Commands::RenderRouter(args) => neutree_core::render_router(args).await?,
    }

    Ok(())
}
