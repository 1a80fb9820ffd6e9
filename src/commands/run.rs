use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::commands::resolve_repo;
use crate::config::{Config, Endpoint};
use crate::mcp::McpServer;
use crate::orchestrator::{self, Orchestrator};
use crate::plan::PlanStore;
use crate::telemetry;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Repository root (defaults to the current directory)
    #[arg(long)]
    pub repo: Option<PathBuf>,
    /// Run at most this many ticks, then exit
    #[arg(long)]
    pub ticks: Option<u64>,
}

impl RunArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let repo = resolve_repo(self.repo.as_deref())?;
        let config = Config::load_or_default(&repo)?;

        let project = repo
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repo")
            .to_string();
        let log_path = telemetry::init(&project)?;
        info!(log = %log_path.display(), "session started");

        let endpoint = Endpoint::parse(&config.endpoints.local)?;

        // First run against a repo: create the plan branch, seeding spec.md
        // from the repo root when one is there.
        let store = PlanStore::new(&repo);
        if !store.branch_exists()? {
            let seed = std::fs::read_to_string(repo.join("spec.md")).unwrap_or_default();
            store.bootstrap(&seed)?;
            info!("created plan branch");
        }

        orchestrator::install_signal_handlers()?;
        let server = McpServer::start(&endpoint.host, endpoint.port)?;
        println!("scriptorium: listening on {}", server.base_url());

        let orch = Orchestrator::new(&repo, config, Some(server.base_url()))?;
        match self.ticks {
            Some(ticks) => orch.run_for_ticks(ticks),
            None => orch.run(),
        }

        server.shutdown();
        Ok(())
    }
}
