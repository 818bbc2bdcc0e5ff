// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use clap::Parser;
use embedding_worker::{
    config::{Cli, ModelConfig},
    handler::EmbeddingJobHandler,
    logging::{init_tracing, parse_log_level},
    serverless::{self, JobHandler, Mode},
    SharedModel,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(parse_log_level(&cli.log_level)?);

    let model_config = ModelConfig::try_from(cli.model.clone())?;
    info!(
        "Embedding worker v{} (model: {}, cache: {})",
        env!("CARGO_PKG_VERSION"),
        model_config.model_repo,
        model_config.models_cache.display()
    );

    // Loaded on the first job and shared by every job after it
    let model = SharedModel::from_config(model_config);
    let handler: Arc<dyn JobHandler> = Arc::new(EmbeddingJobHandler::new(model));

    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    let mode = Mode::from_cli(&cli, &cwd)?;

    if !serverless::start(handler, mode).await? {
        std::process::exit(1);
    }

    Ok(())
}
