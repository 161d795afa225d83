//! Funnel runner binary.
//!
//! Loads config, opens the JSON store, optionally imports scraped records,
//! runs one funnel batch and prints the run report. With `API_ADDR` set it
//! then serves the read API (`/rank`, `/aggregate/{view}`, `/stats`, `/metrics`).
//!
//! Environment:
//!   FUNNEL_STORE_PATH        store file (default data/funnel_store.json)
//!   FUNNEL_IMPORT            JSON array of raw records to add before the run
//!   FUNNEL_INTERVIEWS        JSON array of interview evidence for validation
//!   FUNNEL_REPROCESS_FAILED  "1" clears all failure markers before the run
//!   FUNNEL_RUN               "0" skips the run (serve only)
//!   API_ADDR                 e.g. 127.0.0.1:8080

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use pain_funnel::api::{router_with_metrics, AppState};
use pain_funnel::classify::build_models_from_config;
use pain_funnel::config::Settings;
use pain_funnel::funnel::Funnel;
use pain_funnel::metrics::Metrics;
use pain_funnel::rank::{InterviewEvidence, InterviewValidation, NoValidation, ValidationLookup};
use pain_funnel::record::RawRecord;
use pain_funnel::store::JsonFileStore;

const DEFAULT_STORE_PATH: &str = "data/funnel_store.json";

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    pain_funnel::init_tracing();

    // Configuration errors stop here, before any record is touched.
    let settings = Settings::load_default()?;
    settings.validate()?;

    let metrics = Metrics::init()?;

    let store_path = std::env::var("FUNNEL_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORE_PATH));
    let store = Arc::new(JsonFileStore::open(&store_path).await?);

    if let Ok(path) = std::env::var("FUNNEL_IMPORT") {
        let records: Vec<RawRecord> = read_json(&path).await?;
        let added = store.import_records(records).await?;
        info!(target: "store", added, path = %path, "records imported");
    }

    let validation: Arc<dyn ValidationLookup> = match std::env::var("FUNNEL_INTERVIEWS") {
        Ok(path) => {
            let evidence: Vec<InterviewEvidence> = read_json(&path).await?;
            info!(target: "rank", interviews = evidence.len(), "interview validation loaded");
            Arc::new(InterviewValidation::new(evidence))
        }
        Err(_) => Arc::new(NoValidation),
    };

    if env_flag("FUNNEL_RUN", true) {
        let models = build_models_from_config(&settings.models, settings.retry.call_timeout())?;
        let funnel = Funnel::from_settings(&settings, &models, store.clone(), store.clone())?;

        if env_flag("FUNNEL_REPROCESS_FAILED", false) {
            funnel.reprocess_all_failed().await?;
        }

        let ctx = funnel.new_context();
        let cancel = Arc::clone(&ctx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(target: "funnel", "interrupt received, finishing in-flight records");
                cancel.cancel();
            }
        });

        let report = funnel.run(ctx).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if let Ok(addr) = std::env::var("API_ADDR") {
        let state = AppState::new(store.clone(), validation);
        let app = router_with_metrics(state, &metrics);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(%addr, "serving read API");
        axum::serve(listener, app).await?;
    }

    Ok(())
}
