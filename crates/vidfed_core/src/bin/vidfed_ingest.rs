/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use futures_util::future::join_all;
use serde::Deserialize;
use std::{path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use vidfed_core::{
    config::NodeConfig,
    fetch::{HttpObjectFetcher, NoFetch, ObjectFetcher},
    forward_queue::ForwardQueue,
    notifier::{LogSink, Notifier, UiEventSink},
    store::{ActorKind, FederationDb},
    Dispatcher,
};
use vidfed_protocol::Activity;

#[derive(Debug, Deserialize)]
struct IngestLine {
    by_actor: SenderRef,
    activity: Activity,
}

#[derive(Debug, Deserialize)]
struct SenderRef {
    id: String,
    #[serde(rename = "type", default = "default_sender_type")]
    ty: String,
    #[serde(default)]
    inbox: Option<String>,
    #[serde(rename = "sharedInbox", default)]
    shared_inbox: Option<String>,
}

fn default_sender_type() -> String {
    "Person".to_string()
}

struct Args {
    config: PathBuf,
    input: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut config = None;
    let mut input = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next().context("--config requires a path")?)),
            "--input" => input = Some(PathBuf::from(args.next().context("--input requires a path")?)),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    if config.is_none() {
        if let Ok(path) = std::env::var("VIDFED_CONFIG") {
            if !path.trim().is_empty() {
                config = Some(PathBuf::from(path));
            }
        }
    }
    let config = config.context("usage: vidfed_ingest --config <path> [--input <jsonl>] (or set VIDFED_CONFIG)")?;
    Ok(Args { config, input })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().context("log directive")?),
        )
        .init();

    let args = parse_args()?;
    let cfg = NodeConfig::load(&args.config)?;
    info!("config: {}", args.config.display());

    let db = FederationDb::open(cfg.db_path()?, cfg.busy_timeout())?;
    db.health_check()?;
    let queue = ForwardQueue::open(cfg.db_path()?)?;
    let fetcher: Arc<dyn ObjectFetcher> = if cfg.fetch.enabled {
        Arc::new(HttpObjectFetcher::new(&cfg.fetch)?)
    } else {
        Arc::new(NoFetch)
    };

    let ui = UiEventSink::new(256);
    let mut ui_rx = ui.subscribe();
    tokio::spawn(async move {
        while let Ok(ev) = ui_rx.recv().await {
            if let Ok(line) = serde_json::to_string(&ev) {
                println!("{line}");
            }
        }
    });
    let notifier = Notifier::new()
        .with_sink(Arc::new(LogSink))
        .with_sink(Arc::new(ui));

    let dispatcher = Dispatcher::new(&cfg, db, fetcher, Arc::new(queue), notifier);

    let tasks = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("open input: {}", path.display()))?;
            spawn_lines(BufReader::new(file), &dispatcher).await?
        }
        None => spawn_lines(BufReader::new(tokio::io::stdin()), &dispatcher).await?,
    };

    let total = tasks.len();
    tokio::select! {
        results = join_all(tasks) => {
            let failed = results
                .into_iter()
                .filter(|r| !matches!(r, Ok(true)))
                .count();
            info!(total, failed, "ingest finished");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown requested");
        }
    }
    Ok(())
}

async fn spawn_lines<R>(reader: R, dispatcher: &Dispatcher) -> Result<Vec<tokio::task::JoinHandle<bool>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut tasks = Vec::new();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: IngestLine = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(line_no, "skipping unparsable line: {e}");
                continue;
            }
        };
        let dispatcher = dispatcher.clone();
        tasks.push(tokio::spawn(async move { ingest_one(&dispatcher, line_no, parsed).await }));
    }
    Ok(tasks)
}

async fn ingest_one(dispatcher: &Dispatcher, line_no: usize, line: IngestLine) -> bool {
    let kind = ActorKind::from_str(&line.by_actor.ty).unwrap_or(ActorKind::Person);
    let sender = match dispatcher
        .resolve_sender(
            &line.by_actor.id,
            kind,
            line.by_actor.inbox.as_deref(),
            line.by_actor.shared_inbox.as_deref(),
        )
        .await
    {
        Ok(a) => a,
        Err(e) => {
            error!(line_no, actor = %line.by_actor.id, "sender resolution failed: {e:#}");
            return false;
        }
    };
    match dispatcher.dispatch(&line.activity, &sender).await {
        Ok(outcome) => {
            info!(
                line_no,
                activity = line.activity.display_id(),
                created = outcome.created(),
                "{outcome:?}"
            );
            true
        }
        Err(e) => {
            error!(line_no, activity = line.activity.display_id(), "rejected: {e:#}");
            false
        }
    }
}
