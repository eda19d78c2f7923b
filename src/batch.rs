use crate::data_structures::{Info, SharedQuotes, SharedStore};
use crate::judge::{self, EvaluateError};
use crate::snapshot;
use crate::stock::{QuoteSource, StockError};
use crate::title::{self, TitleError};
use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn, Instrument};

#[derive(Debug, Error)]
pub enum InfoFailure {
    #[error(transparent)]
    Title(#[from] TitleError),
    #[error(transparent)]
    Stock(#[from] StockError),
    #[error(transparent)]
    Evaluate(#[from] EvaluateError),
    #[error("info {0} was removed during the batch")]
    Removed(u64),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("parse batch already running")]
    Busy,
    #[error("parse batch aborted: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub info_id: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseReport {
    pub total: usize,
    pub judged: usize,
    pub failures: Vec<ParseFailure>,
}

/// Everything needed to run the batch from a handler or the worker.
#[derive(Clone)]
pub struct ParseJob {
    pub store: SharedStore,
    pub quotes: SharedQuotes,
    pub window_days: i64,
    pub data_file: Option<PathBuf>,
}

impl ParseJob {
    /// Runs the batch unless one is already in flight.
    ///
    /// The batch runs on its own task, so it finishes and persists even when
    /// the caller stops waiting for the report.
    pub async fn try_run(&self) -> Result<ParseReport, JobError> {
        let mut quotes = match self.quotes.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Parse batch already running");
                return Err(JobError::Busy);
            }
        };

        let job = self.clone();
        let batch = tokio::spawn(
            async move {
                let report = run(&job.store, &mut **quotes, job.window_days).await;
                drop(quotes);
                job.persist().await;
                report
            }
            .in_current_span(),
        );
        Ok(batch.await?)
    }

    /// Snapshots the store when a data file is configured. Errors are logged only.
    pub async fn persist(&self) {
        if let Some(path) = &self.data_file {
            let store = self.store.lock().await;
            if let Err(e) = snapshot::save(path, &store) {
                error!(path = %path.display(), error = %e, "Failed to save snapshot");
            }
        }
    }
}

/// Parses every info title, fetches the quote window after its date and
/// stores the resulting tracerts and judge. One bad info never stops the run.
#[instrument(skip(store, source))]
pub async fn run<S: QuoteSource + ?Sized>(store: &SharedStore, source: &mut S, window_days: i64) -> ParseReport {
    let infos = store.lock().await.infos();
    let mut report = ParseReport {
        total: infos.len(),
        ..Default::default()
    };
    info!(total = report.total, "Starting parse batch");

    for info in infos {
        let info_id = info.id;
        match process_info(store, source, info, window_days).await {
            Ok(()) => report.judged += 1,
            Err(e) => {
                warn!(info_id, error = %e, "Failed to judge info");
                report.failures.push(ParseFailure {
                    info_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        total = report.total,
        judged = report.judged,
        failed = report.failures.len(),
        "Completed parse batch"
    );
    report
}

async fn process_info<S: QuoteSource + ?Sized>(
    store: &SharedStore,
    source: &mut S,
    mut info: Info,
    window_days: i64,
) -> Result<(), InfoFailure> {
    debug!(info_id = info.id, title = %info.title, "Parsing info title");
    let facts = title::parse(&info.title)?;

    let begin_at = match info.date {
        Some(date) => date,
        None => facts.date()?.and_time(NaiveTime::MIN).and_utc(),
    };
    info.date = Some(begin_at);
    info.stock = Some(facts.stock.clone());
    let info_id = info.id;
    if !store.lock().await.update_info(info) {
        return Err(InfoFailure::Removed(info_id));
    }

    let begin = begin_at.date_naive();
    let end = begin + Duration::days(window_days);
    let result = source.history(&facts.stock, begin, end).await?;
    debug!(info_id, stock = %facts.stock, status = result.status, rows = result.hq.len(), "Fetched quote window");

    let evaluation = judge::evaluate(info_id, &result)?;
    let score = evaluation.judge.score;

    if !store.lock().await.record_evaluation(info_id, evaluation.tracerts, evaluation.judge) {
        return Err(InfoFailure::Removed(info_id));
    }

    info!(info_id, stock = %facts.stock, score, "Judged info");
    Ok(())
}
