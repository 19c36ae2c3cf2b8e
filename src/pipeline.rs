//! Run orchestration: discover → fetch/parse → provision → write → log.

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use tracing::{info, warn};

use crate::audit;
use crate::batch;
use crate::cursor;
use crate::error::{StoreError, SyncError};
use crate::link::LinkBuilder;
use crate::model::{DateRange, EmailTask, LogStatus, ParsedResult, TaskPatch, TaskStatus};
use crate::observer::TaskObserver;
use crate::parser;
use crate::schema;
use crate::settings::Settings;
use crate::source::{self, MailSource};
use crate::store::TabularStore;

/// External collaborators of a run.
#[derive(Clone, Copy)]
pub struct Clients<'a> {
    pub source: &'a dyn MailSource,
    pub store: &'a dyn TabularStore,
    pub links: &'a dyn LinkBuilder,
    pub observer: &'a dyn TaskObserver,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub discovered: usize,
    pub done: usize,
    pub held: usize,
    pub errors: usize,
    pub skipped: usize,
    pub batches: usize,
}

impl RunSummary {
    fn tally(&mut self, results: &[ParsedResult]) {
        for r in results {
            match r {
                ParsedResult::Success { .. } => self.done += 1,
                ParsedResult::Held { .. } => self.held += 1,
                ParsedResult::Error { .. } => self.errors += 1,
                ParsedResult::Skipped { .. } => self.skipped += 1,
            }
        }
    }
}

/// One full incremental sync.
pub async fn run(
    settings: &Settings,
    clients: Clients<'_>,
    since: Option<NaiveDate>,
) -> Result<RunSummary, SyncError> {
    let run_start = Utc::now();
    let obs = clients.observer;
    let mut summary = RunSummary::default();

    obs.status("Reading sync log");
    let state = cursor::load(clients.store, &settings.doc_id).await?;
    let after = cursor::lower_bound(since, state.watermark);
    let filter = cursor::build_query(&settings.sender, &settings.phrases, after);
    info!("Query: {}", filter);

    obs.status("Searching mailbox");
    let mut ids = source::discover(
        clients.source,
        &filter,
        &state.seen,
        settings.page_size,
        settings.max_candidates,
        obs,
    )
    .await
    .map_err(SyncError::Discovery)?;
    ids.reverse();
    summary.discovered = ids.len();

    let tasks: Vec<EmailTask> = ids.iter().map(|id| EmailTask::queued(id)).collect();
    obs.queue(&tasks);

    if ids.is_empty() {
        obs.status("No new requests");
    }

    let total = ids.len().div_ceil(settings.macro_batch_size);
    for (n, chunk) in ids.chunks(settings.macro_batch_size).enumerate() {
        obs.status(&format!(
            "Batch {}/{}: {} message(s)",
            n + 1,
            total,
            chunk.len()
        ));
        let results = process_batch(chunk, settings.fetch_concurrency, clients, run_start).await;
        commit(settings, clients, &results, false, run_start).await?;
        summary.tally(&results);
        summary.batches += 1;
    }

    report_held(settings, clients).await?;
    obs.status(&format!(
        "Finished: {} done, {} held, {} error(s), {} skipped",
        summary.done, summary.held, summary.errors, summary.skipped
    ));
    Ok(summary)
}

/// Fetch and parse a macro-batch, `concurrency` messages at a time. Each
/// chunk is a full barrier.
async fn process_batch(
    ids: &[String],
    concurrency: usize,
    clients: Clients<'_>,
    run_start: DateTime<Utc>,
) -> Vec<ParsedResult> {
    let mut results = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(concurrency.max(1)) {
        let outcomes = join_all(chunk.iter().map(|id| process_one(id, clients, run_start))).await;
        results.extend(outcomes);
    }
    results
}

async fn process_one(id: &str, clients: Clients<'_>, run_start: DateTime<Utc>) -> ParsedResult {
    let obs = clients.observer;
    obs.update_task(id, TaskPatch::status(TaskStatus::Fetching));

    let message = match clients.source.get(id).await {
        Ok(m) => m,
        Err(e) => {
            let err = SyncError::SourceFetch {
                id: id.to_string(),
                source: e,
            };
            warn!("{}", err);
            obs.update_task(id, TaskPatch::status(TaskStatus::Error).with_error(err.to_string()));
            return ParsedResult::Error {
                message_id: id.to_string(),
                subject: String::new(),
                error: err.to_string(),
                received_at: None,
            };
        }
    };

    let subject = message.subject();
    obs.update_task(id, TaskPatch::status(TaskStatus::Parsing).with_subject(&subject));

    let html = message.html_body().unwrap_or_default();
    let sent = message.sent_date().unwrap_or(run_start);
    let received = message.received_at().unwrap_or(run_start);
    let result =
        parser::process_message(&message.id, &subject, &html, sent, received, clients.links);

    let patch = match &result {
        ParsedResult::Success { .. } => TaskPatch::status(TaskStatus::BuildingRequest),
        ParsedResult::Held { reason, .. } => {
            TaskPatch::status(TaskStatus::Held).with_error(reason.clone())
        }
        ParsedResult::Error { error, .. } => {
            TaskPatch::status(TaskStatus::Error).with_error(error.clone())
        }
        ParsedResult::Skipped { reason, .. } => {
            TaskPatch::status(TaskStatus::Skipped).with_error(reason.clone())
        }
    };
    obs.update_task(id, patch);
    result
}

/// Provision, write and log one macro-batch. Any store failure aborts.
async fn commit(
    settings: &Settings,
    clients: Clients<'_>,
    results: &[ParsedResult],
    manual: bool,
    run_start: DateTime<Utc>,
) -> Result<(), SyncError> {
    let store = clients.store;
    let doc_id = settings.doc_id.as_str();

    let mut required = batch::touched_buckets(results);
    required.push(audit::LOG_BUCKET.to_string());
    let buckets = schema::ensure_buckets(store, doc_id, &required).await?;

    let written: Vec<String> = results
        .iter()
        .filter(|r| matches!(r, ParsedResult::Success { .. }))
        .map(|r| r.message_id().to_string())
        .collect();

    if !written.is_empty() {
        clients
            .observer
            .update_tasks_bulk(&written, TaskPatch::status(TaskStatus::Writing));
        let plan = batch::execute(store, doc_id, results, &buckets).await?;
        debug_assert!(!plan.is_empty());
        info!(
            "Wrote {} row(s) across {} bucket(s)",
            plan.row_total(),
            plan.writes.len()
        );
    }

    let entries = audit::outcome_entries(results, settings.log_errors, manual, run_start);
    audit::append(store, doc_id, &entries).await?;

    if !written.is_empty() {
        clients
            .observer
            .update_tasks_bulk(&written, TaskPatch::status(TaskStatus::Done));
    }
    Ok(())
}

async fn report_held(settings: &Settings, clients: Clients<'_>) -> Result<(), SyncError> {
    let entries = match audit::read_entries(clients.store, &settings.doc_id).await {
        Ok(entries) => entries,
        Err(StoreError::BucketNotFound(_)) => return Ok(()),
        Err(e) => return Err(SyncError::LogRead(e)),
    };
    if let Some(report) = audit::held_report(&audit::still_held(&entries)) {
        warn!("{}", report);
        clients.observer.status(&report);
    }
    Ok(())
}

/// Write a held message using dates supplied by a reviewer.
pub async fn reprocess_held(
    settings: &Settings,
    clients: Clients<'_>,
    message_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<RunSummary, SyncError> {
    let run_start = Utc::now();
    let obs = clients.observer;

    let entries = audit::read_entries(clients.store, &settings.doc_id)
        .await
        .map_err(SyncError::LogRead)?;
    let latest = entries.iter().rev().find(|e| e.message_id == message_id);
    if !matches!(latest.map(|e| &e.status), Some(LogStatus::Held(_))) {
        return Err(SyncError::NotHeld(message_id.to_string()));
    }
    if end < start {
        return Err(SyncError::InvalidDate {
            field: "End Date",
            raw: format!("{} (before Start Date {})", end, start),
        });
    }

    obs.queue(&[EmailTask::queued(message_id)]);
    obs.update_task(message_id, TaskPatch::status(TaskStatus::Fetching));
    let message = clients
        .source
        .get(message_id)
        .await
        .map_err(|e| SyncError::SourceFetch {
            id: message_id.to_string(),
            source: e,
        })?;
    let subject = message.subject();
    obs.update_task(
        message_id,
        TaskPatch::status(TaskStatus::Parsing).with_subject(&subject),
    );

    let mut record = parser::table::extract(&message.html_body().unwrap_or_default());
    if let Err(e) = parser::check_required(&record) {
        obs.update_task(message_id, TaskPatch::status(TaskStatus::Error).with_error(e.to_string()));
        return Err(e);
    }
    record.start_date_raw = start.format("%Y-%m-%d").to_string();
    record.end_date_raw = end.format("%Y-%m-%d").to_string();

    let result = parser::success(
        &message.id,
        record,
        DateRange { start, end },
        message.sent_date().unwrap_or(run_start),
        message.received_at().unwrap_or(run_start),
        clients.links,
    );
    obs.update_task(message_id, TaskPatch::status(TaskStatus::BuildingRequest));

    let results = [result];
    commit(settings, clients, &results, true, run_start).await?;

    let mut summary = RunSummary {
        discovered: 1,
        batches: 1,
        ..Default::default()
    };
    summary.tally(&results);
    obs.status(&format!("Reprocessed {} with manual dates", message_id));
    Ok(summary)
}

// ── Tests ──
