//! Re-derive the containers of Helm services after a match rule change.
//!
//! Records are processed one at a time, in list order. Each successful record
//! is written as a brand new revision; nothing is updated in place. When any
//! step fails, every revision written by this batch is deleted again before
//! the original error is returned.

use chrono::Utc;

use crate::errors::AppError;
use crate::models::product::MatchRule;
use crate::models::service::{ServiceRecord, ServiceStatus};
use crate::parsers::PayloadParser;
use crate::services::image_rules::parse_images_by_rules;
use crate::store::{CounterStore, ServiceStore};

/// Per-record progress through a reparse batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Not a Helm service, or no values payload.
    Unchanged,
    Parsed,
    Revisioned,
    Persisted,
    Failed,
}

/// Storage handles a reparse writes through.
pub struct ReparseStores<'a> {
    pub counters: &'a dyn CounterStore,
    pub services: &'a dyn ServiceStore,
}

/// Outcome of a successful batch.
#[derive(Debug, Default)]
pub struct ReparseReport {
    /// New revisions, in processing order.
    pub persisted: Vec<ServiceRecord>,
    pub unchanged: usize,
}

/// Reparse `records` with `rules`, writing one new revision per Helm service.
///
/// `user_name` is stamped as `create_by` on every new revision.
pub async fn reparse_services(
    stores: &ReparseStores<'_>,
    parser: &dyn PayloadParser,
    user_name: &str,
    records: Vec<ServiceRecord>,
    rules: &[MatchRule],
) -> Result<ReparseReport, AppError> {
    let mut report = ReparseReport::default();

    for record in records {
        let service_name = record.service_name.clone();
        let (state, outcome) = advance(stores, parser, user_name, record, rules).await;

        match outcome {
            Ok(Some(persisted)) => {
                tracing::debug!(service = %service_name, state = ?state, "Reparse step");
                report.persisted.push(persisted);
            }
            Ok(None) => report.unchanged += 1,
            Err(e) => {
                tracing::error!(
                    service = %service_name,
                    state = ?RecordState::Failed,
                    reached = ?state,
                    error = %e,
                    written = report.persisted.len(),
                    "Reparse failed, rolling back new revisions"
                );
                rollback(stores.services, &report.persisted).await;
                return Err(e);
            }
        }
    }

    tracing::info!(
        reparsed = report.persisted.len(),
        unchanged = report.unchanged,
        "Reparsed services"
    );
    Ok(report)
}

/// Move one record as far as it goes.
///
/// Returns the last state reached; on failure that is the state the record
/// was in when the failing step started.
async fn advance(
    stores: &ReparseStores<'_>,
    parser: &dyn PayloadParser,
    user_name: &str,
    mut record: ServiceRecord,
    rules: &[MatchRule],
) -> (RecordState, Result<Option<ServiceRecord>, AppError>) {
    let Some(payload) = record.values_payload() else {
        return (RecordState::Unchanged, Ok(None));
    };

    let containers = match parser.parse(payload).and_then(|doc| parse_images_by_rules(&doc, rules)) {
        Ok(containers) => containers,
        Err(AppError::MalformedPayload(detail)) => {
            return (
                RecordState::Unchanged,
                Err(AppError::MalformedPayload(format!(
                    "failed to parse values.yaml for service {}: {detail}",
                    record.service_name
                ))),
            );
        }
        Err(e) => return (RecordState::Unchanged, Err(e)),
    };
    if containers.is_empty() {
        tracing::warn!(
            service = %record.service_name,
            product = %record.product_name,
            "No image matched the rules"
        );
    }
    record.containers = containers;
    record.create_by = user_name.to_string();
    record.create_time = Utc::now();
    record.status = None;

    let revision = match stores.counters.next_seq(&record.counter_key()).await {
        Ok(revision) => revision,
        Err(e) => return (RecordState::Parsed, Err(as_sequence_error(e, &record))),
    };
    record.revision = revision;

    // A copy left behind by an interrupted delete may hold this revision.
    if let Err(e) = stores
        .services
        .delete(
            &record.service_name,
            record.deploy_type,
            &record.product_name,
            Some(ServiceStatus::Deleting),
            revision,
        )
        .await
    {
        return (RecordState::Revisioned, Err(as_persistence_error(e)));
    }

    if let Err(e) = stores.services.create(&record).await {
        return (RecordState::Revisioned, Err(as_persistence_error(e)));
    }
    (RecordState::Persisted, Ok(Some(record)))
}

fn as_sequence_error(e: AppError, record: &ServiceRecord) -> AppError {
    match e {
        AppError::Sequence(_) => e,
        other => AppError::Sequence(format!(
            "failed to allocate revision for service {}: {other}",
            record.service_name
        )),
    }
}

fn as_persistence_error(e: AppError) -> AppError {
    match e {
        AppError::Persistence(_) => e,
        other => AppError::Persistence(other.to_string()),
    }
}

async fn rollback(services: &dyn ServiceStore, persisted: &[ServiceRecord]) {
    for record in persisted {
        if let Err(e) = services
            .delete(
                &record.service_name,
                record.deploy_type,
                &record.product_name,
                None,
                record.revision,
            )
            .await
        {
            tracing::warn!(
                service = %record.service_name,
                revision = record.revision,
                error = %e,
                "Failed to roll back service revision"
            );
        }
    }
}
