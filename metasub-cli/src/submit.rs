//! Submission coordination
//!
//! Runs the three-phase protocol over a validated, reconciled batch:
//! 1. Submit - create or update every record, minting system accessions
//! 2. Translate - rewrite relationship targets from placeholder aliases to
//!    system accessions
//! 3. Link - reconcile the remote relationship graph against the batch
//!
//! Phase boundaries are strict across the whole batch: a record's
//! relationship target may be another record that only receives its system
//! accession late in phase 1. Failures after phase 1 starts are isolated
//! per record and per link call; nothing is ever rolled back.

use std::collections::{BTreeMap, BTreeSet};

use crate::api::{LinkBody, LinkDirection, MetaStore};
use crate::batch::{AccessionTranslationTable, Batch, Record, SubmissionOutcome};
use crate::catalog::{CategorySchema, SchemaCatalog, sheet_name};

/// One link call the store refused
#[derive(Debug, Clone)]
pub struct LinkFailure {
    pub category: String,
    pub accession: String,
    pub target: String,
    pub message: String,
}

impl std::fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {}: {}",
            self.category, self.accession, self.target, self.message
        )
    }
}

/// What happened over a whole run
#[derive(Debug, Default)]
pub struct RunReport {
    pub submitted: usize,
    pub updated: usize,
    /// Records the store refused, as "category user/system" strings
    pub submit_failures: Vec<String>,
    pub link_failures: Vec<LinkFailure>,
    /// Relationship targets left unresolved and skipped
    pub dropped_targets: usize,
    pub submission_id: Option<String>,
    pub submission_log_error: Option<String>,
}

impl RunReport {
    /// True when every store call of the run was accepted
    pub fn is_clean(&self) -> bool {
        self.submit_failures.is_empty()
            && self.link_failures.is_empty()
            && self.submission_log_error.is_none()
    }
}

/// Drives the three phases against the store
pub struct SubmissionCoordinator<'a> {
    store: &'a dyn MetaStore,
    catalog: &'a SchemaCatalog,
}

impl<'a> SubmissionCoordinator<'a> {
    pub fn new(store: &'a dyn MetaStore, catalog: &'a SchemaCatalog) -> Self {
        Self { store, catalog }
    }

    /// Run all three phases over the batch, then record the audit trail.
    pub async fn run(&self, batch: &mut Batch) -> RunReport {
        let mut report = RunReport::default();

        self.submit_phase(batch, &mut report).await;

        let table = AccessionTranslationTable::from_batch(batch);
        let rewritten = batch.rewrite_relationships(&table);
        log::info!(
            "translated {} relationship target(s) through {} known alias(es)",
            rewritten,
            table.len()
        );

        self.link_phase(batch, &mut report).await;
        self.record_submission(batch, &mut report).await;
        report
    }

    async fn submit_phase(&self, batch: &mut Batch, report: &mut RunReport) {
        for category_batch in &mut batch.categories {
            let Ok(schema) = self.catalog.schema_for(&category_batch.category) else {
                log::warn!("no schema for {}, skipping", category_batch.category);
                continue;
            };
            for record in &mut category_batch.records {
                self.submit_record(schema, record, report).await;
            }
        }
    }

    async fn submit_record(
        &self,
        schema: &CategorySchema,
        record: &mut Record,
        report: &mut RunReport,
    ) {
        let payload = record.payload();
        if record.system_accession.is_empty() {
            match self.store.create_record(&schema.collection, &payload).await {
                Ok(accession) => {
                    log::info!(
                        "record {} in {} created as {}",
                        record.user_accession,
                        schema.sheet_name,
                        accession
                    );
                    record.system_accession = accession;
                    record.mark(SubmissionOutcome::Submitted);
                    report.submitted += 1;
                }
                Err(e) => {
                    log::error!(
                        "create of {} in {} failed: {}",
                        record.accession_pair(),
                        schema.sheet_name,
                        e
                    );
                    record.mark(SubmissionOutcome::Failed);
                    report
                        .submit_failures
                        .push(format!("{} {}", schema.sheet_name, record.accession_pair()));
                }
            }
        } else {
            match self
                .store
                .update_record(&schema.collection, &record.system_accession, &payload)
                .await
            {
                Ok(()) => {
                    log::info!(
                        "record {} in {} updated",
                        record.system_accession,
                        schema.sheet_name
                    );
                    record.mark(SubmissionOutcome::Updated);
                    report.updated += 1;
                }
                Err(e) => {
                    log::error!(
                        "update of {} in {} failed: {}",
                        record.accession_pair(),
                        schema.sheet_name,
                        e
                    );
                    record.mark(SubmissionOutcome::Failed);
                    report
                        .submit_failures
                        .push(format!("{} {}", schema.sheet_name, record.accession_pair()));
                }
            }
        }
    }

    async fn link_phase(&self, batch: &Batch, report: &mut RunReport) {
        for category_batch in &batch.categories {
            let Ok(schema) = self.catalog.schema_for(&category_batch.category) else {
                continue;
            };
            for record in &category_batch.records {
                match record.outcome {
                    SubmissionOutcome::Submitted => {
                        self.link_new_record(schema, record, report).await;
                    }
                    SubmissionOutcome::Updated => {
                        self.link_updated_record(schema, record, report).await;
                    }
                    SubmissionOutcome::Unsubmitted | SubmissionOutcome::Failed => {}
                }
            }
        }
    }

    /// Freshly created records had no links before; add every resolved target.
    async fn link_new_record(
        &self,
        schema: &CategorySchema,
        record: &Record,
        report: &mut RunReport,
    ) {
        for (connection_name, targets_by_category) in &record.relationships {
            for (target_category, accessions) in targets_by_category {
                for accession in accessions {
                    if !self.target_resolved(target_category, accession) {
                        log::warn!(
                            "dropping unresolved target {} on {} {}",
                            accession,
                            schema.sheet_name,
                            record.system_accession
                        );
                        report.dropped_targets += 1;
                        continue;
                    }
                    self.change_link(
                        schema,
                        record,
                        target_category,
                        accession,
                        connection_name,
                        LinkDirection::Add,
                        report,
                    )
                    .await;
                }
            }
        }
    }

    /// Updated records are diffed against their remote relationship state;
    /// stale targets are removed before new ones are added.
    async fn link_updated_record(
        &self,
        schema: &CategorySchema,
        record: &Record,
        report: &mut RunReport,
    ) {
        if record.relationships.is_empty() {
            return;
        }
        let existing = match self
            .store
            .fetch_record(&schema.collection, &schema.category, &record.system_accession)
            .await
        {
            Ok(detail) => detail.relationships,
            Err(e) => {
                log::error!(
                    "cannot fetch relationship state of {} {}: {}",
                    schema.sheet_name,
                    record.system_accession,
                    e
                );
                report.link_failures.push(LinkFailure {
                    category: schema.sheet_name.clone(),
                    accession: record.system_accession.clone(),
                    target: "*".to_string(),
                    message: e.to_string(),
                });
                return;
            }
        };

        for (connection_name, targets_by_category) in &record.relationships {
            for (target_category, accessions) in targets_by_category {
                let mut wanted: BTreeSet<&str> = BTreeSet::new();
                for accession in accessions {
                    if self.target_resolved(target_category, accession) {
                        wanted.insert(accession.as_str());
                    } else {
                        log::warn!(
                            "dropping unresolved target {} on {} {}",
                            accession,
                            schema.sheet_name,
                            record.system_accession
                        );
                        report.dropped_targets += 1;
                    }
                }
                let current: BTreeSet<&str> = existing
                    .get(connection_name)
                    .and_then(|targets| targets.get(target_category))
                    .map(|accessions| accessions.iter().map(String::as_str).collect())
                    .unwrap_or_default();

                for stale in current.difference(&wanted) {
                    self.change_link(
                        schema,
                        record,
                        target_category,
                        stale,
                        connection_name,
                        LinkDirection::Remove,
                        report,
                    )
                    .await;
                }
                for fresh in wanted.difference(&current) {
                    self.change_link(
                        schema,
                        record,
                        target_category,
                        fresh,
                        connection_name,
                        LinkDirection::Add,
                        report,
                    )
                    .await;
                }
            }
        }
    }

    /// A target is resolved once it carries the system prefix of its category
    fn target_resolved(&self, target_category: &str, accession: &str) -> bool {
        let sheet = sheet_name(target_category);
        match self.catalog.schema_for(&sheet) {
            Ok(schema) => schema.is_system_shaped(accession),
            Err(_) => {
                log::warn!("link target category {} is not in the catalog", target_category);
                false
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn change_link(
        &self,
        schema: &CategorySchema,
        record: &Record,
        target_category: &str,
        target_accession: &str,
        connection_name: &str,
        direction: LinkDirection,
        report: &mut RunReport,
    ) {
        let body = LinkBody {
            connection_accession: target_accession.to_string(),
            connection_name: connection_name.to_string(),
        };
        match self
            .store
            .change_link(
                &schema.collection,
                &record.system_accession,
                target_category,
                direction,
                &body,
            )
            .await
        {
            Ok(()) => {
                log::info!(
                    "{} {} {} {} on {}",
                    schema.sheet_name,
                    record.system_accession,
                    direction,
                    target_accession,
                    connection_name
                );
            }
            Err(e) => {
                log::error!(
                    "failed to {} {} on {} {}: {}",
                    direction,
                    target_accession,
                    schema.sheet_name,
                    record.system_accession,
                    e
                );
                report.link_failures.push(LinkFailure {
                    category: schema.sheet_name.clone(),
                    accession: record.system_accession.clone(),
                    target: target_accession.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Record the audit trail: category -> accessions persisted this run.
    async fn record_submission(&self, batch: &Batch, report: &mut RunReport) {
        let mut details: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for category_batch in &batch.categories {
            let Ok(schema) = self.catalog.schema_for(&category_batch.category) else {
                continue;
            };
            let accessions: Vec<String> = category_batch
                .records
                .iter()
                .filter(|r| {
                    matches!(
                        r.outcome,
                        SubmissionOutcome::Submitted | SubmissionOutcome::Updated
                    )
                })
                .map(|r| r.system_accession.clone())
                .collect();
            if !accessions.is_empty() {
                details.insert(schema.category.clone(), accessions);
            }
        }
        if details.is_empty() {
            return;
        }

        let update_only = report.submitted == 0;
        match self.store.save_submission(&details, update_only).await {
            Ok(submission_id) => {
                log::info!("submission saved as {}", submission_id);
                report.submission_id = Some(submission_id);
            }
            Err(e) => {
                log::error!("failed to save the submission log: {}", e);
                report.submission_log_error = Some(e.to_string());
            }
        }
    }
}
