//! Submit command handler
//!
//! Orchestration only: read the workbook, validate everything, reconcile
//! identities, then hand the batch to the submission coordinator. No store
//! write happens unless the whole workbook validates.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::*;

use crate::api::{HttpMetaStore, MetaStore};
use crate::catalog::SchemaCatalog;
use crate::config::Config;
use crate::identity;
use crate::sheet;
use crate::submit::{RunReport, SubmissionCoordinator};
use crate::validate;

#[derive(Args)]
pub struct SubmitArgs {
    /// The workbook (.xlsx) holding the records to submit
    #[arg(short = 'x', long)]
    pub excel: PathBuf,

    /// API token identifying the submitting user
    #[arg(short = 'k', long = "token")]
    pub token: String,

    /// Write to the production store; without it records go to the test
    /// store and new user accessions are replaced by fresh placeholders
    #[arg(short = 'n', long)]
    pub production: bool,

    /// Override the metadata service base URL
    #[arg(long)]
    pub meta_url: Option<String>,

    /// Override the submission service base URL
    #[arg(long)]
    pub submit_url: Option<String>,
}

pub async fn handle_submit(args: SubmitArgs) -> Result<()> {
    if !args.excel.exists() {
        bail!("workbook does not exist: {}", args.excel.display());
    }

    let config = Config::resolve(
        args.token,
        args.production,
        args.meta_url,
        args.submit_url,
    )?;
    if config.dry_run() {
        println!(
            "{}",
            "Submitting to the test store; rerun with --production once this passes.".yellow()
        );
    }

    let store = HttpMetaStore::new(&config)?;
    let catalog = SchemaCatalog::fetch(&store)
        .await
        .context("Failed to fetch the store schema")?;
    log::info!("store schema version {}", catalog.version());

    let sheets = sheet::read_workbook(&args.excel, &catalog)?;
    if sheets.is_empty() {
        bail!("no recognized category worksheet in {}", args.excel.display());
    }

    let mut batch = match validate::audit_workbook(&catalog, &sheets) {
        Ok(batch) => batch,
        Err(report) => {
            for issue in &report.issues {
                eprintln!("{} {}", "invalid".red().bold(), issue);
            }
            bail!(
                "{} validation issue(s); nothing was submitted",
                report.issues.len()
            );
        }
    };

    let username = store
        .fetch_username()
        .await
        .context("Failed to resolve the API token to a user")?;
    log::info!("submitting as {}", username);

    let mut conflicted = Vec::new();
    for category_batch in &mut batch.categories {
        let schema = catalog.schema_for(&category_batch.category)?;
        let existing: Vec<_> = store
            .list_records(&schema.collection)
            .await
            .with_context(|| format!("Failed to list existing {}", schema.collection))?
            .into_iter()
            .filter(|record| record.user == username)
            .collect();

        if let Err(e) = identity::reconcile(
            schema,
            &mut category_batch.records,
            &existing,
            config.dry_run(),
        ) {
            log::error!("{}", e);
            conflicted.push(category_batch.category.clone());
        }
    }
    for category in &conflicted {
        eprintln!(
            "{} identity conflict in {}; the whole category is withheld",
            "conflict".red().bold(),
            category
        );
        batch.remove_category(category);
    }

    if batch.is_empty() {
        bail!("no submittable record left after identity reconciliation");
    }

    let coordinator = SubmissionCoordinator::new(&store, &catalog);
    let report = coordinator.run(&mut batch).await;
    print_report(&report);

    if !conflicted.is_empty() {
        bail!("{} category(ies) withheld on identity conflicts", conflicted.len());
    }
    if !report.is_clean() {
        bail!(
            "{} submit failure(s), {} link failure(s)",
            report.submit_failures.len(),
            report.link_failures.len()
        );
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "{} created, {} updated",
        report.submitted.to_string().green().bold(),
        report.updated.to_string().green()
    );
    for failure in &report.submit_failures {
        println!("{} {}", "failed".red().bold(), failure);
    }
    for failure in &report.link_failures {
        println!("{} {}", "link failed".red().bold(), failure);
    }
    if report.dropped_targets > 0 {
        println!(
            "{} {} relationship target(s) stayed unresolved and were skipped",
            "note".yellow(),
            report.dropped_targets
        );
    }
    if let Some(id) = &report.submission_id {
        println!("Submission recorded as {}", id.cyan());
    }
}
