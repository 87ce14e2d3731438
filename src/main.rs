//! Pulseboard demo CLI
//!
//! Stands in for the dashboard layer: seeds an in-memory facility, runs the
//! reporting pipeline, and prints or saves the exports.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use pulseboard::{
    export_features, export_raw, CapacityConfig, DomainEvent, MemoryCensus, MemoryStore,
    PatientRecord, PatientStatus, Reporting, ReportingPolicy,
};

#[derive(Parser)]
#[command(name = "pulseboard", about = "Facility operations reporting core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Facility to operate on.
    #[arg(long, default_value = "demo-hospital")]
    facility: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed a demo census, backfill the slot series, and print a summary.
    Backfill,
    /// Seed a demo census and print the raw CSV export to stdout.
    ExportRaw,
    /// Seed a demo census and print the ML feature CSV export to stdout.
    ExportFeatures,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = Arc::new(MemoryStore::new());
    let census = Arc::new(MemoryCensus::new());
    seed_demo_census(&census, &cli.facility);
    let reporting = Reporting::new(store, census, ReportingPolicy::from_env());

    reporting
        .start(&cli.facility)
        .await
        .context("failed to start facility scheduling")?;
    reporting.notify(DomainEvent::PatientAdmitted { facility_id: cli.facility.clone() });

    let today = Local::now().date_naive();
    match cli.command {
        Commands::Backfill => {
            let outcome = reporting.run_backfill(&cli.facility).await?;
            info!(
                synthesized = outcome.synthesized,
                adopted = outcome.adopted,
                current = %outcome.current_slot,
                "backfill complete"
            );
            for report in reporting.series(&cli.facility).await? {
                println!(
                    "{}  occupied={:<3} util={:.2} risk={:.2} auto_filled={}",
                    report.slot_id,
                    report.occupied_beds,
                    report.bed_utilization,
                    report.risk_score,
                    report.auto_filled
                );
            }
        }
        Commands::ExportRaw => {
            let export = export_raw(&reporting, &cli.facility, today).await?;
            info!(filename = %export.filename, "raw export ready");
            print!("{}", export.payload);
        }
        Commands::ExportFeatures => {
            let export = export_features(&reporting, &cli.facility, today).await?;
            info!(filename = %export.filename, "feature export ready");
            print!("{}", export.payload);
        }
    }

    reporting.shutdown().await;
    Ok(())
}

fn seed_demo_census(census: &MemoryCensus, facility_id: &str) {
    census.set_capacity(
        facility_id,
        CapacityConfig {
            total_beds: 120,
            icu_beds: 16,
            emergency_threshold: 20,
            oxygen_units: 40,
            ventilators: 12,
        },
    );
    let today = Local::now().date_naive();
    let cases = [
        ("Amara Osei", PatientStatus::Admitted, "Influenza A (flu)", false),
        ("Jonas Berg", PatientStatus::Critical, "Severe dengue", true),
        ("Mei Lin", PatientStatus::Admitted, "COVID-19, moderate", false),
        ("Ravi Patel", PatientStatus::Pending, "Observation", false),
        ("Sofia Marques", PatientStatus::Admitted, "Dengue fever", false),
    ];
    for (name, status, diagnosis, needs_icu) in cases {
        census.admit(PatientRecord {
            id: Uuid::new_v4(),
            facility_id: facility_id.to_string(),
            name: name.to_string(),
            admission_date: today,
            discharge_date: None,
            status,
            diagnosis: diagnosis.to_string(),
            needs_icu,
        });
    }
}
