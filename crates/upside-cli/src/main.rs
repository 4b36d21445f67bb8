use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use upside_collectors::{ManualProperty, SourceRecord};
use upside_ingest::{maybe_build_scheduler, AppConfig, IngestRequest, Orchestrator};
use upside_storage::Db;
use upside_web::AppState;

#[derive(Debug, Parser)]
#[command(name = "upside-cli")]
#[command(about = "Retail property upside finder")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply the database schema and exit.
    Migrate,
    /// Run the JSON API server (and the cron scheduler when enabled).
    Serve,
    /// Run one ingestion job synchronously and print its summary.
    Scrape {
        #[arg(long, default_value = "all")]
        source: String,
        #[arg(long)]
        location: Option<String>,
        #[arg(long, default_value_t = 25.0)]
        radius: f64,
    },
    /// Insert a small sample data set for local development.
    Seed,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => {
            let db = Db::connect(&config.database_url).await?;
            db.migrate().await?;
            println!("schema ready");
            db.close().await;
        }
        Commands::Serve => {
            let db = Db::connect(&config.database_url).await?;
            db.migrate().await?;
            let orchestrator = Arc::new(Orchestrator::from_env_config(db.clone(), &config).await?);

            if let Some(sched) = maybe_build_scheduler(&orchestrator, &config).await? {
                sched.start().await?;
                info!("cron scheduler started");
            }

            upside_web::serve(AppState::new(db, orchestrator), config.web_port).await?;
        }
        Commands::Scrape {
            source,
            location,
            radius,
        } => {
            let db = Db::connect(&config.database_url).await?;
            db.migrate().await?;
            let orchestrator = Orchestrator::from_env_config(db.clone(), &config).await?;

            let outcome = orchestrator
                .run_job(IngestRequest {
                    source,
                    location,
                    coords: None,
                    radius_miles: radius,
                })
                .await?;
            println!(
                "scrape complete: job={} status={} source={} location={} found={} added={}",
                outcome.job_id,
                outcome.status.as_str(),
                outcome.source,
                outcome.location,
                outcome.found,
                outcome.added
            );
            db.close().await;
        }
        Commands::Seed => {
            let db = Db::connect(&config.database_url).await?;
            db.migrate().await?;
            let orchestrator = Orchestrator::from_env_config(db.clone(), &config).await?;

            let mut added = 0;
            for sample in sample_properties() {
                let Some(draft) = orchestrator
                    .normalizer()
                    .normalize(SourceRecord::Manual(sample))
                else {
                    continue;
                };
                let score = draft.upside_score();
                db.upsert_property(&draft, score).await?;
                added += 1;
            }
            println!("seeded {added} properties");
            db.close().await;
        }
    }

    Ok(())
}

fn sample_properties() -> Vec<ManualProperty> {
    vec![
        ManualProperty {
            external_id: Some("seed-gateway-plaza".to_string()),
            name: "Gateway Plaza".to_string(),
            address: "4250 Commerce Blvd".to_string(),
            city: "Denver".to_string(),
            state: "CO".to_string(),
            zip: "80216".to_string(),
            latitude: Some(39.7817),
            longitude: Some(-104.9745),
            price: Some(4_500_000.0),
            sqft: Some(42_000),
            vacancy_rate: Some(22.0),
            cap_rate: Some(7.8),
            property_type: Some("strip-center".to_string()),
            year_built: Some(1998),
            tenant_count: Some(11),
            source: Some("seed".to_string()),
            ..Default::default()
        },
        ManualProperty {
            external_id: Some("seed-sunrise-shops".to_string()),
            name: "Sunrise Shops".to_string(),
            address: "910 Retail Way".to_string(),
            city: "Aurora".to_string(),
            state: "CO".to_string(),
            zip: "80012".to_string(),
            latitude: Some(39.7080),
            longitude: Some(-104.8319),
            price: Some(2_100_000.0),
            sqft: Some(18_500),
            vacancy_rate: Some(8.0),
            cap_rate: Some(6.4),
            property_type: Some("strip-center".to_string()),
            year_built: Some(2004),
            tenant_count: Some(7),
            source: Some("seed".to_string()),
            ..Default::default()
        },
        ManualProperty {
            external_id: Some("seed-heritage-square".to_string()),
            name: "Heritage Square".to_string(),
            address: "55 Heritage Pkwy".to_string(),
            city: "Lakewood".to_string(),
            state: "CO".to_string(),
            zip: "80226".to_string(),
            latitude: Some(39.7110),
            longitude: Some(-105.0810),
            price: Some(7_900_000.0),
            sqft: Some(96_000),
            vacancy_rate: Some(35.0),
            cap_rate: Some(8.6),
            property_type: Some("mall".to_string()),
            year_built: Some(1987),
            tenant_count: Some(24),
            source: Some("seed".to_string()),
            ..Default::default()
        },
        ManualProperty {
            external_id: Some("seed-standalone-market".to_string()),
            name: "Colfax Market".to_string(),
            address: "7200 E Colfax Ave".to_string(),
            city: "Denver".to_string(),
            state: "CO".to_string(),
            zip: "80220".to_string(),
            latitude: Some(39.7400),
            longitude: Some(-104.9030),
            price: Some(1_250_000.0),
            sqft: Some(9_800),
            vacancy_rate: None,
            cap_rate: Some(7.1),
            property_type: Some("standalone".to_string()),
            year_built: Some(1962),
            tenant_count: Some(1),
            source: Some("seed".to_string()),
            ..Default::default()
        },
    ]
}
