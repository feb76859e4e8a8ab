mod aggregate;
mod db;
mod identity;
mod model;
mod pipeline;
mod settings;
mod sources;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use model::FacilityType;
use settings::Settings;
use sources::gesundheitskarte::GesundheitskarteAdapter;
use sources::kvwl::{HttpKvwlApi, KvwlAdapter};
use sources::{SourceAdapter, Throttle};

#[derive(Parser)]
#[command(name = "care_scraper", about = "Healthcare facility and doctor scraper")]
struct Cli {
    /// SQLite database path (overrides CARE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the KVWL doctor search and reconcile it into the database
    Kvwl,
    /// Scrape the Gelsenkirchen Gesundheitskarte and reconcile it into the database
    Gesundheitskarte,
    /// Run every source, one transaction each
    Run,
    /// Facility and doctor counts per source
    Stats,
    /// List doctors with their facility
    Doctors {
        /// Only this source namespace (e.g. "kvwl")
        #[arg(short, long)]
        source: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// List facilities
    Facilities {
        /// Only this source namespace
        #[arg(short, long)]
        source: Option<String>,
        /// Only this facility type (e.g. ARZTPRAXIS, KRANKENHAUS)
        #[arg(short = 't', long = "type")]
        facility_type: Option<FacilityType>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load()?;
    if let Some(path) = cli.db {
        settings.db_path = path;
    }

    let conn = db::wait_for_db(&settings.db_config())?;
    db::init_schema(&conn)?;

    let result = match cli.command {
        Commands::Kvwl => {
            let mut adapter = kvwl_adapter(&settings)?;
            scrape(&conn, &mut adapter).await
        }
        Commands::Gesundheitskarte => {
            let mut adapter = gesundheitskarte_adapter(&settings)?;
            scrape(&conn, &mut adapter).await
        }
        Commands::Run => {
            let mut kvwl = kvwl_adapter(&settings)?;
            scrape(&conn, &mut kvwl).await?;
            let mut karte = gesundheitskarte_adapter(&settings)?;
            scrape(&conn, &mut karte).await
        }
        Commands::Stats => {
            let rows = db::get_stats(&conn)?;
            if rows.is_empty() {
                println!("Database is empty. Run 'kvwl', 'gesundheitskarte' or 'run' first.");
                return Ok(());
            }
            println!("{:<32} | {:>10} | {:>8}", "Source", "Facilities", "Doctors");
            println!("{}", "-".repeat(56));
            for r in &rows {
                println!("{:<32} | {:>10} | {:>8}", r.source, r.facilities, r.doctors);
            }
            Ok(())
        }
        Commands::Doctors { source, limit } => {
            let rows = db::fetch_doctors(&conn, source.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No doctors found.");
                return Ok(());
            }

            println!(
                "{:>5} | {:<28} | {:<24} | {:>5} | {:<28} | {:<30} | {:<16}",
                "Id", "Doctor", "Specialty", "Fac", "Facility", "Address", "Phone"
            );
            println!("{}", "-".repeat(155));
            for r in &rows {
                let address = format!("{}, {} {}", r.street, r.postal_code, r.city);
                println!(
                    "{:>5} | {:<28} | {:<24} | {:>5} | {:<28} | {:<30} | {:<16}",
                    r.id,
                    truncate(&r.name, 28),
                    truncate(r.specialty.as_deref().unwrap_or("-"), 24),
                    r.facility_id,
                    truncate(&format!("{} ({})", r.facility_name, r.facility_type), 28),
                    truncate(&address, 30),
                    truncate(&r.phone, 16),
                );
            }
            println!("\n{} doctors", rows.len());
            Ok(())
        }
        Commands::Facilities {
            source,
            facility_type,
            limit,
        } => {
            let rows = db::fetch_facilities(&conn, source.as_deref(), facility_type, limit)?;
            if rows.is_empty() {
                println!("No facilities found.");
                return Ok(());
            }

            println!(
                "{:>5} | {:<14} | {:<32} | {:<24} | {:<30} | {:<19} | {:>3} | {:>4}",
                "Id", "Source", "Facility", "Type", "Address", "Coordinates", "♿", "Docs"
            );
            println!("{}", "-".repeat(152));
            for r in &rows {
                let address = format!("{}, {} {}", r.street, r.postal_code, r.city);
                let coords = match (r.latitude, r.longitude) {
                    (Some(lat), Some(lon)) => format!("{:.5},{:.5}", lat, lon),
                    _ => "-".into(),
                };
                let wheelchair = match r.wheelchair_accessible {
                    Some(true) => "yes",
                    Some(false) => "no",
                    None => "?",
                };
                println!(
                    "{:>5} | {:<14} | {:<32} | {:<24} | {:<30} | {:<19} | {:>3} | {:>4}",
                    r.id,
                    truncate(&r.source, 14),
                    truncate(&r.name, 32),
                    r.facility_type,
                    truncate(&address, 30),
                    coords,
                    wheelchair,
                    r.doctor_count
                );
            }
            println!("\n{} facilities (source: {})", rows.len(), source.as_deref().unwrap_or("all"));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn kvwl_adapter(settings: &Settings) -> anyhow::Result<KvwlAdapter<HttpKvwlApi>> {
    let client = sources::http_client(settings.request_timeout())?;
    let api = HttpKvwlApi::new(
        client,
        settings.kvwl_search_url.clone(),
        settings.kvwl_detail_url.clone(),
    );
    Ok(KvwlAdapter::new(
        api,
        settings.kvwl_latitude,
        settings.kvwl_longitude,
        settings.kvwl_page_size,
        Throttle::new(settings.request_delay()),
    ))
}

fn gesundheitskarte_adapter(settings: &Settings) -> anyhow::Result<GesundheitskarteAdapter> {
    let client = sources::http_client(settings.request_timeout())?;
    Ok(GesundheitskarteAdapter::new(
        client,
        settings.gesundheitskarte_url.clone(),
    ))
}

async fn scrape<A: SourceAdapter>(conn: &Connection, adapter: &mut A) -> anyhow::Result<()> {
    let summary = pipeline::run_source(conn, adapter).await?;
    summary.print();
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
