use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

#[derive(Debug, Parser)]
#[command(name = "tourcat")]
#[command(about = "Tour catalog ingestion and scheduling")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP control surface.
    Serve,
    /// Full refresh of one city and print the counts.
    ///
    /// One-shot commands get their own in-memory catalog: without `--city` there are no
    /// known cities, and nothing is kept after the process exits. Use `serve` for a
    /// long-lived catalog.
    Scrape {
        #[arg(long)]
        city: Option<String>,
    },
    /// Register cities and run a first scrape for each new one, printing the outcome.
    ///
    /// Registrations and listings live only for the duration of this process.
    AddCities {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Fetch a single tour page and print it as JSON.
    SingleTour {
        city: String,
        slug: String,
    },
    /// Print the persisted scheduler settings.
    SchedulerStatus,
}

fn init_tracing() -> Result<()> {
    let default_level = std::env::var("TOURCAT_LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = Registry::default().with(filter).with(fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            tourcat_web::serve_from_env().await?;
        }
        Commands::Scrape { city } => {
            let service = tourcat_sync::service_from_env().await?;
            match service.run_scrape(city.as_deref()).await {
                Ok(ack) => println!("{}", ack.message),
                Err(failure) => return Err(failure.into()),
            }
        }
        Commands::AddCities { names } => {
            let service = tourcat_sync::service_from_env().await?;
            for name in &names {
                let outcome = service.scrape_new_city_once(name).await?;
                println!("{}", outcome.message);
            }
        }
        Commands::SingleTour { city, slug } => {
            let service = tourcat_sync::service_from_env().await?;
            let detail = service.scrape_single_tour(&city, &slug).await?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        Commands::SchedulerStatus => {
            let service = tourcat_sync::service_from_env().await?;
            let status = service.scheduler_status().await;
            println!(
                "scheduler: running={} enabled={} cron=`{}`",
                status.running, status.enabled, status.cron
            );
        }
    }

    Ok(())
}
