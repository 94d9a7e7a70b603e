use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use photoloc_core::{
    ClipScorer, Coordinate, ImageSource, LandmarkMatcher, LandmarkResolver, LandmarkTable,
    LocationResult, Locator, NominatimClient, OverpassClient, RateLimiter, RetryPolicy,
    ReverseGeocoder,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "photoloc", about = "Estimate where a photo was taken")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: GPS metadata, then landmark recognition
    Locate {
        image: PathBuf,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Minimum landmark confidence (0-1)
        #[arg(long)]
        threshold: Option<f32>,
        /// Ranked landmark candidates to log
        #[arg(long)]
        top_k: Option<usize>,
    },
    #[command(flatten)]
    Tool(Tool),
}

/// Single-stage diagnostics.
#[derive(Subcommand)]
enum Tool {
    /// Show raw EXIF GPS tags and the normalized coordinate
    Gps { image: PathBuf },
    /// Rank landmark candidates for an image
    Landmark {
        image: PathBuf,
        /// Number of candidates to print
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Look up coordinates for a landmark name
    Resolve { name: String },
    /// Reverse-geocode a coordinate
    Reverse {
        #[arg(allow_hyphen_values = true)]
        lat: f64,
        #[arg(allow_hyphen_values = true)]
        lon: f64,
    },
    /// List the landmark table
    Landmarks,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    let outcome = runtime.block_on(run(cli.command, config));

    // A timed-out pipeline may still be blocked on the network; don't wait for it.
    runtime.shutdown_background();
    outcome
}

async fn run(command: Commands, mut config: Config) -> Result<()> {
    match command {
        Commands::Locate {
            image,
            json,
            timeout,
            threshold,
            top_k,
        } => {
            if let Some(t) = threshold {
                config.threshold = t;
            }
            if let Some(k) = top_k {
                config.top_k = k;
            }
            let result = run_bounded(timeout.map(Duration::from_secs), move || {
                let locator = build_locator(&config)?;
                Ok(locator.locate(ImageSource::Path(&image)))
            })
            .await?;
            print_location(&result, json);
            Ok(())
        }
        Commands::Tool(tool) => run_bounded(None, move || run_tool(tool, config)).await,
    }
}

/// Run blocking work on a worker thread, optionally bounded by `timeout`.
///
/// Blocking HTTP clients must be created inside `work`, never on a runtime
/// worker. A timed-out worker is abandoned, not joined.
async fn run_bounded<T, F>(timeout: Option<Duration>, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => bail!("location pipeline timed out after {limit:?}"),
        },
        None => task.await,
    };
    joined.context("pipeline worker panicked")?
}

fn run_tool(tool: Tool, config: Config) -> Result<()> {
    match tool {
        Tool::Gps { image } => {
            let Some(tags) = photoloc_core::extract_gps(ImageSource::Path(&image)) else {
                println!("No GPS metadata in {}", image.display());
                return Ok(());
            };
            for (tag, value) in &tags {
                println!("{tag}: {value:?}");
            }
            match photoloc_core::normalize(&tags) {
                Some(c) => println!("Coordinate: {c}"),
                None => println!("Coordinate: unusable"),
            }
        }
        Tool::Landmark { image, top_k } => {
            let table = load_table(&config)?;
            let scorer = ClipScorer::load_dir(&config.model_dir)?;
            let matcher = LandmarkMatcher::new(Box::new(scorer), &table).with_threshold(config.threshold);
            let img = image::open(&image)
                .with_context(|| format!("cannot decode {}", image.display()))?;
            let ranked = matcher.rank(&img)?;
            for (rank, m) in ranked.iter().take(top_k.unwrap_or(config.top_k)).enumerate() {
                println!("{:>2}. {:<32} {:.4}", rank + 1, m.name, m.score);
            }
            let best = ranked
                .iter()
                .find(|m| !m.score.is_nan())
                .filter(|m| m.score >= matcher.threshold());
            match best {
                Some(m) => println!("Match: {} ({:.3})", m.name, m.score),
                None => println!("No landmark above threshold {}", matcher.threshold()),
            }
        }
        Tool::Resolve { name } => {
            let resolver = build_resolver(&config, Arc::new(load_table(&config)?))?;
            match resolver.resolve(&name) {
                Ok(loc) => println!("{} ({})", loc.coordinate, loc.source),
                Err(e) => println!("{e}"),
            }
        }
        Tool::Reverse { lat, lon } => {
            let geocoder = build_geocoder(&config)?;
            let coordinate = Coordinate::new(lat, lon).unwrap_or(Coordinate {
                latitude: lat,
                longitude: lon,
            });
            println!("{}", geocoder.address(coordinate));
        }
        Tool::Landmarks => {
            let table = load_table(&config)?;
            for r in table.records() {
                println!(
                    "{:<28} {:<36} {:<16} {}",
                    r.name, r.display_name, r.region, r.coordinate
                );
            }
        }
    }
    Ok(())
}

fn load_table(config: &Config) -> Result<LandmarkTable> {
    let table = match &config.landmarks_path {
        Some(path) => LandmarkTable::load(path)?,
        None => LandmarkTable::embedded()?,
    };
    Ok(table)
}

fn build_resolver(config: &Config, table: Arc<LandmarkTable>) -> Result<LandmarkResolver> {
    let search = OverpassClient::new(&config.overpass_url, config.overpass_timeout, &config.user_agent)?;
    Ok(LandmarkResolver::new(table, Some(Box::new(search))))
}

fn build_geocoder(config: &Config) -> Result<ReverseGeocoder> {
    let backend = NominatimClient::new(&config.nominatim_url, &config.user_agent)?;
    Ok(ReverseGeocoder::new(
        Box::new(backend),
        Arc::new(RateLimiter::new(config.geocode_min_delay)),
    )
    .with_retry(RetryPolicy {
        attempts: config.geocode_attempts,
        backoff: config.geocode_backoff,
    })
    .with_language(&config.geocode_language)
    .with_timeout(config.geocode_timeout))
}

/// Load the model once; a missing model disables the landmark stage.
fn build_matcher(config: &Config, table: &LandmarkTable) -> Option<LandmarkMatcher> {
    match ClipScorer::load_dir(&config.model_dir) {
        Ok(scorer) => Some(
            LandmarkMatcher::new(Box::new(scorer), table)
                .with_threshold(config.threshold)
                .with_top_k(config.top_k),
        ),
        Err(e) => {
            tracing::warn!(
                dir = %config.model_dir.display(),
                error = %e,
                "landmark model unavailable; GPS metadata only"
            );
            None
        }
    }
}

fn build_locator(config: &Config) -> Result<Locator> {
    let table = Arc::new(load_table(config)?);
    let matcher = build_matcher(config, &table);
    let resolver = build_resolver(config, table.clone())?;
    let geocoder = build_geocoder(config)?;
    Ok(Locator::new(table, matcher, resolver, geocoder))
}

fn print_location(result: &LocationResult, json: bool) {
    if json {
        let value = serde_json::json!({
            "address": result.address,
            "method": result.method.to_string(),
            "coordinate": result.coordinate.map(|c| [c.latitude, c.longitude]),
            "landmark": result.landmark.as_ref().map(|m| serde_json::json!({
                "name": m.name,
                "score": m.score,
            })),
        });
        println!("{value}");
        return;
    }

    if let Some(m) = &result.landmark {
        println!("Landmark: {} ({:.3})", m.name, m.score);
    }
    if result.method.to_string().is_empty() {
        println!("Estimated location: {}", result.address);
    } else {
        println!("Estimated location: {} ({})", result.address, result.method);
    }
}
