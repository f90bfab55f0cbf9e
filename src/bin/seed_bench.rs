/// Seed-and-search benchmark.
///
/// Fills a store with synthetic categories, then times repeated category
/// searches against it. Defaults to a private in-memory SQLite database.

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

use classifieds::config::EngineConfig;
use classifieds::scoring::ScoreAggregator;
use classifieds::search::SearchRequest;
use classifieds::service::{Actor, ClassifiedsService};
use classifieds::store::{open_store, CreateCategory};
use classifieds::ClassifiedsError;

const WORDS: &[&str] = &[
    "vintage", "electric", "garden", "kitchen", "outdoor", "leather", "vinyl", "mountain", "road",
    "acoustic", "digital", "antique", "office", "kids", "pet", "camping", "gaming", "studio",
    "marine", "classic", "wooden", "smart", "travel", "winter", "summer", "home", "audio", "photo",
    "craft", "sports",
];

const NOUNS: &[&str] = &[
    "furniture", "bikes", "guitars", "cameras", "tools", "books", "shoes", "lamps", "records",
    "toys", "tents", "consoles", "boats", "watches", "jackets", "speakers", "rugs", "plants",
];

#[derive(Parser)]
#[command(name = "seed-bench", about = "Seed synthetic categories and time fuzzy searches")]
struct Cli {
    /// Number of categories to seed
    #[arg(long, default_value_t = 1024)]
    count: usize,

    /// Number of timed searches
    #[arg(long, default_value_t = 50)]
    searches: usize,

    /// Database URL (default: private in-memory SQLite)
    #[arg(long, env = "CLASSIFIEDS_DATABASE_URL", default_value = "sqlite::memory:")]
    database_url: String,

    /// Seed for the synthetic name generator
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Small deterministic generator so runs are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[(self.next() as usize) % items.len()]
    }
}

fn synthetic_category(rng: &mut Lcg, index: usize) -> CreateCategory {
    let name = format!("{} {} {} {}", rng.pick(WORDS), rng.pick(WORDS), rng.pick(NOUNS), index);
    let description = format!(
        "Second-hand {} and {} {} from local sellers.",
        rng.pick(NOUNS),
        rng.pick(WORDS),
        rng.pick(NOUNS)
    );
    CreateCategory {
        name,
        description: Some(description),
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let engine = EngineConfig::default();
    let store = open_store(&cli.database_url, ScoreAggregator::new(&engine), true).await?;
    let service = ClassifiedsService::new(store, &engine);
    let actor = Actor::staff("seed-bench");
    let mut rng = Lcg(cli.seed);

    let pb = ProgressBar::new(cli.count as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("seeding [{bar:40}] {pos}/{len} [{elapsed_precise} / {eta_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let seed_start = Instant::now();
    let mut skipped = 0usize;
    for i in 0..cli.count {
        match service.create_category(&actor, synthetic_category(&mut rng, i)).await {
            Ok(_) => {}
            // Re-running against a persistent database hits existing names
            Err(ClassifiedsError::Conflict { .. }) => skipped += 1,
            Err(e) => return Err(e.into()),
        }
        pb.inc(1);
    }
    pb.finish_with_message("seeded");
    let seed_elapsed = seed_start.elapsed();

    let pb = ProgressBar::new(cli.searches as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("searching [{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut timings: Vec<Duration> = Vec::with_capacity(cli.searches);
    let mut matched = 0usize;
    for _ in 0..cli.searches {
        let query = format!("{} {}", rng.pick(WORDS), rng.pick(NOUNS));
        pb.set_message(query.clone());
        let start = Instant::now();
        match service.search_categories(&SearchRequest::new(query)).await {
            Ok(page) => matched += page.total,
            Err(ClassifiedsError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        timings.push(start.elapsed());
        pb.inc(1);
    }
    pb.finish_with_message("done");

    timings.sort();
    let total: Duration = timings.iter().sum();
    let percentile = |p: f64| -> Duration {
        if timings.is_empty() {
            return Duration::ZERO;
        }
        let idx = ((timings.len() - 1) as f64 * p).round() as usize;
        timings[idx]
    };

    let runs = timings.len().max(1) as f64;
    let report = serde_json::json!({
        "seeded": cli.count - skipped,
        "skipped_existing": skipped,
        "seed_ms": seed_elapsed.as_millis() as u64,
        "searches": timings.len(),
        "avg_matches": matched as f64 / runs,
        "mean_ms": total.as_secs_f64() * 1000.0 / runs,
        "p50_ms": percentile(0.50).as_secs_f64() * 1000.0,
        "p95_ms": percentile(0.95).as_secs_f64() * 1000.0,
        "max_ms": percentile(1.0).as_secs_f64() * 1000.0,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
