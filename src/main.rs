use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};

use classifieds::config::Config;
use classifieds::errors::ClassifiedsError;
use classifieds::logging;
use classifieds::scoring::ScoreAggregator;
use classifieds::search::SearchRequest;
use classifieds::service::{Actor, ClassifiedsService};
use classifieds::store::{open_store, CreateCategory};

#[derive(Parser)]
#[command(name = "classifieds", version, about = "Classified-ads search and popularity scoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Skip automatic database migration on startup (PostgreSQL only)
    #[arg(long)]
    skip_migrate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations and exit
    Migrate,
    /// Fuzzy-search categories by name and description
    SearchCategories {
        /// Free-text query; omit to list every category
        query: Option<String>,
        /// 1-indexed page number
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Fuzzy-search active advertisements by title, description and category
    SearchAds {
        /// Free-text query; omit to list every active advertisement
        query: Option<String>,
        /// 1-indexed page number
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// List categories, one page at a time
    ListCategories {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Create a category
    CreateCategory {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// User id recorded as the actor
        #[arg(long, default_value = "cli")]
        user: String,
    },
}

/// Wrap a service result in the JSON envelope printed on stdout.
fn envelope<T: Serialize>(result: Result<T, ClassifiedsError>) -> Result<(Value, bool)> {
    Ok(match result {
        Ok(data) => (json!({ "status": "ok", "data": serde_json::to_value(data)? }), true),
        Err(e) => {
            let mut body = json!({
                "status": "error",
                "error": e.code(),
                "message": e.to_string(),
            });
            if let ClassifiedsError::InvalidInput { field: Some(field), .. } = &e {
                body["field"] = json!(field);
            }
            (body, false)
        }
    })
}

fn search_request(query: Option<String>, page: u32) -> SearchRequest {
    SearchRequest {
        query: query.map(Value::String),
        page_no: Some(Value::from(page)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });

    // 3. Initialize logging (stderr; stdout carries JSON results)
    logging::init_logging(&config);

    let run_migrations = matches!(cli.command, Commands::Migrate) || !cli.skip_migrate;
    let store = open_store(
        &config.database_url,
        ScoreAggregator::new(&config.engine),
        run_migrations,
    )
    .await?;

    if let Commands::Migrate = cli.command {
        println!("Migrations completed successfully.");
        return Ok(());
    }

    let service = ClassifiedsService::new(store, &config.engine);

    let (output, ok) = match cli.command {
        Commands::Migrate => return Ok(()),
        Commands::SearchCategories { query, page } => {
            envelope(service.search_categories(&search_request(query, page)).await)?
        }
        Commands::SearchAds { query, page } => {
            envelope(service.search_advertisements(&search_request(query, page)).await)?
        }
        Commands::ListCategories { page } => envelope(service.list_categories(page).await)?,
        Commands::CreateCategory { name, description, user } => envelope(
            service
                .create_category(&Actor::user(user), CreateCategory { name, description })
                .await,
        )?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
