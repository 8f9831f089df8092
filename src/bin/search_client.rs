use search_jobs::{
    client::{
        http::HttpJobClient,
        poller::{ClientPoller, PollObserver, PollOutcome, PollerConfig},
    },
    models::{job::SearchInput, search::JobStatusResponse},
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Prints each status change to stdout.
struct ConsoleObserver {
    last_progress: Option<u8>,
}

impl PollObserver for ConsoleObserver {
    fn on_progress(&mut self, status: &JobStatusResponse) {
        if self.last_progress != Some(status.progress) {
            println!("{} {}%", status.status, status.progress);
            self.last_progress = Some(status.progress);
        }
    }

    fn on_error(&mut self, message: &str) {
        eprintln!("search failed: {message}");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: search-client <input.json>");
        std::process::exit(2);
    };

    dotenvy::dotenv().ok();
    let api_url =
        std::env::var("SEARCH_API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let raw = std::fs::read_to_string(&path).expect("Failed to read input file");
    let input: SearchInput = serde_json::from_str(&raw).expect("Input file is not a valid search");

    let client = HttpJobClient::new(&api_url).expect("Failed to build HTTP client");
    let poller = ClientPoller::new(Arc::new(client), PollerConfig::default());
    let mut observer = ConsoleObserver {
        last_progress: None,
    };

    match poller.run(&input, &mut observer).await {
        Ok(PollOutcome::Completed(status)) => {
            let results = status.results.unwrap_or(serde_json::Value::Null);
            match serde_json::to_string_pretty(&results) {
                Ok(pretty) => println!("{pretty}"),
                Err(_) => println!("{results}"),
            }
        }
        Ok(PollOutcome::Failed { .. }) => std::process::exit(1),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
