use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use env_logger::Env;

use vidjob::client::{ApiClient, ClientError, Poller, RetryPolicy};
use vidjob::config::ClientConfig;
use vidjob::models::{artifact_filename, GenerationRequest};

const USAGE: &str = "usage: vidjob-client <prompt> [length_seconds] [fps]";

fn parse_arg(value: Option<&String>, default: i64) -> Result<i64, String> {
    match value {
        Some(raw) => raw.parse::<i64>().map_err(|_| format!("not a number: {raw}")),
        None => Ok(default),
    }
}

async fn run(config: &ClientConfig, request: GenerationRequest) -> Result<PathBuf, ClientError> {
    let client = ApiClient::new(&config.base_url);

    let handle = client.generate(&request).await?;
    println!("[{}] submitted, polling {}", handle.job_id, handle.status_url);

    let retry = RetryPolicy::backoff(3, Duration::from_millis(500), Duration::from_secs(5));
    let mut poller = Poller::new(client, config.poll_interval).with_retry(retry);

    poller
        .run(&handle.job_id, |view| {
            println!("[{}] {:?} {}%", view.job_id, view.status, view.progress)
        })
        .await?;

    let path = PathBuf::from(artifact_filename(&handle.job_id));
    let written = poller.source().download_to(&handle.job_id, &path).await?;
    println!("[{}] saved {} bytes to {}", handle.job_id, written, path.display());

    Ok(path)
}

#[actix_web::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(prompt) = args.first() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let request = match (parse_arg(args.get(1), 4), parse_arg(args.get(2), 8)) {
        (Ok(length), Ok(fps)) => GenerationRequest::new(prompt, length, fps),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("{e}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let config = ClientConfig::from_env();

    match run(&config, request).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
