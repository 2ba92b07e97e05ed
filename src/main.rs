use env_logger::Env;

use vidjob::config::Config;
use vidjob::processor::{Simulator, Timeline};
use vidjob::store::JobStore;
use vidjob::web::start_web_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let store = JobStore::default();
    let simulator = Simulator::start(store, Timeline::from_delays(config.stage_delays));

    start_web_server(&config, simulator).await
}
