use sheet_qa::app;
use sheet_qa::config::Config;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG may come from .env, so load it before the logger reads it
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = Config::from_env()?;

    // Optional bind address, e.g. `sheet_qa 0.0.0.0:8080`
    let args: Vec<String> = env::args().collect();
    if args.len() >= 2 {
        config.bind_addr = args[1].clone();
    }

    app::run(config).await
}
