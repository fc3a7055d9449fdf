use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Configuration is validated once, here; a missing signing secret stops
    // startup instead of failing per-request.
    let config = match campushub::config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return Err(anyhow::anyhow!(e));
        }
    };

    info!(
        target: "campushub",
        "CampusHub starting: http_port={}, issuer='{}', token_ttl_days={}, federated_login={}, production={}",
        config.http_port,
        config.token_issuer,
        config.token_ttl.num_days(),
        config.federated.is_some(),
        config.production
    );

    campushub::server::run(config).await
}
