use payflow_core::observability::logging::init_logging;
use payflow_service::{Application, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    init_logging(&config.service_name, "info");

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
