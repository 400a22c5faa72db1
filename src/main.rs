use aybase::{config::Config, database, error::Result, routes, server::Server, state::AppState, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    let logs = telemetry::LogBuffer::new();
    telemetry::init(logs.clone());

    let pool = database::connect(&config.database).await?;
    database::migrate(&pool).await?;

    let state = AppState::build(config, pool, logs).await?;
    let app = routes::build(state.clone());

    Server::new(state).serve(app).await
}
