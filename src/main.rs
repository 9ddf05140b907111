use std::sync::Arc;
use std::time::Duration;

use log::info;

mod api;
mod core;
mod cron;
mod database;
mod demo_data;
mod docs;
mod env;
mod error;
mod models;
mod payment;
mod request_state;
mod server;
mod token;

#[cfg(test)]
mod test_utils;

use crate::database::AppState;
use crate::env::Settings;
use crate::error::ServiceResult;
use crate::payment::RandomPaymentSimulator;
use crate::token::TokenIssuer;

#[tokio::main]
async fn main() {
    let result = init().await;

    let exit_code = match result {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn init() -> ServiceResult<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let tokens = TokenIssuer::new(
        env::TOKEN_SECRET.as_bytes(),
        chrono::Duration::days(*env::TOKEN_TTL_DAYS),
    );
    let payment = Arc::new(RandomPaymentSimulator::new(*env::PAYMENT_APPROVAL_RATE));

    let app_state = AppState::connect(
        env::DATABASE_URL.as_str(),
        payment,
        tokens,
        Settings::from_env(),
    )
    .await?;

    if *env::LOAD_DEMO_DATA {
        info!("Loading demo data");
        demo_data::load_demo_data(&app_state).await?;
    }

    cron::spawn_cleanup(
        app_state.clone(),
        Duration::from_secs(*env::CLEANUP_INTERVAL_SECONDS),
        cron::Retention::from_env(),
    );

    server::start_server(app_state).await
}
