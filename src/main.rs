use std::process;

use dispatch_cache::{config, error::AppError, infra::telemetry};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

mod demo;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Demo(config::DemoArgs::default()));

    telemetry::init(&settings.logging)?;
    info!(
        cache_enabled = settings.cache.enabled,
        store_capacity = settings.cache.store_capacity.get(),
        "Configuration loaded"
    );

    match command {
        config::Command::Demo(_) => demo::run(&settings).await,
    }
}
