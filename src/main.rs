use std::fmt::Debug;
use std::fmt::Display;

use lead_intake::configuration::get_configuration;
use lead_intake::rate_limit::init_sweeper;
use lead_intake::startup::Application;
use lead_intake::telemetry::get_subscriber;
use lead_intake::telemetry::init_subscriber;
use tokio::task::JoinError;

fn report_exit(
    name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{name} exited gracefully")
        }

        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain=?e,
                error.message=%e,
                "{name} failed (inner)"
            )
        }

        Err(e) => {
            tracing::error!(
                error.cause_chain=?e,
                error.message=%e,
                "{name} failed (outer)"
            )
        }
    }
}

/// Initialise telemetry, load config, and start the server next to the rate
/// limit sweeper
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("lead-intake", "info", std::io::stdout);
    init_subscriber(subscriber)?;

    let cfg = get_configuration()?;
    let sweep_interval = cfg.rate_limit.sweep_interval();

    let app = Application::build(cfg).await?;
    tracing::info!(port = app.get_port(), "listening");
    let sweeper = init_sweeper(app.rate_limiter(), sweep_interval);

    // each branch on its own thread, so a slow sweep never stalls requests
    let server_thread = tokio::spawn(app.run_until_stopped());
    let sweeper_thread = tokio::spawn(sweeper);

    // returns when the first branch completes, cancelling the other
    tokio::select! {
        o = server_thread => { report_exit("API", o) },
        o = sweeper_thread => { report_exit("Rate limit sweeper", o) },
    }

    Ok(())
}
