//! Serves the calculator and greet services until Ctrl-C.

use std::process::ExitCode;

use ferry_calc::{GreetConfig, calculator_router, cli, greet_router};
use ferry_stream::{Server, ServerConfig};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    cli::init_tracing();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut router = calculator_router()?;
    router.merge(greet_router(GreetConfig::from_env())?)?;

    let server = Server::new(router, ServerConfig::from_env());
    let listener = server.bind().await?;
    server
        .serve_with_shutdown(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    info!("server stopped");
    Ok(())
}
