//! Calls each calculator operation once.

use std::process::ExitCode;

use ferry_calc::{CalculatorClient, cli};
use ferry_session::SessionConfig;
use ferry_types::Item;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    cli::init_tracing();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "calculator client failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let addr = cli::server_addr();
    let (session, driver) = ferry_stream::connect(addr.as_str(), SessionConfig::from_env()).await?;
    info!(%addr, "calculator client connected");
    let client = CalculatorClient::new(session.clone());

    let sum = client.sum(5, 40).await?;
    info!(sum, "response from Sum");

    let mut factors = client.prime_number_decomposition(1_242_421_421).await?;
    loop {
        match factors.recv().await {
            Item::Message(response) => {
                info!(prime_factor = response.prime_factor, "response from PrimeNumberDecomposition");
            }
            Item::EndOfStream => break,
            Item::Failure(e) => return Err(e.into()),
        }
    }

    let average = client.average(&[1, 2, 3, 4, 5]).await?;
    info!(average, "response from ComputeAverage");

    session.close("done");
    driver.await??;
    Ok(())
}
