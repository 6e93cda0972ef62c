//! Exercises the four greet operations.

use std::process::ExitCode;
use std::time::Duration;

use ferry_calc::proto::{GreetRequest, Greeting};
use ferry_calc::{GreetClient, cli};
use ferry_session::SessionConfig;
use futures::StreamExt;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    cli::init_tracing();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "greet client failed");
            ExitCode::FAILURE
        }
    }
}

fn people() -> Vec<Greeting> {
    vec![
        Greeting::new("Stephane", "Maillard"),
        Greeting::new("Lucy", "Maillard"),
        Greeting::new("John", "Doe"),
        Greeting::new("Mark", "Doe"),
        Greeting::new("Liam", "Doe"),
    ]
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let addr = cli::server_addr();
    let (session, driver) = ferry_stream::connect(addr.as_str(), SessionConfig::from_env()).await?;
    info!(%addr, "greet client connected");
    let client = GreetClient::new(session.clone());

    info!("starting a unary call");
    let result = client.greet(Greeting::new("John", "Doe")).await?;
    info!(%result, "response from Greet");

    info!("starting a server streaming call");
    let many = client
        .greet_many_times(Greeting::new("John", "Doe"))
        .await?
        .into_stream();
    let mut many = std::pin::pin!(many);
    while let Some(response) = many.next().await {
        info!(result = %response?.result, "response from GreetManyTimes");
    }

    info!("starting a client streaming call");
    let pace = cli::pace(Duration::from_millis(100));
    let mut long = client.long_greet().await?;
    for greeting in people() {
        info!(first_name = %greeting.first_name, "sending request");
        long.send(&greeting.into()).await?;
        tokio::time::sleep(pace).await;
    }
    let response = long.close_and_recv().await?;
    info!(result = %response.result, "response from LongGreet");

    info!("starting a bidirectional call");
    let pace = cli::pace(Duration::from_secs(1));
    let requests = futures::stream::iter(people()).then(move |greeting| async move {
        info!(first_name = %greeting.first_name, "sending message");
        tokio::time::sleep(pace).await;
        GreetRequest::from(greeting)
    });
    client
        .greet_everyone()
        .await?
        .run(requests, |response| {
            info!(result = %response.result, "response from GreetEveryone");
        })
        .await?;

    session.close("done");
    driver.await??;
    Ok(())
}
