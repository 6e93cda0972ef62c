//! Handlers and typed clients for the calculator and greet services.

use std::time::Duration;

use ferry_session::{
    BidiCall, ClientStreamingCall, RegisterError, Router, Rx, ServerStreamingCall, SessionHandle,
    Tx, env_parse,
};
use ferry_types::RpcError;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::payload::{self, Average};
use crate::proto::*;

// ============================================================================
// Calculator
// ============================================================================

/// Router serving `calculator.CalculatorService`.
pub fn calculator_router() -> Result<Router, RegisterError> {
    let mut router = Router::new();
    router
        .unary(SUM, |req: SumRequest| async move {
            info!(first = req.first_number, second = req.second_number, "Sum invoked");
            let sum_result = payload::sum(req.first_number, req.second_number)?;
            Ok::<_, RpcError>(SumResponse { sum_result })
        })?
        .server_streaming(
            PRIME_NUMBER_DECOMPOSITION,
            |req: PrimeNumberDecompositionRequest,
             mut tx: Tx<PrimeNumberDecompositionResponse>| async move {
                info!(number = req.number, "PrimeNumberDecomposition invoked");
                for prime_factor in payload::prime_factors(req.number)? {
                    debug!(prime_factor, "sending factor");
                    tx.send(&PrimeNumberDecompositionResponse { prime_factor })
                        .await?;
                }
                Ok::<_, RpcError>(())
            },
        )?
        .client_streaming(
            COMPUTE_AVERAGE,
            |mut rx: Rx<ComputeAverageRequest>| async move {
                info!("ComputeAverage invoked");
                let mut average = Average::new();
                while let Some(req) = rx.recv().await.into_result()? {
                    average.add(req.number)?;
                }
                debug!(count = average.count(), "averaging");
                Ok::<_, RpcError>(ComputeAverageResponse {
                    average: average.result()?,
                })
            },
        )?;
    Ok(router)
}

/// Typed client for `calculator.CalculatorService`.
#[derive(Clone)]
pub struct CalculatorClient {
    session: SessionHandle,
}

impl CalculatorClient {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    pub async fn sum(&self, first_number: i32, second_number: i32) -> Result<i32, RpcError> {
        let request = SumRequest {
            first_number,
            second_number,
        };
        let response = self.session.unary(&SUM, &request).await?;
        Ok(response.sum_result)
    }

    /// The factors arrive one by one as the server finds them.
    pub async fn prime_number_decomposition(
        &self,
        number: i64,
    ) -> Result<ServerStreamingCall<PrimeNumberDecompositionResponse>, RpcError> {
        self.session
            .server_streaming(
                &PRIME_NUMBER_DECOMPOSITION,
                &PrimeNumberDecompositionRequest { number },
            )
            .await
    }

    pub async fn compute_average(
        &self,
    ) -> Result<ClientStreamingCall<ComputeAverageRequest, ComputeAverageResponse>, RpcError> {
        self.session.client_streaming(&COMPUTE_AVERAGE).await
    }

    /// Stream `numbers` and wait for their average.
    pub async fn average(&self, numbers: &[i32]) -> Result<f64, RpcError> {
        let mut call = self.compute_average().await?;
        for &number in numbers {
            call.send(&ComputeAverageRequest { number }).await?;
        }
        Ok(call.close_and_recv().await?.average)
    }
}

// ============================================================================
// Greet
// ============================================================================

/// Server-side tunables of the greet service.
#[derive(Debug, Clone)]
pub struct GreetConfig {
    /// Results sent by `GreetManyTimes`.
    pub many_times_count: u32,
    /// Pause between two `GreetManyTimes` results.
    pub many_times_interval: Duration,
}

impl Default for GreetConfig {
    fn default() -> Self {
        Self {
            many_times_count: 10,
            many_times_interval: Duration::from_secs(1),
        }
    }
}

impl GreetConfig {
    /// Defaults, with `FERRY_GREET_INTERVAL_MS` applied when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_parse("FERRY_GREET_INTERVAL_MS") {
            config.many_times_interval = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_many_times_interval(mut self, interval: Duration) -> Self {
        self.many_times_interval = interval;
        self
    }
}

/// Router serving `greet.GreetService`.
pub fn greet_router(config: GreetConfig) -> Result<Router, RegisterError> {
    let mut router = Router::new();
    router
        .unary(GREET, |req: GreetRequest| async move {
            info!(first_name = %req.greeting.first_name, "Greet invoked");
            let result = payload::greeting(&req.greeting.first_name)?;
            Ok::<_, RpcError>(GreetResponse { result })
        })?
        .server_streaming(
            GREET_MANY_TIMES,
            move |req: GreetRequest, mut tx: Tx<GreetResponse>| {
                let config = config.clone();
                async move {
                    info!(first_name = %req.greeting.first_name, "GreetManyTimes invoked");
                    for i in 0..config.many_times_count {
                        let result = payload::numbered_greeting(&req.greeting.first_name, i)?;
                        tx.send(&GreetResponse { result }).await?;
                        tokio::time::sleep(config.many_times_interval).await;
                    }
                    Ok::<_, RpcError>(())
                }
            },
        )?
        .client_streaming(LONG_GREET, |mut rx: Rx<GreetRequest>| async move {
            info!("LongGreet invoked");
            let mut result = String::new();
            while let Some(req) = rx.recv().await.into_result()? {
                result.push_str(&payload::exclaimed_greeting(&req.greeting.first_name)?);
            }
            Ok::<_, RpcError>(GreetResponse { result })
        })?
        .bidi(GREET_EVERYONE, |rx, tx| async move {
            info!("GreetEveryone invoked");
            greet_everyone(rx, tx).await
        })?;
    Ok(router)
}

/// Pulls requests and pushes greetings as two flows joined at the end.
///
/// A bad request stops the pull side; greetings already produced are still
/// pushed before the failure ends the stream.
async fn greet_everyone(
    mut rx: Rx<GreetRequest>,
    mut tx: Tx<GreetResponse>,
) -> Result<(), RpcError> {
    let (greetings_tx, mut greetings_rx) = mpsc::channel::<String>(16);

    let pull = async move {
        while let Some(req) = rx.recv().await.into_result()? {
            let greeting = payload::exclaimed_greeting(&req.greeting.first_name)?;
            if greetings_tx.send(greeting).await.is_err() {
                break;
            }
        }
        Ok::<_, RpcError>(())
    };
    let push = async move {
        while let Some(result) = greetings_rx.recv().await {
            tx.send(&GreetResponse { result }).await?;
        }
        Ok::<_, RpcError>(())
    };

    let (pulled, pushed) = tokio::join!(pull, push);
    pulled?;
    pushed
}

/// Typed client for `greet.GreetService`.
#[derive(Clone)]
pub struct GreetClient {
    session: SessionHandle,
}

impl GreetClient {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    pub async fn greet(&self, greeting: Greeting) -> Result<String, RpcError> {
        let response = self.session.unary(&GREET, &greeting.into()).await?;
        Ok(response.result)
    }

    pub async fn greet_many_times(
        &self,
        greeting: Greeting,
    ) -> Result<ServerStreamingCall<GreetResponse>, RpcError> {
        self.session
            .server_streaming(&GREET_MANY_TIMES, &greeting.into())
            .await
    }

    pub async fn long_greet(
        &self,
    ) -> Result<ClientStreamingCall<GreetRequest, GreetResponse>, RpcError> {
        self.session.client_streaming(&LONG_GREET).await
    }

    pub async fn greet_everyone(&self) -> Result<BidiCall<GreetRequest, GreetResponse>, RpcError> {
        self.session.bidi(&GREET_EVERYONE).await
    }
}
