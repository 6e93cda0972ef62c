//! Request and response types, and the operations that carry them.

use ferry_types::{Bidirectional, ClientStreaming, Method, ServerStreaming, Unary};
use serde::{Deserialize, Serialize};

// ============================================================================
// calculator.CalculatorService
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumRequest {
    pub first_number: i32,
    pub second_number: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumResponse {
    pub sum_result: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimeNumberDecompositionRequest {
    pub number: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimeNumberDecompositionResponse {
    pub prime_factor: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeAverageRequest {
    pub number: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeAverageResponse {
    pub average: f64,
}

pub const SUM: Method<Unary, SumRequest, SumResponse> =
    Method::new("calculator.CalculatorService/Sum");

pub const PRIME_NUMBER_DECOMPOSITION: Method<
    ServerStreaming,
    PrimeNumberDecompositionRequest,
    PrimeNumberDecompositionResponse,
> = Method::new("calculator.CalculatorService/PrimeNumberDecomposition");

pub const COMPUTE_AVERAGE: Method<ClientStreaming, ComputeAverageRequest, ComputeAverageResponse> =
    Method::new("calculator.CalculatorService/ComputeAverage");

// ============================================================================
// greet.GreetService
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub first_name: String,
    pub last_name: String,
}

impl Greeting {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }
}

/// Every greet operation takes a greeting...
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetRequest {
    pub greeting: Greeting,
}

/// ...and answers with text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetResponse {
    pub result: String,
}

impl From<Greeting> for GreetRequest {
    fn from(greeting: Greeting) -> Self {
        Self { greeting }
    }
}

pub const GREET: Method<Unary, GreetRequest, GreetResponse> =
    Method::new("greet.GreetService/Greet");

pub const GREET_MANY_TIMES: Method<ServerStreaming, GreetRequest, GreetResponse> =
    Method::new("greet.GreetService/GreetManyTimes");

pub const LONG_GREET: Method<ClientStreaming, GreetRequest, GreetResponse> =
    Method::new("greet.GreetService/LongGreet");

pub const GREET_EVERYONE: Method<Bidirectional, GreetRequest, GreetResponse> =
    Method::new("greet.GreetService/GreetEveryone");
