#![deny(unsafe_code)]

//! Calculator and greeting services over ferry.
//!
//! One operation per stream shape in each service:
//!
//! | Shape | Calculator | Greet |
//! |-------|------------|-------|
//! | unary | `Sum` | `Greet` |
//! | server-streaming | `PrimeNumberDecomposition` | `GreetManyTimes` |
//! | client-streaming | `ComputeAverage` | `LongGreet` |
//! | bidirectional | | `GreetEveryone` |

pub mod cli;
pub mod payload;
pub mod proto;
mod service;

pub use service::{CalculatorClient, GreetClient, GreetConfig, calculator_router, greet_router};
