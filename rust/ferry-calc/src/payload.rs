//! The computations behind the services. No IO, no streams.

use ferry_types::RpcError;

/// `a + b`, refusing to wrap.
pub fn sum(a: i32, b: i32) -> Result<i32, RpcError> {
    a.checked_add(b)
        .ok_or_else(|| RpcError::out_of_range(format!("{a} + {b} does not fit in 32 bits")))
}

/// Prime factors of `n` in ascending order, with multiplicity.
///
/// `1` has no prime factors. Zero and negative numbers are rejected.
pub fn prime_factors(n: i64) -> Result<PrimeFactors, RpcError> {
    if n <= 0 {
        return Err(RpcError::invalid_argument(format!(
            "cannot decompose {n}: expected a positive number"
        )));
    }
    Ok(PrimeFactors {
        remaining: n,
        divisor: 2,
    })
}

/// Trial division: divide out the smallest divisor while it divides, then
/// move to the next one.
#[derive(Debug, Clone)]
pub struct PrimeFactors {
    remaining: i64,
    divisor: i64,
}

impl Iterator for PrimeFactors {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        while self.remaining > 1 {
            // Past the square root, what remains is itself prime.
            if self.divisor > self.remaining / self.divisor {
                let last = self.remaining;
                self.remaining = 1;
                return Some(last);
            }
            if self.remaining % self.divisor == 0 {
                self.remaining /= self.divisor;
                return Some(self.divisor);
            }
            self.divisor += 1;
        }
        None
    }
}

/// Running mean over a sequence of integers.
#[derive(Debug, Clone, Default)]
pub struct Average {
    sum: i64,
    count: u64,
}

impl Average {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `n` in. Fails only if the running sum leaves `i64`.
    pub fn add(&mut self, n: i32) -> Result<(), RpcError> {
        self.sum = self
            .sum
            .checked_add(i64::from(n))
            .ok_or_else(|| RpcError::out_of_range("running sum does not fit in 64 bits"))?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// `sum / count`. An empty sequence has no average.
    pub fn result(&self) -> Result<f64, RpcError> {
        if self.count == 0 {
            return Err(RpcError::invalid_argument("cannot average an empty sequence"));
        }
        Ok(self.sum as f64 / self.count as f64)
    }
}

fn require_first_name(first_name: &str) -> Result<&str, RpcError> {
    if first_name.trim().is_empty() {
        return Err(RpcError::invalid_argument("first name must not be empty"));
    }
    Ok(first_name)
}

/// `"Hello {first_name}"`.
pub fn greeting(first_name: &str) -> Result<String, RpcError> {
    Ok(format!("Hello {}", require_first_name(first_name)?))
}

/// The `index`-th greeting of a repeated series.
pub fn numbered_greeting(first_name: &str, index: u32) -> Result<String, RpcError> {
    Ok(format!("Hello {} number {index}", require_first_name(first_name)?))
}

/// One greeting in a concatenated or echoed series, trailing space included.
pub fn exclaimed_greeting(first_name: &str) -> Result<String, RpcError> {
    Ok(format!("Hello {}! ", require_first_name(first_name)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_types::ErrorCode;

    fn factors(n: i64) -> Vec<i64> {
        prime_factors(n).unwrap().collect()
    }

    #[test]
    fn sum_adds_and_refuses_overflow() {
        assert_eq!(sum(5, 40).unwrap(), 45);
        assert_eq!(sum(-3, 3).unwrap(), 0);
        assert_eq!(sum(i32::MAX, 1).unwrap_err().code, ErrorCode::OutOfRange);
        assert_eq!(sum(i32::MIN, -1).unwrap_err().code, ErrorCode::OutOfRange);
    }

    #[test]
    fn factors_are_ascending_with_multiplicity() {
        assert_eq!(factors(8), vec![2, 2, 2]);
        assert_eq!(factors(13), vec![13]);
        assert_eq!(factors(1), Vec::<i64>::new());
        assert_eq!(factors(120), vec![2, 2, 2, 3, 5]);
        assert_eq!(factors(210), vec![2, 3, 5, 7]);
    }

    #[test]
    fn factors_multiply_back() {
        for n in [2, 97, 1024, 360_360, 1_242_421_421, 9_999_999_967] {
            let fs = factors(n);
            assert_eq!(fs.iter().product::<i64>(), n);
            assert!(fs.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn non_positive_numbers_are_rejected() {
        for n in [0, -1, i64::MIN] {
            let err = prime_factors(n).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidArgument);
        }
    }

    #[test]
    fn average_of_a_sequence() {
        let mut avg = Average::new();
        for n in [1, 2, 3, 4, 5] {
            avg.add(n).unwrap();
        }
        assert_eq!(avg.count(), 5);
        assert_eq!(avg.result().unwrap(), 3.0);

        let mut avg = Average::new();
        avg.add(1).unwrap();
        avg.add(2).unwrap();
        assert_eq!(avg.result().unwrap(), 1.5);
    }

    #[test]
    fn average_does_not_overflow_on_extremes() {
        let mut avg = Average::new();
        avg.add(i32::MAX).unwrap();
        avg.add(i32::MAX).unwrap();
        assert_eq!(avg.result().unwrap(), f64::from(i32::MAX));
    }

    #[test]
    fn running_sum_overflow_is_out_of_range() {
        let mut avg = Average {
            sum: i64::MAX - 1,
            count: 1,
        };
        assert_eq!(avg.add(5).unwrap_err().code, ErrorCode::OutOfRange);
        assert_eq!(avg.count(), 1);

        let mut avg = Average {
            sum: i64::MIN + 1,
            count: 1,
        };
        assert_eq!(avg.add(-5).unwrap_err().code, ErrorCode::OutOfRange);
        avg.add(1).unwrap();
        assert_eq!(avg.count(), 2);
    }

    #[test]
    fn empty_average_is_rejected() {
        let err = Average::new().result().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(err.message, "cannot average an empty sequence");
    }

    #[test]
    fn greetings() {
        assert_eq!(greeting("John").unwrap(), "Hello John");
        assert_eq!(numbered_greeting("John", 3).unwrap(), "Hello John number 3");
        assert_eq!(exclaimed_greeting("Lucy").unwrap(), "Hello Lucy! ");
        assert_eq!(
            greeting("  ").unwrap_err().code,
            ErrorCode::InvalidArgument
        );
    }
}
