use crate::RpcError;

/// One step of a receive-half.
///
/// Every `recv` on a stream yields exactly one of these. `EndOfStream` and
/// `Failure` are terminal: once observed, the half keeps yielding the same
/// outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Item<T> {
    /// A payload, in send order.
    Message(T),
    /// The sender half-closed cleanly.
    EndOfStream,
    /// The stream ended with a failure; no more payloads will arrive.
    Failure(RpcError),
}

impl<T> Item<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Item::Message(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Item<U> {
        match self {
            Item::Message(v) => Item::Message(f(v)),
            Item::EndOfStream => Item::EndOfStream,
            Item::Failure(e) => Item::Failure(e),
        }
    }

    /// `Ok(Some(_))` for a message, `Ok(None)` at end-of-stream.
    pub fn into_result(self) -> Result<Option<T>, RpcError> {
        match self {
            Item::Message(v) => Ok(Some(v)),
            Item::EndOfStream => Ok(None),
            Item::Failure(e) => Err(e),
        }
    }
}

impl<T> From<Result<T, RpcError>> for Item<T> {
    fn from(value: Result<T, RpcError>) -> Self {
        match value {
            Ok(v) => Item::Message(v),
            Err(e) => Item::Failure(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_messages_are_non_terminal() {
        assert!(!Item::Message(1).is_terminal());
        assert!(Item::<i32>::EndOfStream.is_terminal());
        assert!(Item::<i32>::Failure(RpcError::cancelled()).is_terminal());
    }

    #[test]
    fn into_result_flattens_end_of_stream_to_none() {
        assert_eq!(Item::Message(7).into_result(), Ok(Some(7)));
        assert_eq!(Item::<i32>::EndOfStream.into_result(), Ok(None));
        assert_eq!(
            Item::<i32>::Failure(RpcError::cancelled()).into_result(),
            Err(RpcError::cancelled())
        );
    }
}
