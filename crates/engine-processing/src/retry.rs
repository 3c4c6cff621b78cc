use engine_core::{
    error::{StoreError, TransportError},
    retry::RetryDisposition,
};

pub fn classify_transport_error(err: &TransportError) -> RetryDisposition {
    match err {
        TransportError::Timeout | TransportError::Unreachable(_) => RetryDisposition::Retry,
        TransportError::Throttled { wait } => RetryDisposition::WaitThenRetry(*wait),
        TransportError::NotFound(_) => RetryDisposition::Stop,
        TransportError::Permanent(_) => RetryDisposition::Stop,
    }
}

/// Only storage-engine I/O is worth repeating; a record that fails to
/// decode or does not exist will not change on retry.
pub fn classify_store_error(err: &StoreError) -> RetryDisposition {
    match err {
        StoreError::Sled(_) => RetryDisposition::Retry,
        StoreError::Codec(_) | StoreError::NotFound(_) | StoreError::AlreadyExists(_) => {
            RetryDisposition::Stop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn throttle_carries_its_wait() {
        let wait = Duration::from_secs(1250);
        assert_eq!(
            classify_transport_error(&TransportError::Throttled { wait }),
            RetryDisposition::WaitThenRetry(wait)
        );
    }

    #[test]
    fn rejected_content_is_not_retried() {
        assert_eq!(
            classify_transport_error(&TransportError::Permanent("chat write forbidden".into())),
            RetryDisposition::Stop
        );
        assert_eq!(
            classify_transport_error(&TransportError::Timeout),
            RetryDisposition::Retry
        );
    }

    #[test]
    fn missing_task_is_not_retried() {
        assert_eq!(
            classify_store_error(&StoreError::NotFound("task-1".into())),
            RetryDisposition::Stop
        );
    }
}
