/// Errors raised while constructing core components.
///
/// Creation failures are the only fatal class in the core: everything
/// recorded afterwards degrades to a counted no-op instead.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Creation {
    #[error("capacity must be greater than zero")]
    ZeroCapacity,
}

/// Errors raised on the metric accumulation path.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Insert {
    #[error("metric table full ({0} entries), sample dropped")]
    Overflow(usize),
    #[error("metric name must not be empty")]
    EmptyName,
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum Config {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Insert::Overflow(2000).to_string(),
            "metric table full (2000 entries), sample dropped"
        );
        assert_eq!(
            Creation::ZeroCapacity.to_string(),
            "capacity must be greater than zero"
        );
    }
}
