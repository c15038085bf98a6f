// SPDX-License-Identifier: MIT OR Apache-2.0
//! Small orchestration predicates.

/// Whether an incoming retry token re-triggers the current deployment.
///
/// The incoming token must *strictly* advance lexically. A missing incoming
/// token is never applicable; a first token against a token-less deployment
/// is.
#[must_use]
pub fn retry_applicable(current: Option<&str>, incoming: Option<&str>) -> bool {
    match (current, incoming) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(current), Some(incoming)) => incoming > current,
    }
}

#[cfg(test)]
mod tests {
    use super::retry_applicable;

    #[test]
    fn missing_incoming_token_is_never_applicable() {
        assert!(!retry_applicable(None, None));
        assert!(!retry_applicable(Some("t1"), None));
    }

    #[test]
    fn first_token_applies() {
        assert!(retry_applicable(None, Some("t1")));
    }

    #[test]
    fn token_must_strictly_advance() {
        assert!(retry_applicable(Some("t1"), Some("t2")));
        assert!(!retry_applicable(Some("t2"), Some("t2")));
        assert!(!retry_applicable(Some("t2"), Some("t1")));
    }
}
