//! User-facing error classification.
//!
//! Raw exception text never reaches the status record; it is rewritten
//! into a short, classified explanation first. The recursion/iteration
//! class is checked before everything else because its raw messages often
//! also contain the word "limit".

use deepcurrent::error::Error;

/// Classify an error into `(error_type, user_message)`.
pub fn classify(error: &Error) -> (&'static str, String) {
    if error.is_iteration_limit() {
        return (
            "recursion",
            "Agent exceeded maximum iterations - research task too complex or requires more steps than allowed".to_string(),
        );
    }
    if error.is_cancelled() {
        return ("cancelled", "Research cancelled by user".to_string());
    }

    let text = error.to_string();
    let lower = text.to_lowercase();

    if lower.contains("recursion") || lower.contains("iteration") {
        return (
            "recursion",
            "Agent exceeded maximum iterations - research task too complex or requires more steps than allowed".to_string(),
        );
    }
    if error.is_timeout() || lower.contains("timeout") || lower.contains("timed out") {
        return (
            "timeout",
            "Request timeout - service took too long to respond".to_string(),
        );
    }
    if lower.contains("rate limit") || lower.contains("throttl") {
        return ("rate_limit", "Rate limit exceeded - too many requests".to_string());
    }
    if lower.contains("connection") || lower.contains("network") {
        return ("network", "Network connection error".to_string());
    }
    if lower.contains("401") || lower.contains("403") || lower.contains("unauthorized") {
        return ("auth", "Authentication failed - invalid credentials".to_string());
    }
    if lower.contains("404") || lower.contains("not found") {
        return ("not_found", "Resource not found".to_string());
    }
    if lower.contains("model") || lower.contains("bedrock") {
        return ("model", "AI model error - try a different model".to_string());
    }
    if lower.contains("token") || lower.contains("context length") {
        return ("token_limit", "Input too long for model".to_string());
    }
    if lower.contains("validation") || lower.contains("parse") || lower.contains("json") {
        return (
            "validation",
            "Invalid response format from AI".to_string(),
        );
    }
    if lower.contains("memory") {
        return ("memory", "Out of memory".to_string());
    }

    let prefix: String = text.chars().take(80).collect();
    ("unexpected", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_limit_classifies_as_recursion() {
        let (kind, msg) = classify(&Error::IterationLimit { iterations: 35 });
        assert_eq!(kind, "recursion");
        assert!(msg.contains("maximum iterations"));
    }

    #[test]
    fn timeout_wins_over_generic_text() {
        let (kind, _) = classify(&Error::timeout("gateway `tools/call` call"));
        assert_eq!(kind, "timeout");
    }

    #[test]
    fn auth_errors_are_rewritten() {
        let (kind, msg) = classify(&Error::tool("gateway error (403 Forbidden): denied"));
        assert_eq!(kind, "auth");
        assert!(!msg.contains("Forbidden"));
    }

    #[test]
    fn unknown_errors_keep_a_short_prefix() {
        let (kind, msg) = classify(&Error::other("x".repeat(300)));
        assert_eq!(kind, "unexpected");
        assert_eq!(msg.len(), 80);
    }
}
