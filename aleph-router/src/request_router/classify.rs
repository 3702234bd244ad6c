/// Substrings marking a collaborator failure as transient, matched case-insensitively.
///
/// This is a heuristic over free-form error output. Failures it misses are reported to the
/// caller immediately instead of being retried on another endpoint.
pub const TRANSIENT_ERROR_MARKERS: &[&str] = &[
    "Cannot connect",
    "ClientConnectorError",
    "TimeoutError",
    "ConnectionResetError",
    "Connection refused",
    "timed out",
    "Service Unavailable",
    "BroadcastError",
    "Unexpected HTTP response",
];

const KEY_ERROR_MARKERS: &[&str] = &[
    "BroadcastError",
    "Unexpected HTTP response",
    "Service Unavailable",
];
const BOX_DRAWING_PREFIXES: &[char] = &['┌', '│', '└'];

/// Whether a failed call is worth retrying against another endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient, endpoint-related: try the next endpoint.
    Network,
    /// Anything another endpoint cannot fix, e.g. bad arguments.
    NonNetwork,
}

// A standalone `5xx` word, e.g. `"status 503"` but not `"item 5031"`.
fn mentions_server_error_status(text: &str) -> bool {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|word| {
            word.len() == 3 && word.starts_with('5') && word.bytes().all(|b| b.is_ascii_digit())
        })
}

/// Classifies the error output of a failed call.
///
/// Empty output counts as [`FailureClass::Network`]: a collaborator that died silently most
/// likely never reached its endpoint.
pub fn classify(error_text: &str) -> FailureClass {
    if error_text.trim().is_empty() {
        return FailureClass::Network;
    }
    let lowered = error_text.to_lowercase();
    let marked = TRANSIENT_ERROR_MARKERS
        .iter()
        .any(|marker| lowered.contains(&marker.to_lowercase()));
    if marked || mentions_server_error_status(error_text) {
        FailureClass::Network
    } else {
        FailureClass::NonNetwork
    }
}

/// Reduces verbose collaborator output to the one line worth logging.
pub fn shorten_error(error_text: &str) -> &str {
    let lines: Vec<&str> = error_text
        .lines()
        .filter(|line| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with(BOX_DRAWING_PREFIXES)
        })
        .collect();
    lines
        .iter()
        .find(|line| KEY_ERROR_MARKERS.iter().any(|marker| line.contains(marker)))
        .or_else(|| lines.iter().find(|line| line.contains("Traceback")))
        .or_else(|| lines.first())
        .copied()
        .unwrap_or(error_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_output_is_network() {
        assert_eq!(classify(""), FailureClass::Network);
        assert_eq!(classify("  \n"), FailureClass::Network);
    }

    #[test]
    fn markers_are_network_regardless_of_case() {
        for text in [
            "aiohttp.ClientConnectorError: Cannot connect to host 10.0.0.1:4024",
            "asyncio.exceptions.TimeoutError",
            "error: connection refused (os error 111)",
            "request TIMED OUT after 30s",
            "BroadcastError: message rejected",
            "503 Service Unavailable",
            "service unavailable",
        ] {
            assert_eq!(classify(text), FailureClass::Network, "{text}");
        }
    }

    #[test]
    fn server_error_status_is_network() {
        assert_eq!(classify("HTTP status 502 from gateway"), FailureClass::Network);
        assert_eq!(classify("status=599"), FailureClass::Network);
        // Not standalone.
        assert_eq!(classify("item 5021 not found"), FailureClass::NonNetwork);
        assert_eq!(classify("HTTP status 404"), FailureClass::NonNetwork);
    }

    #[test]
    fn other_failures_are_not_network() {
        assert_eq!(classify("Error: insufficient balance"), FailureClass::NonNetwork);
        assert_eq!(
            classify("Usage: aleph [OPTIONS] COMMAND\nTry 'aleph --help'"),
            FailureClass::NonNetwork
        );
    }

    #[test]
    fn shorten_prefers_key_lines() {
        let text = "┌──────────┐\n│ Error    │\n└──────────┘\nTraceback (most recent call last):\n  File \"x.py\"\naleph.BroadcastError: rejected\n";
        assert_eq!(shorten_error(text), "aleph.BroadcastError: rejected");
    }

    #[test]
    fn shorten_falls_back_to_traceback_then_first_line() {
        let text = "\nwarning: something\nTraceback (most recent call last):\n  File \"x.py\"\n";
        assert_eq!(shorten_error(text), "Traceback (most recent call last):");
        assert_eq!(shorten_error("first\nsecond"), "first");
        assert_eq!(shorten_error(""), "");
        assert_eq!(shorten_error("│ only box\n"), "│ only box\n");
    }
}
