//! Best-effort classification of failures from the tool's stderr.
//!
//! The cluster tool has no structured error channel: the only signals are the
//! exit status and the diagnostic text. Every pattern we rely on lives in the
//! tables below so they can be updated as the tool's wording changes without
//! touching call sites. Bump [`PATTERNS_VERSION`] whenever a table changes.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::FailureKind;

pub const PATTERNS_VERSION: u32 = 2;

/// Ordered: the first matching rule wins.
const FAILURE_RULES: &[(FailureKind, &str)] = &[
    (FailureKind::Conflict, r"(?i)\(Conflict\)"),
    (FailureKind::Conflict, r"(?i)the object has been modified"),
    (
        FailureKind::Conflict,
        r"(?i)please apply your changes to the latest version",
    ),
    (FailureKind::AlreadyExists, r"(?i)\(AlreadyExists\)"),
    (FailureKind::AlreadyExists, r"(?i)\balready exists\b"),
    (FailureKind::NotFound, r"(?i)\(NotFound\)"),
    (FailureKind::NotFound, r#"(?im)"[^"\n]*" not found\s*$"#),
    (
        FailureKind::NotFound,
        r"(?i)the server doesn't have a resource type",
    ),
];

/// ssh reports its own failures with exit status 255. Without any stdout the
/// remote tool never ran; with stdout one of these messages must be present.
const SSH_TRANSPORT_STATUS: i32 = 255;
const TRANSPORT_RULES: &[&str] = &[
    r"^ssh: ",
    r"(?i)connection refused",
    r"(?i)connection timed out",
    r"(?i)connection closed by",
    r"(?i)could not resolve hostname",
    r"(?i)no route to host",
    r"(?i)host key verification failed",
    r"(?i)permission denied \(",
    r"(?i)connection reset by",
    r"(?i)kex_exchange_identification",
];

/// POSIX shell statuses for a command that could not be executed.
const SHELL_NOT_EXECUTABLE: i32 = 126;
const SHELL_NOT_FOUND: i32 = 127;

static COMPILED_FAILURES: LazyLock<Vec<(FailureKind, Regex)>> = LazyLock::new(|| {
    FAILURE_RULES
        .iter()
        .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (*kind, re)))
        .collect()
});

static COMPILED_TRANSPORT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    TRANSPORT_RULES
        .iter()
        .filter_map(|pattern| Regex::new(&format!("(?m){pattern}")).ok())
        .collect()
});

/// Classify a failed invocation's stderr. Unrecognized text is `Generic`.
pub fn classify(stderr: &str) -> FailureKind {
    COMPILED_FAILURES
        .iter()
        .find(|(_, re)| re.is_match(stderr))
        .map_or(FailureKind::Generic, |(kind, _)| *kind)
}

/// True when an ssh-wrapped invocation failed before reaching the remote tool.
pub fn is_transport_failure(status: i32, stdout: &[u8], stderr: &str) -> bool {
    status == SSH_TRANSPORT_STATUS
        && (stdout.is_empty() || COMPILED_TRANSPORT.iter().any(|re| re.is_match(stderr)))
}

/// Why the remote shell could not start the tool, if it reported so.
pub fn remote_launch_failure(status: i32) -> Option<std::io::ErrorKind> {
    match status {
        SHELL_NOT_FOUND => Some(std::io::ErrorKind::NotFound),
        SHELL_NOT_EXECUTABLE => Some(std::io::ErrorKind::PermissionDenied),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile() {
        assert_eq!(COMPILED_FAILURES.len(), FAILURE_RULES.len());
        assert_eq!(COMPILED_TRANSPORT.len(), TRANSPORT_RULES.len());
    }

    #[test]
    fn classifies_conflict_on_replace() {
        let stderr = "Error from server (Conflict): error when replacing \"STDIN\": \
                      Operation cannot be fulfilled on configmaps \"cfg\": the object has been \
                      modified; please apply your changes to the latest version and try again";
        assert_eq!(classify(stderr), FailureKind::Conflict);
    }

    #[test]
    fn classifies_not_found() {
        assert_eq!(
            classify("Error from server (NotFound): pods \"web-0\" not found"),
            FailureKind::NotFound
        );
        assert_eq!(
            classify("error: the server doesn't have a resource type \"widgets\""),
            FailureKind::NotFound
        );
    }

    #[test]
    fn classifies_already_exists() {
        assert_eq!(
            classify("Error from server (AlreadyExists): configmaps \"cfg\" already exists"),
            FailureKind::AlreadyExists
        );
    }

    #[test]
    fn conflict_wins_over_not_found_wording() {
        // A conflict message that also mentions something not being found.
        let stderr = "Error from server (Conflict): field not found in latest version";
        assert_eq!(classify(stderr), FailureKind::Conflict);
    }

    #[test]
    fn unknown_text_is_generic() {
        assert_eq!(
            classify("error: You must be logged in to the server (Unauthorized)"),
            FailureKind::Generic
        );
        assert_eq!(classify(""), FailureKind::Generic);
    }

    #[test]
    fn shell_messages_are_not_resource_absence() {
        assert_eq!(
            classify("bash: line 1: kubectl: command not found"),
            FailureKind::Generic
        );
        assert_eq!(
            classify("error: plugin \"widgets\" not found in path"),
            FailureKind::Generic
        );
        assert_eq!(
            classify("Error from server (NotFound): namespaces \"ghost\" not found\n"),
            FailureKind::NotFound
        );
        assert_eq!(
            classify("error: configmaps \"cfg\" not found"),
            FailureKind::NotFound
        );
    }

    #[test]
    fn transport_failures_need_ssh_status() {
        let stderr = "ssh: connect to host bastion port 22: Connection refused\n";
        assert!(is_transport_failure(255, b"", stderr));
        assert!(!is_transport_failure(1, b"", stderr));
        assert!(is_transport_failure(255, b"partial", stderr));
        assert!(!is_transport_failure(255, b"{}", "Error from server (NotFound): x not found"));
    }

    #[test]
    fn unlisted_ssh_failure_without_output_is_transport() {
        assert!(is_transport_failure(
            255,
            b"",
            "kex_exchange_identification: read: Connection reset by peer\r\n"
        ));
        assert!(is_transport_failure(255, b"", "something new from ssh"));
    }

    #[test]
    fn shell_exec_statuses_map_to_launch_kinds() {
        assert_eq!(remote_launch_failure(127), Some(std::io::ErrorKind::NotFound));
        assert_eq!(
            remote_launch_failure(126),
            Some(std::io::ErrorKind::PermissionDenied)
        );
        assert_eq!(remote_launch_failure(1), None);
    }
}
