//! Origin-host tag written with every centrally replicated row.

use sysinfo::System;

/// `hostname_username`, stable for the lifetime of the process.
pub fn host_identifier() -> String {
    let host = System::host_name().unwrap_or_else(|| "unknown-host".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());
    format_identifier(&host, &user)
}

fn format_identifier(host: &str, user: &str) -> String {
    format!("{}_{}", host.trim(), user.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_joins_host_and_user() {
        assert_eq!(format_identifier("devbox ", "alice"), "devbox_alice");
    }

    #[test]
    fn identifier_is_never_empty() {
        assert!(host_identifier().contains('_'));
    }
}
