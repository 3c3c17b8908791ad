use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{info, warn};
use vpnsched_control::{PermissionGate, PermissionPrompt, PermissionRequest};

/// Asks the operator on the controlling terminal.
///
/// Requests are serialized so two questions never interleave on stdout.
#[derive(Default)]
pub struct TerminalPrompt {
    lock: Mutex<()>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionPrompt for TerminalPrompt {
    async fn request(&self, request: PermissionRequest) -> bool {
        let _turn = self.lock.lock().await;

        let question = match request.gate {
            PermissionGate::Api => "Allow vpnsched to use the VPN control API?",
            PermissionGate::Vpn => "Allow the VPN service to create tunnels?",
        };
        let mut stdout = tokio::io::stdout();
        let text = format!("{question} [request {}] [y/N] ", request.token);
        if stdout.write_all(text.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            warn!(gate = %request.gate, "cannot write permission prompt, treating as denied");
            return false;
        }

        let mut line = String::new();
        let granted = match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
            Ok(0) | Err(_) => false,
            Ok(_) => is_yes(&line),
        };
        info!(gate = %request.gate, granted, "operator answered permission prompt");
        granted
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_grants() {
        assert!(is_yes("y\n"));
        assert!(is_yes("  YES \r\n"));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
        assert!(!is_yes("yep"));
    }
}
