//! Outbound mail.
//!
//! Every message carries its sender explicitly; there is no process-wide
//! "from" address.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::BaseNotifier;

/// A mailbox: display name plus address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub name: Option<String>,
    pub address: String,
}

impl Sender {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    pub fn address_only(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    /// Parse `Name <addr@host>` or a bare address.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match (s.rfind('<'), s.ends_with('>')) {
            (Some(open), true) => {
                let name = s[..open].trim().trim_matches('"');
                let address = s[open + 1..s.len() - 1].trim().to_string();
                Self {
                    name: (!name.is_empty()).then(|| name.to_string()),
                    address,
                }
            }
            _ => Self::address_only(s),
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub sender: Sender,
    pub recipients: Vec<Sender>,
    pub subject: String,
    pub body: String,
    pub reply_to: Option<Sender>,
}

impl Notification {
    /// RFC 822 message text, as handed to sendmail.
    pub fn to_message(&self) -> String {
        let to = self
            .recipients
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        let mut message = format!("From: {}\nTo: {}\n", self.sender, to);
        if let Some(reply_to) = &self.reply_to {
            message.push_str(&format!("Reply-To: {}\n", reply_to));
        }
        message.push_str(&format!(
            "Subject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}\n",
            self.subject, self.body
        ));
        message
    }
}

// =============================================================================
// Log-only notifier
// =============================================================================

/// Writes notifications to the log instead of sending them.
pub struct LogNotifier;

#[async_trait]
impl BaseNotifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let to: Vec<String> = notification.recipients.iter().map(ToString::to_string).collect();
        info!(
            from = %notification.sender,
            to = ?to,
            subject = %notification.subject,
            "notification (not sent)"
        );
        Ok(())
    }
}

// =============================================================================
// sendmail
// =============================================================================

/// Pipes each message to a local `sendmail -t`.
pub struct SendmailNotifier {
    sendmail: PathBuf,
}

impl SendmailNotifier {
    pub fn new(sendmail: impl Into<PathBuf>) -> Self {
        Self {
            sendmail: sendmail.into(),
        }
    }
}

#[async_trait]
impl BaseNotifier for SendmailNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let mut child = tokio::process::Command::new(&self.sendmail)
            .arg("-t")
            .arg("-oi")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", self.sendmail.display()))?;

        let mut stdin = child
            .stdin
            .take()
            .context("sendmail stdin was not captured")?;
        stdin
            .write_all(notification.to_message().as_bytes())
            .await
            .context("Failed to write message to sendmail")?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for sendmail")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("sendmail exited with {}: {}", output.status, stderr.trim());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_and_bare_addresses() {
        let named = Sender::parse("SRCF Control Panel <control@srcf.net>");
        assert_eq!(named.name.as_deref(), Some("SRCF Control Panel"));
        assert_eq!(named.address, "control@srcf.net");

        let bare = Sender::parse("sysadmins@srcf.net");
        assert_eq!(bare.name, None);
        assert_eq!(bare.to_string(), "sysadmins@srcf.net");
    }

    #[test]
    fn message_includes_headers_and_body() {
        let notification = Notification {
            sender: Sender::new("Control", "control@srcf.net"),
            recipients: vec![
                Sender::address_only("a@example.org"),
                Sender::new("B", "b@example.org"),
            ],
            subject: "Hello".to_string(),
            body: "line one\nline two".to_string(),
            reply_to: Some(Sender::address_only("sysadmins@srcf.net")),
        };

        let message = notification.to_message();
        assert!(message.starts_with("From: Control <control@srcf.net>\n"));
        assert!(message.contains("To: a@example.org, B <b@example.org>\n"));
        assert!(message.contains("Reply-To: sysadmins@srcf.net\n"));
        assert!(message.ends_with("\n\nline one\nline two\n"));
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let notification = Notification {
            sender: Sender::address_only("control@srcf.net"),
            recipients: vec![],
            subject: "s".to_string(),
            body: String::new(),
            reply_to: None,
        };
        assert!(LogNotifier.notify(&notification).await.is_ok());
    }
}
