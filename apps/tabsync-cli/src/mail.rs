//! Mail delivery over a trusted SMTP relay.
//!
//! The relay is assumed to accept plain submissions from this host (the
//! usual datacenter null-client setup); there is no TLS and no AUTH.
//! Delivery is fire-and-forget: failures are logged and never fatal to a
//! run.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use tabsync_engine::{Mailer, OutboundMail};

use crate::config::MailConfig;

/// Mailer speaking plain SMTP to the configured relay.
pub struct SmtpRelayMailer {
    config: MailConfig,
    recipients: Vec<String>,
}

impl SmtpRelayMailer {
    /// Mailer using the config's default recipient list.
    pub fn new(config: MailConfig) -> Self {
        let recipients = config.to.clone();
        Self { config, recipients }
    }

    /// Mailer with an overridden recipient list (offboarding notices).
    pub fn with_recipients(config: MailConfig, recipients: Vec<String>) -> Self {
        Self { config, recipients }
    }

    async fn try_send(&self, mail: &OutboundMail) -> std::io::Result<()> {
        let addr = (self.config.relay_host.as_str(), self.config.relay_port);
        let stream = TcpStream::connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        expect_reply(&mut reader, 220).await?;
        send_line(&mut write_half, "EHLO tabsync").await?;
        expect_reply(&mut reader, 250).await?;
        send_line(&mut write_half, &format!("MAIL FROM:<{}>", self.config.from)).await?;
        expect_reply(&mut reader, 250).await?;
        for rcpt in &self.recipients {
            send_line(&mut write_half, &format!("RCPT TO:<{rcpt}>")).await?;
            expect_reply(&mut reader, 250).await?;
        }
        send_line(&mut write_half, "DATA").await?;
        expect_reply(&mut reader, 354).await?;

        let body = render_message(&self.config.from, &self.recipients, mail);
        write_half.write_all(body.as_bytes()).await?;
        send_line(&mut write_half, ".").await?;
        expect_reply(&mut reader, 250).await?;
        send_line(&mut write_half, "QUIT").await?;

        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpRelayMailer {
    async fn send(&self, mail: &OutboundMail) {
        info!(
            subject = %mail.subject,
            recipients = ?self.recipients,
            "Sending mail"
        );
        if let Err(e) = self.try_send(mail).await {
            error!(error = %e, subject = %mail.subject, "Failed to send mail");
        }
    }
}

/// Mailer that only logs; used in dry-run mode or when no mail relay is
/// configured.
pub struct LogOnlyMailer;

#[async_trait]
impl Mailer for LogOnlyMailer {
    async fn send(&self, mail: &OutboundMail) {
        info!(subject = %mail.subject, "Mail not sent (no relay configured or dry run)");
        info!(body = %mail.text_body, "Mail body");
    }
}

fn render_message(from: &str, recipients: &[String], mail: &OutboundMail) -> String {
    let content_type = if mail.html_body.is_some() {
        "text/html; charset=utf-8"
    } else {
        "text/plain; charset=utf-8"
    };
    let body = mail.html_body.as_deref().unwrap_or(&mail.text_body);
    let mut message = format!(
        "From: {from}\r\nTo: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: {content_type}\r\n\r\n",
        recipients.join(", "),
        mail.subject
    );
    // Dot-stuffing per RFC 5321: a leading '.' would end the DATA section.
    for line in body.lines() {
        if line.starts_with('.') {
            message.push('.');
        }
        message.push_str(line);
        message.push_str("\r\n");
    }
    message
}

async fn send_line<W: AsyncWriteExt + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    debug!(line = %line, "smtp >");
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await
}

/// Read one (possibly multi-line) SMTP reply and check its code.
async fn expect_reply<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    expected: u16,
) -> std::io::Result<()> {
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "relay closed the connection",
            ));
        }
        debug!(line = %line.trim_end(), "smtp <");
        let code: u16 = line.get(..3).and_then(|c| c.parse().ok()).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("malformed SMTP reply: {line}"),
            )
        })?;
        // "250-" marks a continuation line; "250 " ends the reply.
        if line.as_bytes().get(3) == Some(&b'-') {
            continue;
        }
        if code != expected {
            return Err(std::io::Error::other(format!(
                "relay answered {code}, expected {expected}: {}",
                line.trim_end()
            )));
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(html: Option<&str>) -> OutboundMail {
        OutboundMail {
            subject: "subject".into(),
            text_body: "line one\n.starts with dot".into(),
            html_body: html.map(String::from),
        }
    }

    #[test]
    fn plain_message_headers() {
        let msg = render_message("a@x", &["b@x".into()], &mail(None));
        assert!(msg.starts_with("From: a@x\r\nTo: b@x\r\n"));
        assert!(msg.contains("Content-Type: text/plain"));
    }

    #[test]
    fn html_body_switches_content_type() {
        let msg = render_message("a@x", &["b@x".into()], &mail(Some("<p>hi</p>")));
        assert!(msg.contains("Content-Type: text/html"));
        assert!(msg.contains("<p>hi</p>"));
    }

    #[test]
    fn leading_dots_are_stuffed() {
        let msg = render_message("a@x", &["b@x".into()], &mail(None));
        assert!(msg.contains("\r\n..starts with dot\r\n"));
    }
}
