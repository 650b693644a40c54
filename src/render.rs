//! Terminal rendering of controller events.

use colored::*;

use crate::controller::StatusChanged;
use crate::types::{TunnelState, TunnelStatus};

/// How a public URL should be highlighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlStyle {
    Cloudflare,
    Pinggy,
    Plain,
}

/// Provider-specific styling, keyed on the provider and the URL shape.
pub fn url_style(provider: Option<&str>, url: &str) -> UrlStyle {
    match provider {
        Some("cloudflare") if url.contains("trycloudflare.com") => UrlStyle::Cloudflare,
        Some("pinggy") if url.starts_with("https://") => UrlStyle::Pinggy,
        _ => UrlStyle::Plain,
    }
}

/// One-line plain-text description of a state and status.
pub fn describe(state: TunnelState, status: Option<&TunnelStatus>) -> String {
    match (state, status) {
        (TunnelState::Stopping, _) => "Status: Stopping...".to_string(),
        (TunnelState::Errored, _) => "Status: Error".to_string(),
        (_, Some(s)) if s.is_running() => {
            let url = s.url.as_deref().unwrap_or("Waiting for URL...");
            format!("{} - URL: {url}", running_prefix(s))
        }
        (TunnelState::Starting, _) => "Status: Starting...".to_string(),
        _ => "Status: Stopped".to_string(),
    }
}

fn running_prefix(status: &TunnelStatus) -> String {
    let port = status
        .local_port
        .map(|p| p.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    format!(
        "Status: Running ({}) on port {port}",
        status.provider.as_deref().unwrap_or("Unknown")
    )
}

fn paint_url(style: UrlStyle, url: &str) -> ColoredString {
    match style {
        UrlStyle::Cloudflare => url.truecolor(0xf4, 0x81, 0x20).bold().underline(),
        UrlStyle::Pinggy => url.truecolor(0x2f, 0xac, 0x66).bold().underline(),
        UrlStyle::Plain => url.blue().bold().underline(),
    }
}

/// Colored rendering of an event for the terminal.
pub fn render_event(event: &StatusChanged) -> String {
    let status = event.status.as_ref();
    let line = match (event.state, status) {
        (TunnelState::Errored, _) => "Status: Error".red().bold().to_string(),
        (TunnelState::Stopping, _) | (TunnelState::Starting, None) => {
            describe(event.state, status).yellow().to_string()
        }
        (_, Some(s)) if s.is_running() => match s.url.as_deref() {
            Some(url) => format!(
                "{} - URL: {}",
                running_prefix(s).green(),
                paint_url(url_style(s.provider.as_deref(), url), url)
            ),
            None => format!("{} - URL: {}", running_prefix(s).green(), "Waiting for URL...".dimmed()),
        },
        _ => describe(event.state, status).bright_black().to_string(),
    };

    match &event.error {
        Some(e) => format!("{line} {}", format!("({e})").red()),
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelError;
    use crate::types::BackendState;

    fn running(provider: &str, url: Option<&str>) -> TunnelStatus {
        TunnelStatus {
            state: BackendState::Running,
            provider: Some(provider.into()),
            local_port: Some(5000),
            url: url.map(str::to_string),
        }
    }

    #[test]
    fn test_url_style_by_provider() {
        assert_eq!(
            url_style(Some("cloudflare"), "https://abc.trycloudflare.com"),
            UrlStyle::Cloudflare
        );
        assert_eq!(url_style(Some("cloudflare"), "https://example.com"), UrlStyle::Plain);
        assert_eq!(url_style(Some("pinggy"), "https://x.pinggy.io"), UrlStyle::Pinggy);
        assert_eq!(url_style(Some("pinggy"), "tcp://x.pinggy.io:4000"), UrlStyle::Plain);
        assert_eq!(url_style(None, "https://x"), UrlStyle::Plain);
    }

    #[test]
    fn test_describe_running_with_url() {
        let s = running("pinggy", Some("https://x.pinggy.io"));
        assert_eq!(
            describe(TunnelState::Running, Some(&s)),
            "Status: Running (pinggy) on port 5000 - URL: https://x.pinggy.io"
        );
    }

    #[test]
    fn test_describe_waiting_for_url() {
        let s = running("cloudflare", None);
        assert_eq!(
            describe(TunnelState::Starting, Some(&s)),
            "Status: Running (cloudflare) on port 5000 - URL: Waiting for URL..."
        );
    }

    #[test]
    fn test_describe_unknown_provider_and_port() {
        let s = TunnelStatus {
            state: BackendState::Running,
            provider: None,
            local_port: None,
            url: None,
        };
        assert!(describe(TunnelState::Running, Some(&s)).starts_with("Status: Running (Unknown) on port N/A"));
    }

    #[test]
    fn test_describe_transient_states() {
        assert_eq!(describe(TunnelState::Starting, None), "Status: Starting...");
        assert_eq!(describe(TunnelState::Stopping, None), "Status: Stopping...");
        assert_eq!(describe(TunnelState::Idle, None), "Status: Stopped");
        assert_eq!(
            describe(TunnelState::Idle, Some(&TunnelStatus::stopped())),
            "Status: Stopped"
        );
    }

    #[test]
    fn test_render_event_includes_error() {
        colored::control::set_override(false);
        let event = StatusChanged {
            state: TunnelState::Idle,
            status: None,
            error: Some(TunnelError::Timeout { attempts: 30 }),
        };
        let line = render_event(&event);
        assert!(line.starts_with("Status: Stopped"));
        assert!(line.contains("no public tunnel URL after 30 status checks"));
    }
}
