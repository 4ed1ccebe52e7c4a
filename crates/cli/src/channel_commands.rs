//! `chatrelay channels`: list the configured roster without starting it.

use std::path::Path;

use {
    anyhow::Result,
    chatrelay_bus::MessageBus,
    chatrelay_channels::{ChannelManager, ChannelStatus},
};

use crate::{bus_config, load_config, roster};

pub async fn handle_channels(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let bus = MessageBus::new(bus_config(&config))?;
    let manager = roster::build(&config, &bus)?;
    for line in render(&manager) {
        println!("{line}");
    }
    Ok(())
}

fn render(manager: &ChannelManager) -> Vec<String> {
    if manager.is_empty() {
        return vec!["No channels enabled.".to_string()];
    }
    manager.statuses().iter().flat_map(render_status).collect()
}

fn render_status(status: &ChannelStatus) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<10} {:<9} {}",
        status.name,
        status.state,
        status.details.as_deref().unwrap_or("")
    )
    .trim_end()
    .to_string()];
    if let Some(error) = &status.last_error {
        lines.push(format!("  last error: {error}"));
    }
    lines
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, chatrelay_channels::ChannelState};

    #[test]
    fn empty_roster() {
        assert_eq!(render(&ChannelManager::new()), ["No channels enabled."]);
    }

    #[test]
    fn status_lines() {
        let mut status = ChannelStatus::new("signal", ChannelState::Stopped);
        status.details = Some("+14206942069 via 127.0.0.1:8080".into());
        assert_eq!(render_status(&status), [
            "signal     stopped   +14206942069 via 127.0.0.1:8080"
        ]);

        status.details = None;
        status.last_error = Some("connection refused".into());
        assert_eq!(render_status(&status), [
            "signal     stopped",
            "  last error: connection refused"
        ]);
    }
}
