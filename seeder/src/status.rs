//! Human-readable status lines.

use crate::distribution::{JobPhase, StatusReport};
use std::fmt::Write;
use std::time::Duration;

/// One status line for the active job.
///
/// ```text
/// Status: Downloading	Peers: (In 2 | Out 3 | Total 5)	ETA: 10m0s
/// Status: Seeding (1h0m0s)	Peers: (In 50 | Out 70 | Total 120)
/// ```
pub fn format_status(report: &StatusReport) -> String {
    let peers = format!(
        "Peers: (In {} | Out {} | Total {})",
        report.peers.incoming, report.peers.outgoing, report.peers.total
    );
    match &report.phase {
        JobPhase::Downloading => {
            let eta = report
                .eta
                .map(format_duration)
                .unwrap_or_else(|| "unknown".to_string());
            format!("Status: Downloading\t{}\tETA: {}", peers, eta)
        }
        JobPhase::Seeding => {
            let seeded = format_duration(report.seeded_for.unwrap_or_default());
            format!("Status: Seeding ({})\t{}", seeded, peers)
        }
        JobPhase::Stopping => "Stopping (new torrent will start soon)".to_string(),
        JobPhase::Stopped => "Stopped (new torrent will start soon)".to_string(),
        JobPhase::Other(_) => "Some other status (check debug logs)".to_string(),
    }
}

/// Formats whole seconds as hours, minutes and seconds, e.g. `1h0m0s`, `10m0s`, `45s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        let _ = write!(out, "{}h", h);
    }
    if h > 0 || m > 0 {
        let _ = write!(out, "{}m", m);
    }
    let _ = write!(out, "{}s", s);
    out
}
