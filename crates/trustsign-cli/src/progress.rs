//! Single-line progress on stderr, rewritten in place on every report.

use std::io::Write;
use std::sync::Mutex;

use trustsign_core::{ProgressReporter, RequestSnapshot, RequestState};

/// Writes `\r`-refreshed progress lines; ends the line on a terminal state.
#[derive(Debug, Default)]
pub struct StderrReporter {
    last: Mutex<Option<(RequestState, usize)>>,
}

impl StderrReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for StderrReporter {
    fn report(&self, snapshot: &RequestSnapshot) {
        let progress = snapshot.progress();
        let key = (snapshot.state, progress.processed());
        {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            // Polls repeat the same state; only redraw on change.
            if *last == Some(key) {
                return;
            }
            *last = Some(key);
        }

        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r\x1b[2K  {}", render(snapshot));
        if snapshot.state.is_terminal() {
            let _ = writeln!(err);
        }
        let _ = err.flush();
    }
}

fn render(snapshot: &RequestSnapshot) -> String {
    let progress = snapshot.progress();
    format!(
        "{:<14} {}/{} ({:.1}%)",
        snapshot.state.as_str(),
        progress.processed(),
        progress.total,
        progress.percent()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trustsign_core::ArtifactStatus;

    #[test]
    fn render_shows_state_and_fraction() {
        let snapshot = RequestSnapshot {
            request_id: uuid::Uuid::nil(),
            state: RequestState::Completing,
            created_at: Utc::now(),
            remote_id: Some("r-1".into()),
            file_statuses: vec![ArtifactStatus::Completed, ArtifactStatus::InProgress],
            error_message: None,
        };
        assert_eq!(render(&snapshot), "completing     1/2 (50.0%)");
    }
}
