use serde_derive::Serialize;

use std::path::{Path, PathBuf};

use crate::csv_writer::{CSVWriter, EventCSVWriter};
use crate::error::Result;
use crate::utils::{epoch_seconds, exists_or_create_dir};

/// One timestamped observation of a trial.
///
/// `delta` is a phase duration in seconds or a telemetry value. A NaN
/// `delta` on a `done` event marks a trial whose workload never became ready.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Event {
    pub method: String,
    pub event: String,
    pub rtt: u32,
    pub round: usize,
    pub ts: f64,
    pub delta: f64,
}

/// Append-only record of every event of one experiment.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> EventLog {
        EventLog { events: Vec::new() }
    }

    pub fn add_event(&mut self, method: &str, event: &str, rtt: u32, round: usize, ts: f64, delta: f64) {
        self.events.push(Event {
            method: method.to_string(),
            event: event.to_string(),
            rtt,
            round,
            ts,
            delta,
        });
    }

    /// Records `event` stamped with the current time.
    pub fn add_event_now(&mut self, method: &str, event: &str, rtt: u32, round: usize, delta: f64) {
        self.add_event(method, event, rtt, round, epoch_seconds(), delta);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events recorded for one `(method, rtt, round)` key, in insertion order.
    pub fn for_trial<'a>(
        &'a self,
        method: &'a str,
        rtt: u32,
        round: usize,
    ) -> impl Iterator<Item = &'a Event> + 'a {
        self.events
            .iter()
            .filter(move |e| e.method == method && e.rtt == rtt && e.round == round)
    }

    /// Writes the whole log to `<dir>/<experiment_name><suffix>-bundle.csv`.
    pub fn save_event(&self, dir: &Path, experiment_name: &str, suffix: &str) -> Result<PathBuf> {
        exists_or_create_dir(dir)?;
        let path = dir.join(format!("{}{}-bundle.csv", experiment_name, suffix));
        EventCSVWriter::new().write_csv(&self.events, &path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_keep_insertion_order() {
        let mut log = EventLog::new();
        log.add_event("vanilla-update", "start", 50, 1, 10.0, 0.0);
        log.add_event("vanilla-update", "pull", 50, 1, 11.0, 1.0);
        log.add_event("estargz-update", "start", 50, 1, 12.0, 0.0);

        let names: Vec<&str> = log.events().iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["start", "pull", "start"]);
        assert_eq!(log.for_trial("vanilla-update", 50, 1).count(), 2);
        assert_eq!(log.for_trial("vanilla-update", 50, 2).count(), 0);
    }

    #[test]
    fn test_save_event_writes_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::new();
        log.add_event("starlight-update", "start", 100, 3, 1.5, 0.0);
        log.add_event("starlight-update", "done", 100, 3, 4.0, f64::NAN);

        let path = log.save_event(&dir.path().join("csv"), "redis-0101--6.2.2_6.2.1-r20", "-dev").unwrap();

        assert!(path.ends_with("redis-0101--6.2.2_6.2.1-r20-dev-bundle.csv"));
        let written = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "method,event,rtt,round,ts,delta");
        assert_eq!(lines[1], "starlight-update,start,100,3,1.5,0.0");
        assert_eq!(lines[2], "starlight-update,done,100,3,4.0,NaN");
    }
}
