//! Readiness detection over a live line stream.
//!
//! A detector scans lines until one matches, then stops without reading any
//! further. If the stream closes first, or the optional bound expires, it
//! ends in `Failed` with the last line seen.

use std::time::Duration;

use tokio::io::{AsyncBufRead, Lines};
use tracing::debug;

use crate::process::ProcessHandle;

/// Decides whether a line signals readiness.
pub trait LineMatcher: Send + Sync {
    fn matches(&self, line: &str) -> bool;
}

/// Case-sensitive substring containment, first match wins.
#[derive(Debug, Clone)]
pub struct Marker(pub String);

impl LineMatcher for Marker {
    fn matches(&self, line: &str) -> bool {
        line.contains(self.0.as_str())
    }
}

impl<F> LineMatcher for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, line: &str) -> bool {
        self(line)
    }
}

/// Anything that yields lines one at a time.
#[allow(async_fn_in_trait)]
pub trait LineSource {
    /// Next line, or `None` at end of stream.
    async fn next_line(&mut self) -> Option<String>;
}

impl LineSource for ProcessHandle {
    async fn next_line(&mut self) -> Option<String> {
        ProcessHandle::next_line(self).await
    }
}

impl<R> LineSource for Lines<R>
where
    R: AsyncBufRead + Unpin,
{
    async fn next_line(&mut self) -> Option<String> {
        Lines::next_line(self).await.ok().flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    StreamClosed,
    TimedOut,
}

/// Terminal state of a detection.
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    Ready {
        lines_read: usize,
        elapsed: Duration,
    },
    Failed {
        reason: FailureReason,
        lines_read: usize,
        last_line: Option<String>,
    },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    pub fn lines_read(&self) -> usize {
        match self {
            Readiness::Ready { lines_read, .. } | Readiness::Failed { lines_read, .. } => {
                *lines_read
            }
        }
    }
}

pub struct ReadinessDetector<M: LineMatcher> {
    matcher: M,
    timeout: Option<Duration>,
}

impl ReadinessDetector<Marker> {
    pub fn marker(marker: &str) -> Self {
        ReadinessDetector::new(Marker(marker.to_string()))
    }
}

impl<M: LineMatcher> ReadinessDetector<M> {
    pub fn new(matcher: M) -> Self {
        ReadinessDetector {
            matcher,
            timeout: None,
        }
    }

    /// Bounds the scan. On expiry the detector fails as if the stream had
    /// closed.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn detect<S: LineSource>(&self, source: &mut S) -> Readiness {
        let start = tokio::time::Instant::now();
        let mut lines_read = 0;
        let mut last_line = None;

        let scan = async {
            while let Some(line) = source.next_line().await {
                lines_read += 1;
                debug!(line = %line, "output");
                if self.matcher.matches(&line) {
                    return true;
                }
                last_line = Some(line);
            }
            false
        };

        let outcome = match self.timeout {
            Some(bound) => tokio::time::timeout(bound, scan).await.ok(),
            None => Some(scan.await),
        };

        match outcome {
            Some(true) => Readiness::Ready {
                lines_read,
                elapsed: start.elapsed(),
            },
            Some(false) => Readiness::Failed {
                reason: FailureReason::StreamClosed,
                lines_read,
                last_line,
            },
            None => Readiness::Failed {
                reason: FailureReason::TimedOut,
                lines_read,
                last_line,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn stream(text: &'static str) -> Lines<BufReader<&'static [u8]>> {
        BufReader::new(text.as_bytes()).lines()
    }

    #[tokio::test]
    async fn test_stops_at_first_match_without_over_reading() {
        let mut lines = stream("starting\nloading\nready\nextra\n");
        let detector = ReadinessDetector::marker("ready").with_timeout(Some(Duration::from_secs(5)));

        let readiness = detector.detect(&mut lines).await;

        match readiness {
            Readiness::Ready { lines_read, elapsed } => {
                assert_eq!(lines_read, 3);
                assert!(elapsed < Duration::from_secs(5));
            }
            other => panic!("expected ready, got {:?}", other),
        }
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("extra"));
    }

    #[tokio::test]
    async fn test_stream_closed_reports_last_line() {
        let mut lines = stream("starting\nloading\n");
        let readiness = ReadinessDetector::marker("ready").detect(&mut lines).await;
        assert_eq!(
            readiness,
            Readiness::Failed {
                reason: FailureReason::StreamClosed,
                lines_read: 2,
                last_line: Some("loading".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_marker_is_case_sensitive() {
        let mut lines = stream("READY\n");
        let readiness = ReadinessDetector::marker("ready").detect(&mut lines).await;
        assert!(!readiness.is_ready());
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        let mut lines = stream("port: 3305\nport: 3306\n");
        let detector = ReadinessDetector::new(|line: &str| line.ends_with("3306"));
        let readiness = detector.detect(&mut lines).await;
        assert!(readiness.is_ready());
        assert_eq!(readiness.lines_read(), 2);
    }

    #[tokio::test]
    async fn test_timeout_yields_failed() {
        let mut handle = ProcessHandle::spawn(
            "wedged",
            &["sh".to_string(), "-c".to_string(), "echo booting; sleep 30".to_string()],
            None,
        )
        .unwrap();
        let detector =
            ReadinessDetector::marker("ready").with_timeout(Some(Duration::from_millis(300)));

        let readiness = detector.detect(&mut handle).await;

        assert_eq!(
            readiness,
            Readiness::Failed {
                reason: FailureReason::TimedOut,
                lines_read: 1,
                last_line: Some("booting".to_string()),
            }
        );
        handle.kill(&[], Duration::from_secs(5)).await;
    }
}
