//! Launches the configured sessions at a fixed interval and waits for all of them.

use crate::config::{RunConfig, SessionRecord};
use crate::error::{Result, SimError};
use crate::pacing::{Clock, TokioClock};
use crate::session::run_session;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span};

/// Totals for a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub launched: usize,
    pub failed: usize,
}

pub struct Orchestrator {
    run: Arc<RunConfig>,
    records: Vec<SessionRecord>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    /// # Errors
    /// [`SimError::Config`] when there are no session records.
    pub fn new(run: RunConfig, records: Vec<SessionRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(SimError::Config("no session records to launch".to_string()));
        }

        Ok(Self {
            run: Arc::new(run),
            records,
            clock: Arc::new(TokioClock::new()),
        })
    }

    /// Replace the clock used for launch spacing and segment pacing
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Launch every session, then wait for all of them to finish.
    ///
    /// Session `i` uses record `i mod N`. Launches are spaced by the run's
    /// launch interval; there is no wait after the last one. A failed session
    /// is logged and counted, never retried.
    pub async fn run(&self) -> RunReport {
        let count = self.run.effective_session_count(self.records.len());
        info!(
            "Launching {} sessions from {} records, interval {:?}",
            count,
            self.records.len(),
            self.run.launch_interval
        );

        let mut tasks = JoinSet::new();

        for (ordinal, record) in self.records.iter().cycle().take(count).enumerate() {
            let session = self.run.session_config(ordinal, record);
            let run = Arc::clone(&self.run);
            let clock = Arc::clone(&self.clock);

            tasks.spawn(
                async move {
                    info!("session start: {}", session.content);
                    match run_session(&run, &session, clock.as_ref()).await {
                        Ok(outcome) => {
                            info!("session end: {}", outcome);
                            true
                        }
                        Err(e) => {
                            error!("session aborted: {}", e);
                            false
                        }
                    }
                }
                .instrument(info_span!("session", id = ordinal)),
            );

            if ordinal + 1 < count {
                self.clock.sleep(self.run.launch_interval).await;
            }
        }

        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => failed += 1,
                Err(e) => {
                    error!("session task failed: {}", e);
                    failed += 1;
                }
            }
        }

        info!("all sessions finished: {} launched, {} failed", count, failed);
        RunReport {
            launched: count,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_session_records;
    use crate::pacing::ManualClock;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MEDIA: &str = "#EXTM3U
#EXT-X-TARGETDURATION:1
#EXTINF:0,
seg0.ts
#EXT-X-ENDLIST
";

    fn run_config(server: &MockServer, count: Option<usize>) -> RunConfig {
        RunConfig {
            server_addr: server.address().to_string(),
            lookup_enabled: false,
            follow_redirect: false,
            session_count: count,
            launch_interval: Duration::from_millis(250),
            ..Default::default()
        }
    }

    async fn mount_vod(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/svc/a.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MEDIA))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/svc/seg0.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 188]))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/svc/b.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
    }

    #[test]
    fn rejects_empty_record_list() {
        assert!(Orchestrator::new(RunConfig::default(), Vec::new()).is_err());
    }

    #[tokio::test]
    async fn cycles_records_and_counts_failures() {
        let server = MockServer::start().await;
        mount_vod(&server).await;

        let records =
            parse_session_records("a.mp4 127.0.0.1 svc vod\nb.mp4 127.0.0.1 svc vod\n").unwrap();
        let clock = Arc::new(ManualClock::default());

        let report = Orchestrator::new(run_config(&server, Some(3)), records)
            .unwrap()
            .with_clock(clock.clone())
            .run()
            .await;

        assert_eq!(
            report,
            RunReport {
                launched: 3,
                failed: 1
            }
        );
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(250), Duration::from_millis(250)]
        );

        let requests = server.received_requests().await.unwrap();
        let setups = |p: &str| requests.iter().filter(|r| r.url.path() == p).count();
        assert_eq!(setups("/svc/a.mp4"), 2);
        assert_eq!(setups("/svc/b.mp4"), 1);
    }

    #[tokio::test]
    async fn single_session_launches_without_waiting() {
        let server = MockServer::start().await;
        mount_vod(&server).await;

        let records = parse_session_records("a.mp4 127.0.0.1 svc vod\n").unwrap();
        let clock = Arc::new(ManualClock::default());

        let report = Orchestrator::new(run_config(&server, None), records)
            .unwrap()
            .with_clock(clock.clone())
            .run()
            .await;

        assert_eq!(report.launched, 1);
        assert_eq!(report.failed, 0);
        assert!(clock.sleeps().is_empty());
    }
}
