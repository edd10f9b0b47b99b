//! Fans recorded chunks out to every sink of a recording.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;

use super::RecordSink;
use crate::format::SampleSpec;
use crate::{AudioChunk, CoreError, CoreEvent, EventCallback, RecordConfig};

/// Longest pause between two write attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

pub(crate) enum RouterCommand {
    /// Write what is still queued, stop the sinks and exit.
    Stop,
}

/// Owns the sinks of one recording while it runs.
pub(crate) struct Router {
    sinks: Vec<Arc<dyn RecordSink>>,
    event_callback: Option<EventCallback>,
    attempts: u32,
    retry_delay: Duration,
}

impl Router {
    pub(crate) fn new(sinks: Vec<Arc<dyn RecordSink>>, config: RecordConfig) -> Self {
        Self {
            sinks,
            event_callback: None,
            attempts: config.sink_retry_attempts.max(1),
            retry_delay: config.sink_retry_delay,
        }
    }

    pub(crate) fn with_event_callback(mut self, callback: Option<EventCallback>) -> Self {
        self.event_callback = callback;
        self
    }

    fn sink_error(&self, sink: &dyn RecordSink, error: String) {
        if let Some(callback) = &self.event_callback {
            callback(CoreEvent::RecordSinkError {
                sink_name: sink.name().to_string(),
                error,
            });
        }
    }

    /// Writes `chunk` to one sink, backing off between attempts. The chunk
    /// is lost for this sink once every attempt failed.
    async fn deliver(&self, sink: &dyn RecordSink, chunk: &AudioChunk) {
        let mut delay = self.retry_delay;
        for attempt in 1..=self.attempts {
            let Err(e) = sink.write(chunk).await else {
                return;
            };
            tracing::warn!(sink = sink.name(), attempt, error = %e, "sink write failed");
            self.sink_error(sink, e.to_string());

            if attempt < self.attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2).min(MAX_RETRY_DELAY);
            }
        }
        tracing::error!(
            sink = sink.name(),
            bytes = chunk.len(),
            "dropping chunk after {} attempts",
            self.attempts
        );
    }

    /// Writes `chunk` to all sinks at once. A slow or failing sink holds up
    /// the next chunk but not its siblings.
    pub(crate) async fn write_chunk(&self, chunk: &AudioChunk) {
        join_all(self.sinks.iter().map(|sink| self.deliver(sink.as_ref(), chunk))).await;
    }

    /// Starts the sinks in order. On failure the ones already started are
    /// stopped again.
    pub(crate) async fn start_sinks(&self, spec: &SampleSpec) -> Result<(), CoreError> {
        for (index, sink) in self.sinks.iter().enumerate() {
            let Err(e) = sink.on_start(spec).await else {
                continue;
            };
            for started in &self.sinks[..index] {
                if let Err(e) = started.on_stop().await {
                    tracing::debug!(sink = started.name(), error = %e, "sink stop failed");
                }
            }
            return Err(CoreError::SinkStartFailed {
                sink_name: sink.name().to_string(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) async fn stop_sinks(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.on_stop().await {
                tracing::warn!(sink = sink.name(), error = %e, "sink stop failed");
                self.sink_error(sink.as_ref(), format!("stop failed: {e}"));
            }
        }
    }

    /// Task body: forwards chunks until told to stop or until both
    /// channels are closed, then stops the sinks.
    pub(crate) async fn run(
        self,
        mut chunks: mpsc::Receiver<AudioChunk>,
        mut commands: mpsc::Receiver<RouterCommand>,
    ) {
        loop {
            tokio::select! {
                Some(chunk) = chunks.recv() => self.write_chunk(&chunk).await,
                Some(RouterCommand::Stop) = commands.recv() => {
                    while let Ok(chunk) = chunks.try_recv() {
                        self.write_chunk(&chunk).await;
                    }
                    break;
                }
                else => break,
            }
        }

        self.stop_sinks().await;
        tracing::debug!(sinks = self.sinks.len(), "record router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SinkError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct TestSink {
        name: String,
        write_count: AtomicUsize,
        fail_count: AtomicUsize,
        fail_start: bool,
        stopped: AtomicUsize,
    }

    impl TestSink {
        fn new(name: &str) -> Self {
            Self::failing(name, 0)
        }

        fn failing(name: &str, fail_times: usize) -> Self {
            Self {
                name: name.to_string(),
                write_count: AtomicUsize::new(0),
                fail_count: AtomicUsize::new(fail_times),
                fail_start: false,
                stopped: AtomicUsize::new(0),
            }
        }

        fn refusing_start(name: &str) -> Self {
            Self {
                fail_start: true,
                ..Self::new(name)
            }
        }

        fn writes(&self) -> usize {
            self.write_count.load(Ordering::SeqCst)
        }

        fn stops(&self) -> usize {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RecordSink for TestSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_start(&self, _spec: &SampleSpec) -> Result<(), SinkError> {
            if self.fail_start {
                return Err(SinkError::custom("no disk"));
            }
            Ok(())
        }

        async fn write(&self, _chunk: &AudioChunk) -> Result<(), SinkError> {
            let remaining = self.fail_count.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_count.fetch_sub(1, Ordering::SeqCst);
                return Err(SinkError::custom("intentional failure"));
            }
            self.write_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_stop(&self) -> Result<(), SinkError> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_config() -> RecordConfig {
        RecordConfig {
            sink_retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_router_writes_to_all_sinks() {
        let sink1 = Arc::new(TestSink::new("sink1"));
        let sink2 = Arc::new(TestSink::new("sink2"));

        let router = Router::new(vec![sink1.clone(), sink2.clone()], RecordConfig::default());

        router.write_chunk(&AudioChunk::new(vec![0; 100])).await;

        assert_eq!(sink1.writes(), 1);
        assert_eq!(sink2.writes(), 1);
    }

    #[tokio::test]
    async fn test_router_retries_on_failure() {
        let sink = Arc::new(TestSink::failing("sink", 2));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = errors.clone();

        let router = Router::new(vec![sink.clone()], fast_config()).with_event_callback(Some(
            crate::event_callback(move |event| {
                if let CoreEvent::RecordSinkError { sink_name, .. } = event {
                    seen.lock().push(sink_name);
                }
            }),
        ));

        router.write_chunk(&AudioChunk::new(vec![0; 100])).await;

        // third attempt goes through
        assert_eq!(sink.writes(), 1);
        assert_eq!(errors.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_router_gives_up_after_max_attempts() {
        let sink = Arc::new(TestSink::failing("sink", 10));
        let router = Router::new(vec![sink.clone()], fast_config());

        router.write_chunk(&AudioChunk::new(vec![0; 100])).await;

        assert_eq!(sink.writes(), 0);
        assert_eq!(sink.fail_count.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_router_start_failure_stops_started_sinks() {
        let good = Arc::new(TestSink::new("good"));
        let bad = Arc::new(TestSink::refusing_start("bad"));
        let router = Router::new(vec![good.clone(), bad.clone()], RecordConfig::default());

        let err = router.start_sinks(&SampleSpec::default()).await.unwrap_err();
        match err {
            CoreError::SinkStartFailed { sink_name, .. } => assert_eq!(sink_name, "bad"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(good.stops(), 1);
        assert_eq!(bad.stops(), 0);
    }

    #[tokio::test]
    async fn test_router_run_stops_on_command() {
        let sink = Arc::new(TestSink::new("sink"));
        let router = Router::new(vec![sink.clone()], RecordConfig::default());

        let (chunk_tx, chunk_rx) = mpsc::channel(10);
        let (cmd_tx, cmd_rx) = mpsc::channel(1);

        chunk_tx.send(AudioChunk::new(vec![0; 100])).await.unwrap();
        cmd_tx.send(RouterCommand::Stop).await.unwrap();
        router.run(chunk_rx, cmd_rx).await;

        assert_eq!(sink.writes(), 1);
        assert_eq!(sink.stops(), 1);
    }
}
