//! The stream driver: one input, a pipeline of processors and one output,
//! built from a declarative config and wired with transaction channels.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::bundle::{Bundle, ComponentConfig};
use crate::component::{Closable, Input, Output};
use crate::error::{Error, ErrorKind, Result};
use crate::management::{Management, ResourceConfig};
use crate::pipeline::Pipeline;
use crate::shared::shutdown_signal;

const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 20_000;

/// How often a running stream checks whether its output has finished.
const WATCH_INTERVAL: Duration = Duration::from_secs(60);

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub processors: Vec<ComponentConfig>,
}

/// The config of a whole stream.
///
/// ```yaml
/// input:
///   stdin: {}
/// pipeline:
///   processors:
///     - mapping: 'root.doubled = input.x * 2;'
/// output:
///   type: stdout
///   stdout:
///     max_in_flight: 4
/// shutdown_timeout_ms: 5000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    pub input: ComponentConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub output: ComponentConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl StreamConfig {
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).map_err(|e| {
            Error::StreamError(ErrorKind::ConfigError(format!("invalid stream config: {e}")))
        })
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// A running stream.
pub struct Stream {
    id: Uuid,
    input: Arc<dyn Input>,
    pipeline: Arc<Pipeline>,
    output: Arc<dyn Output>,
    shutdown_timeout: Duration,
}

impl Stream {
    /// Builds the stream's resources and components through `bundle` and
    /// starts it.
    pub fn new(config: &StreamConfig, bundle: Arc<Bundle>) -> Result<Self> {
        let mgr = Management::from_resources(bundle, &config.resources)?;
        Self::with_management(config, &mgr)
    }

    /// Builds and starts the stream with an existing management context. The
    /// config's resources are ignored.
    pub fn with_management(config: &StreamConfig, mgr: &Management) -> Result<Self> {
        let id = Uuid::new_v4();
        let span = info_span!("stream", %id);
        let _entered = span.enter();
        let bundle = mgr.bundle();

        // the input starts reading as soon as it is built, so it comes last
        let mut processors = Vec::with_capacity(config.pipeline.processors.len());
        for (i, conf) in config.pipeline.processors.iter().enumerate() {
            let label = format!("processor_{i}");
            let processor = bundle
                .build_processor(conf, &mgr.labelled(&label))
                .map_err(|e| e.context(format!("pipeline.processors.{i}")))?;
            processors.push(processor);
        }
        let pipeline = Arc::new(Pipeline::new("pipeline", processors));
        let output: Arc<dyn Output> = Arc::from(
            bundle
                .build_output(&config.output, &mgr.labelled("output"))
                .map_err(|e| e.context("output"))?,
        );
        let input: Arc<dyn Input> = Arc::from(
            bundle
                .build_input(&config.input, &mgr.labelled("input"))
                .map_err(|e| e.context("input"))?,
        );

        let stream = Self {
            id,
            input,
            pipeline,
            output,
            shutdown_timeout: config.shutdown_timeout(),
        };
        if let Err(e) = stream.wire() {
            stream.input.close_async();
            stream.pipeline.close_async();
            stream.output.close_async();
            return Err(e);
        }
        info!(processors = stream.pipeline.len(), "stream started");
        Ok(stream)
    }

    fn wire(&self) -> Result<()> {
        self.output.consume(self.pipeline.transaction_chan()?)?;
        self.pipeline.consume(self.input.transaction_chan()?)?;
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stops the stream gracefully: input first, so everything it already
    /// produced is still delivered, then the pipeline, then the output. All
    /// three waits share one deadline.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        self.input.close_async();
        self.input
            .wait_for_close(remaining(deadline))
            .await
            .map_err(|e| e.context("input"))?;

        self.pipeline.close_async();
        self.pipeline
            .wait_for_close(remaining(deadline))
            .await
            .map_err(|e| e.context("pipeline"))?;

        self.output.close_async();
        self.output
            .wait_for_close(remaining(deadline))
            .await
            .map_err(|e| e.context("output"))?;

        info!(id = %self.id, "stream stopped");
        Ok(())
    }

    /// Waits for the stream to finish on its own, which happens once a
    /// finite input is exhausted and everything it produced was delivered.
    pub async fn wait_for_close(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        self.output.wait_for_close(remaining(deadline)).await?;
        self.pipeline.wait_for_close(remaining(deadline)).await?;
        self.input.wait_for_close(remaining(deadline)).await
    }

    /// Runs until the stream finishes, the process is signalled to stop, or
    /// `shutdown_rx` fires, then stops within the configured timeout.
    pub async fn run(self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let finished = CancellationToken::new();
        let watcher = {
            let output = Arc::clone(&self.output);
            let finished = finished.clone();
            tokio::spawn(
                async move {
                    while output.wait_for_close(WATCH_INTERVAL).await.is_err() {}
                    finished.cancel();
                }
                .in_current_span(),
            )
        };

        shutdown_signal(shutdown_rx, finished)
            .instrument(info_span!("stream", id = %self.id))
            .await;
        let result = self.stop(self.shutdown_timeout).await;
        watcher.abort();
        result
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
