//! Agent assembly and lifecycle.
//!
//! [`Agent`] wires the sample source, release source, stager and telemetry
//! sink together, runs crash recovery, and spawns the sampling, update and
//! command tasks on the current tokio runtime.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::core::config::{AgentConfig, ReleaseSourceConfig, RuntimeSettings, SinkKind, TelemetryConfig, UpdateConfig};
use crate::core::dispatch::{CommandDispatcher, CommandHandle};
use crate::core::shutdown::{self, ShutdownSignal, ShutdownTrigger};
use crate::core::state_store::StateStore;
use crate::core::system_monitor::{
    AnalyticsResult, HealthSnapshot, MonitorPipeline, SampleSource, SystemSampler,
};
use crate::core::tasks::{command_task, sampling_task, update_task, SamplingContext};
use crate::core::telemetry::{ErrorQueue, HttpSink, StdoutSink, TelemetrySink};
use crate::core::update::{
    FileStager, GitHubReleaseSource, HttpManifestSource, ReleaseSource, Stager, UpdateManager,
    UpdateManifest, UpdateOutcome, Version,
};
use crate::error::{EdgeError, Result};

const COMMAND_QUEUE: usize = 16;

/// Stand-in used when no release source is configured; recovery still needs a manager
struct NoReleaseSource;

#[async_trait]
impl ReleaseSource for NoReleaseSource {
    async fn fetch_manifest(&self) -> Result<UpdateManifest> {
        Err(EdgeError::config_validation("no release source configured"))
    }

    async fn download(&self, _manifest: &UpdateManifest) -> Result<Vec<u8>> {
        Err(EdgeError::config_validation("no release source configured"))
    }
}

pub fn release_source_from_config(config: &UpdateConfig) -> Result<Option<Arc<dyn ReleaseSource>>> {
    let timeout = config.request_timeout();
    let source: Arc<dyn ReleaseSource> = match &config.source {
        ReleaseSourceConfig::Disabled => return Ok(None),
        ReleaseSourceConfig::Manifest { url } => Arc::new(HttpManifestSource::new(url.clone(), timeout)?),
        ReleaseSourceConfig::Github { repo, token } => {
            Arc::new(GitHubReleaseSource::new(repo.clone(), token.clone(), timeout)?)
        }
    };
    Ok(Some(source))
}

pub fn telemetry_sink_from_config(config: &TelemetryConfig) -> Result<Option<Arc<dyn TelemetrySink>>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let sink: Arc<dyn TelemetrySink> = match config.sink {
        SinkKind::Disabled => return Ok(None),
        SinkKind::Stdout => Arc::new(StdoutSink),
        SinkKind::Http => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| EdgeError::config_validation("telemetry.endpoint is required"))?;
            Arc::new(HttpSink::new(endpoint, timeout)?)
        }
    };
    Ok(Some(sink))
}

pub struct Agent {
    config: AgentConfig,
    sample_source: Box<dyn SampleSource>,
    release_source: Option<Arc<dyn ReleaseSource>>,
    sink: Option<Arc<dyn TelemetrySink>>,
    stager: Arc<dyn Stager>,
    shutdown: ShutdownTrigger,
    signal: ShutdownSignal,
}

/// Channels and state shared by the tasks of one agent
struct Wiring {
    store: Arc<StateStore>,
    manager: UpdateManager,
    sampling: SamplingContext,
    health_rx: watch::Receiver<Arc<HealthSnapshot>>,
    analytics_rx: watch::Receiver<Arc<Vec<AnalyticsResult>>>,
    settings_tx: watch::Sender<Arc<RuntimeSettings>>,
    settings_rx: watch::Receiver<Arc<RuntimeSettings>>,
}

impl Agent {
    /// Agent using the host sampler and the sources named in `config`
    pub fn from_config(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let release_source = release_source_from_config(&config.update)?;
        let sink = telemetry_sink_from_config(&config.telemetry)?;
        let stager: Arc<dyn Stager> = Arc::new(FileStager::new(config.install_root()?));
        Ok(Self::new(
            config,
            Box::new(SystemSampler::new()),
            release_source,
            sink,
            stager,
        ))
    }

    pub fn new(
        config: AgentConfig,
        sample_source: Box<dyn SampleSource>,
        release_source: Option<Arc<dyn ReleaseSource>>,
        sink: Option<Arc<dyn TelemetrySink>>,
        stager: Arc<dyn Stager>,
    ) -> Self {
        let (shutdown, signal) = shutdown::channel();
        Self {
            config,
            sample_source,
            release_source,
            sink,
            stager,
            shutdown,
            signal,
        }
    }

    pub fn with_sample_source(mut self, source: Box<dyn SampleSource>) -> Self {
        self.sample_source = source;
        self
    }

    pub fn with_release_source(mut self, source: Arc<dyn ReleaseSource>) -> Self {
        self.release_source = Some(source);
        self
    }

    pub fn with_telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Trigger that stops the agent; hand it to a signal handler
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }

    /// Version recorded in fresh state: the active release, or this binary
    fn fallback_version(&self) -> Version {
        match self.stager.active_version() {
            Ok(Some(version)) => version,
            Ok(None) => Version::current(),
            Err(e) => {
                log::warn!("Could not read active release: {}", e);
                Version::current()
            }
        }
    }

    fn wire(self) -> Result<(Wiring, ShutdownTrigger, ShutdownSignal)> {
        let state_path = self.config.state_path()?;
        let (store, corruption) = StateStore::open(&state_path, self.fallback_version())?;
        let store = Arc::new(store);

        let errors = ErrorQueue::new();
        if let Some(e) = corruption {
            errors.record(&e);
        }

        let settings = RuntimeSettings::from_config(&self.config);
        let (settings_tx, settings_rx) = watch::channel(Arc::new(settings.clone()));
        let (health_tx, health_rx) = watch::channel(Arc::new(HealthSnapshot::nominal()));
        let (analytics_tx, analytics_rx) = watch::channel(Arc::new(Vec::new()));

        let source: Arc<dyn ReleaseSource> = match &self.release_source {
            Some(source) => Arc::clone(source),
            None => Arc::new(NoReleaseSource),
        };
        let mut manager = UpdateManager::new(
            source,
            Arc::clone(&self.stager),
            Arc::clone(&store),
            health_rx.clone(),
            self.signal.clone(),
            self.config.update.policy(),
        )
        .with_error_queue(errors.clone());

        match manager.recover() {
            Ok(Some(outcome)) => log::warn!("Recovered interrupted update: {:?}", outcome),
            Ok(None) => {}
            Err(e) => {
                log::error!("Update recovery failed: {}", e);
                errors.record(&e);
            }
        }

        let sampling = SamplingContext {
            device_id: self.config.device.id.clone(),
            source: self.sample_source,
            pipeline: MonitorPipeline::new(
                self.config.analytics_config(),
                settings.rules,
                Duration::from_secs(self.config.sampling.recovery_dwell_secs),
            ),
            settings: settings_rx.clone(),
            health_tx,
            analytics_tx,
            sink: self.sink,
            errors,
            store: Arc::clone(&store),
            publish_timeout: Duration::from_secs(self.config.telemetry.timeout_secs.max(1)),
        };

        let wiring = Wiring {
            store,
            manager,
            sampling,
            health_rx,
            analytics_rx,
            settings_tx,
            settings_rx,
        };
        Ok((wiring, self.shutdown, self.signal))
    }

    /// Recover, then spawn all tasks. Must be called inside a tokio runtime.
    pub fn start(self) -> Result<RunningAgent> {
        let device = self.config.device.clone();
        let update_enabled = self.release_source.is_some();
        let check_interval = self.config.update.check_interval();

        let (wiring, shutdown, signal) = self.wire()?;
        let Wiring {
            store,
            manager,
            sampling,
            health_rx,
            analytics_rx,
            settings_tx,
            settings_rx,
        } = wiring;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(sampling_task(sampling, signal.clone())));

        if update_enabled {
            tasks.push(tokio::spawn(update_task(
                manager,
                trigger_rx,
                settings_rx,
                check_interval,
                signal.clone(),
            )));
        } else {
            log::info!("No release source configured, self-update disabled");
            drop(trigger_rx);
        }

        let dispatcher = CommandDispatcher::new(
            device,
            Arc::clone(&store),
            health_rx.clone(),
            analytics_rx,
            settings_tx,
            trigger_tx,
        );
        tasks.push(tokio::spawn(command_task(dispatcher, command_rx, signal.clone())));

        Ok(RunningAgent {
            commands: CommandHandle::new(command_tx),
            health: health_rx,
            store,
            shutdown,
            signal,
            tasks,
        })
    }

    /// Run a single update cycle with live health sampling for the grace window
    pub async fn check_update_once(self) -> Result<UpdateOutcome> {
        if self.release_source.is_none() {
            return Err(EdgeError::config_validation(
                "no release source configured (set update.source)",
            ));
        }

        let (wiring, shutdown, signal) = self.wire()?;
        let Wiring {
            mut manager,
            sampling,
            ..
        } = wiring;

        let sampler = tokio::spawn(sampling_task(sampling, signal));
        let outcome = manager.run_cycle().await;

        shutdown.trigger();
        if let Err(e) = sampler.await {
            log::error!("Sampling task panicked: {}", e);
        }
        outcome
    }
}

/// Handle to a started agent
pub struct RunningAgent {
    commands: CommandHandle,
    health: watch::Receiver<Arc<HealthSnapshot>>,
    store: Arc<StateStore>,
    shutdown: ShutdownTrigger,
    signal: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningAgent {
    pub fn commands(&self) -> CommandHandle {
        self.commands.clone()
    }

    pub fn health(&self) -> watch::Receiver<Arc<HealthSnapshot>> {
        self.health.clone()
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }

    /// Block until shutdown is triggered elsewhere, then join the tasks
    pub async fn run_until_shutdown(mut self) {
        self.signal.wait().await;
        self.join().await;
    }

    /// Trigger shutdown and wait for every task to reach a safe state
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        self.join().await;
    }

    async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("Agent task panicked: {}", e);
            }
        }
        if let Err(e) = self.store.flush() {
            log::error!("Failed to flush state on shutdown: {}", e);
        }
        log::info!("Agent stopped");
    }
}
