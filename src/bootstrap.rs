//! Application startup.
//!
//! [`Bootstrap`] runs the startup steps strictly in [`Step`] order, each
//! exactly once, awaiting each before starting the next:
//!
//! ```text
//! LoadConfiguration → RegisterPersistence → RegisterIdentity → RegisterServices
//!   → BuildPipeline → MapRoutes → Migrate → Seed → Serve
//! ```
//!
//! The first failure stops the sequence; later steps never run and nothing
//! is retried. Every transition is recorded in a [`BootstrapLog`] so the
//! ordering can be inspected after the fact.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::{AppConfig, ConfigError, ConfigSource};
use crate::error::Error as ServerError;
use crate::identity::IdentityStore;
use crate::middleware::{App, Pipeline, PipelineError};
use crate::notify::AuthMessageSender;
use crate::persistence::{Database, MemoryDatabase, PersistenceError};
use crate::router::{RouteError, Router};
use crate::seed::{DataSeed, IdentitySeed, SeedError};
use crate::server::{Server, shutdown_signal};
use crate::services::Services;
use crate::session::{MemoryStore, SessionStore, spawn_sweeper};
use crate::web;

/// Where unhandled failures are sent outside development.
pub const ERROR_PATH: &str = "/Home/Error";

/// Where anonymous users are sent when they hit a protected endpoint.
pub const LOGIN_PATH: &str = "/Account/Login";

/// HSTS max-age outside development: 30 days.
pub const HSTS_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// How often expired sessions are purged while serving.
pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ── Steps and log ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Step {
    LoadConfiguration,
    RegisterPersistence,
    RegisterIdentity,
    RegisterServices,
    BuildPipeline,
    MapRoutes,
    Migrate,
    Seed,
    Serve,
}

impl Step {
    pub const ALL: [Step; 9] = [
        Step::LoadConfiguration,
        Step::RegisterPersistence,
        Step::RegisterIdentity,
        Step::RegisterServices,
        Step::BuildPipeline,
        Step::MapRoutes,
        Step::Migrate,
        Step::Seed,
        Step::Serve,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadConfiguration   => "LoadConfiguration",
            Self::RegisterPersistence => "RegisterPersistence",
            Self::RegisterIdentity    => "RegisterIdentity",
            Self::RegisterServices    => "RegisterServices",
            Self::BuildPipeline       => "BuildPipeline",
            Self::MapRoutes           => "MapRoutes",
            Self::Migrate             => "Migrate",
            Self::Seed                => "Seed",
            Self::Serve               => "Serve",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Started,
    Completed,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BootstrapEvent {
    pub step: Step,
    pub phase: Phase,
}

/// Shared, append-only record of step transitions.
#[derive(Clone, Debug, Default)]
pub struct BootstrapLog {
    events: Arc<Mutex<Vec<BootstrapEvent>>>,
}

impl BootstrapLog {
    pub fn events(&self) -> Vec<BootstrapEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Index of the first `phase` event for `step`.
    pub fn position(&self, step: Step, phase: Phase) -> Option<usize> {
        self.events().iter().position(|e| e.step == step && e.phase == phase)
    }

    pub fn completed(&self, step: Step) -> bool {
        self.position(step, Phase::Completed).is_some()
    }

    pub fn started(&self, step: Step) -> bool {
        self.position(step, Phase::Started).is_some()
    }

    fn push(&self, step: Step, phase: Phase) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(BootstrapEvent { step, phase });
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("required configuration `{0}` is missing")]
    ConfigurationMissing(&'static str),

    #[error("configuration: {0}")]
    Configuration(#[source] ConfigError),

    #[error("persistence: {0}")]
    Persistence(#[source] PersistenceError),

    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("routes: {0}")]
    Routes(#[from] RouteError),

    #[error("database migration failed: {0}")]
    Migration(#[source] PersistenceError),

    #[error("seeding failed: {0}")]
    Seed(#[from] SeedError),

    #[error("server: {0}")]
    Serve(#[from] ServerError),

    #[error("step `{step}` attempted out of order; expected `{expected}`")]
    OutOfOrder { step: Step, expected: String },
}

impl From<ConfigError> for BootstrapError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Missing(key) => Self::ConfigurationMissing(key),
            other => Self::Configuration(other),
        }
    }
}

// ── Sequencer ─────────────────────────────────────────────────────────────────

/// Enforces step order and records transitions.
struct Sequencer {
    next: usize,
    log: BootstrapLog,
}

impl Sequencer {
    fn new(log: BootstrapLog) -> Self {
        Self { next: 0, log }
    }

    async fn step<T, F>(&mut self, step: Step, work: F) -> Result<T, BootstrapError>
    where
        F: Future<Output = Result<T, BootstrapError>>,
    {
        if step.index() != self.next {
            let expected = Step::ALL.get(self.next).map_or_else(|| "nothing".to_owned(), Step::to_string);
            return Err(BootstrapError::OutOfOrder { step, expected });
        }
        self.log.push(step, Phase::Started);
        info!(step = %step, "starting");
        match work.await {
            Ok(value) => {
                self.log.push(step, Phase::Completed);
                self.next += 1;
                info!(step = %step, "completed");
                Ok(value)
            }
            Err(e) => {
                self.log.push(step, Phase::Failed);
                self.next = Step::ALL.len();
                error!(step = %step, error = %e, "startup failed");
                Err(e)
            }
        }
    }
}

// ── Bootstrap ─────────────────────────────────────────────────────────────────

type Opener = Box<
    dyn FnOnce(&str) -> Result<(Arc<dyn Database>, Arc<dyn IdentityStore>), PersistenceError> + Send,
>;
type RouteMap = Box<dyn FnOnce(Router) -> Result<Router, RouteError> + Send>;

/// Startup configuration. Collaborators default to the in-memory ones; each
/// can be replaced before [`prepare`](Bootstrap::prepare) runs.
pub struct Bootstrap {
    source: ConfigSource,
    open: Opener,
    routes: RouteMap,
    seed: Arc<dyn DataSeed>,
    session_store: Arc<dyn SessionStore>,
    log: BootstrapLog,
}

impl Bootstrap {
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            open: Box::new(|cs| {
                let db = Arc::new(MemoryDatabase::connect(cs)?);
                Ok((Arc::clone(&db) as Arc<dyn Database>, db as Arc<dyn IdentityStore>))
            }),
            routes: Box::new(web::routes),
            seed: Arc::new(IdentitySeed),
            session_store: Arc::new(MemoryStore::new()),
            log: BootstrapLog::default(),
        }
    }

    /// Replaces the persistence provider. `open` receives the
    /// `DefaultConnection` string.
    pub fn with_persistence<D, F>(mut self, open: F) -> Self
    where
        D: Database + IdentityStore,
        F: FnOnce(&str) -> Result<Arc<D>, PersistenceError> + Send + 'static,
    {
        self.open = Box::new(move |cs| {
            let db = open(cs)?;
            Ok((Arc::clone(&db) as Arc<dyn Database>, db as Arc<dyn IdentityStore>))
        });
        self
    }

    /// Replaces the route table mapped in [`Step::MapRoutes`].
    pub fn with_routes<F>(mut self, routes: F) -> Self
    where
        F: FnOnce(Router) -> Result<Router, RouteError> + Send + 'static,
    {
        self.routes = Box::new(routes);
        self
    }

    pub fn with_seed(mut self, seed: Arc<dyn DataSeed>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = store;
        self
    }

    /// Handle to the transition log; stays valid after the bootstrap is
    /// consumed.
    pub fn log(&self) -> BootstrapLog {
        self.log.clone()
    }

    /// Runs every step up to and including [`Step::Seed`].
    pub async fn prepare(self) -> Result<Application, BootstrapError> {
        let Self { source, open, routes, seed, session_store, log } = self;
        let mut seq = Sequencer::new(log.clone());

        let config = seq
            .step(Step::LoadConfiguration, async {
                let config = AppConfig::load(&source)?;
                info!(environment = %config.environment, "configuration loaded");
                Ok::<_, BootstrapError>(config)
            })
            .await?;

        let (database, identity_provider) = seq
            .step(Step::RegisterPersistence, async {
                open(&config.connection_string).map_err(BootstrapError::Persistence)
            })
            .await?;

        let identity = seq
            .step(Step::RegisterIdentity, async { Ok(identity_provider) })
            .await?;

        let services = seq
            .step(Step::RegisterServices, async {
                let sender = Arc::new(AuthMessageSender::new());
                Ok(Services {
                    environment: config.environment,
                    settings: Arc::new(config.settings.clone()),
                    database,
                    identity: Arc::clone(&identity),
                    email: sender.clone(),
                    sms: sender,
                    seed,
                })
            })
            .await?;

        let pipeline = seq
            .step(Step::BuildPipeline, async {
                Ok::<_, BootstrapError>(build_pipeline(&config, &services, Arc::clone(&session_store))?)
            })
            .await?;

        let app = seq
            .step(Step::MapRoutes, async {
                let router = routes(Router::new())?;
                info!(routes = router.len(), "routes mapped");
                Ok::<_, BootstrapError>(pipeline.map_routes(router)?.with_state(services.clone()))
            })
            .await?;

        let report = seq
            .step(Step::Migrate, async {
                let pending = services.database.pending_migrations().await;
                info!(pending = pending.len(), "applying migrations");
                services.database.migrate().await.map_err(BootstrapError::Migration)
            })
            .await?;
        info!(applied = report.applied.len(), "database up to date");

        seq.step(Step::Seed, async {
            Ok::<_, BootstrapError>(services.seed.seed(services.identity.as_ref(), &services.settings).await?)
        })
        .await?;

        Ok(Application { app, services, config, session_store, seq })
    }

    /// Prepares and then serves until SIGTERM or Ctrl-C.
    pub async fn run(self) -> Result<(), BootstrapError> {
        self.prepare().await?.serve().await
    }
}

fn build_pipeline(
    config: &AppConfig,
    services: &Services,
    session_store: Arc<dyn SessionStore>,
) -> Result<Pipeline, PipelineError> {
    let mut builder = Pipeline::builder().use_trace();
    builder = if config.environment.is_development() {
        builder.use_developer_exception_page()
    } else {
        builder.use_exception_handler(ERROR_PATH).use_hsts(HSTS_MAX_AGE)
    };
    builder = builder
        .use_https_redirection()
        .use_static_files(&config.web_root)
        .use_routing();
    if config.session.enabled {
        builder = builder.use_session(config.session.options(), session_store);
    }
    builder
        .use_authorization(Arc::clone(&services.identity), LOGIN_PATH)
        .build()
}

// ── Application ───────────────────────────────────────────────────────────────

/// A fully prepared application waiting for [`Step::Serve`].
pub struct Application {
    app: App,
    services: Services,
    config: AppConfig,
    session_store: Arc<dyn SessionStore>,
    seq: Sequencer,
}

impl Application {
    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn log(&self) -> BootstrapLog {
        self.seq.log.clone()
    }

    /// Binds the configured address and serves until SIGTERM or Ctrl-C.
    pub async fn serve(self) -> Result<(), BootstrapError> {
        let listen = self.config.listen;
        self.serve_with(async move { TcpListener::bind(listen).await }, shutdown_signal()).await
    }

    /// Serves on `listener` until `shutdown` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<(), BootstrapError>
    where
        F: Future<Output = ()> + Send,
    {
        self.serve_with(async move { Ok(listener) }, shutdown).await
    }

    async fn serve_with<L, F>(self, listener: L, shutdown: F) -> Result<(), BootstrapError>
    where
        L: Future<Output = std::io::Result<TcpListener>> + Send,
        F: Future<Output = ()> + Send,
    {
        let Self { app, config, session_store, mut seq, .. } = self;
        seq.step(Step::Serve, async move {
            let listener = listener.await.map_err(ServerError::from)?;
            let sweeper = config
                .session
                .enabled
                .then(|| spawn_sweeper(session_store, SESSION_SWEEP_INTERVAL));
            let served = Server::from_listener(listener).serve_with_shutdown(app, shutdown).await;
            if let Some(sweeper) = sweeper {
                sweeper.abort();
            }
            Ok::<_, BootstrapError>(served?)
        })
        .await
    }
}
