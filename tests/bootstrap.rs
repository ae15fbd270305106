mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use http::{Method, StatusCode};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use asc_web::identity::IdentityStore;
use asc_web::middleware::Stage;
use asc_web::persistence::{MemoryDatabase, Migration};
use asc_web::seed::{DataSeed, SeedReport};
use asc_web::session::MemoryStore;
use asc_web::{ApplicationSettings, Bootstrap, BootstrapError, BoxFuture, ConfigError, ConfigSource, Phase, Step};

#[derive(Default)]
struct CountingSeed {
    runs: AtomicUsize,
}

impl DataSeed for CountingSeed {
    fn seed<'a>(
        &'a self,
        _identity: &'a dyn IdentityStore,
        _settings: &'a ApplicationSettings,
    ) -> BoxFuture<'a, Result<SeedReport, asc_web::seed::SeedError>> {
        Box::pin(async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(SeedReport::default())
        })
    }
}

#[tokio::test]
async fn steps_run_in_order_and_session_precedes_authorization() {
    let dir = common::content_root();
    let application = Bootstrap::new(common::source(&dir)).prepare().await.unwrap();
    let log = application.log();

    let app = application.app();
    let session = app.position(Stage::Session).unwrap();
    let authorization = app.position(Stage::Authorization).unwrap();
    assert!(session < authorization);
    assert_eq!(app.position(Stage::ExceptionHandler), Some(1));
    assert!(app.position(Stage::Hsts).is_some());
    assert!(app.position(Stage::DeveloperExceptionPage).is_none());

    let completed: Vec<Step> = log
        .events()
        .into_iter()
        .filter(|e| e.phase == Phase::Completed)
        .map(|e| e.step)
        .collect();
    assert_eq!(completed, Step::ALL[..8].to_vec());

    let migrated = log.position(Step::Migrate, Phase::Completed).unwrap();
    let seeding = log.position(Step::Seed, Phase::Started).unwrap();
    assert!(migrated < seeding);
    assert!(!log.started(Step::Serve));
}

#[tokio::test]
async fn serving_starts_after_seeding_and_drains_on_shutdown() {
    let dir = common::content_root();
    let application = Bootstrap::new(common::source(&dir)).prepare().await.unwrap();
    let log = application.log();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(application.serve_on(listener, async move {
        let _ = stopped.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /Home/Privacy HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8_lossy(&raw);
    assert!(raw.starts_with("HTTP/1.1 200"), "{raw}");
    assert!(raw.contains("Privacy Policy"));

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();

    let seeded = log.position(Step::Seed, Phase::Completed).unwrap();
    let serving = log.position(Step::Serve, Phase::Started).unwrap();
    assert!(seeded < serving);
    assert!(log.completed(Step::Serve));
}

#[tokio::test]
async fn missing_connection_string_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let bootstrap = Bootstrap::new(ConfigSource::new(dir.path()));
    let log = bootstrap.log();

    let err = bootstrap.prepare().await.err().unwrap();
    assert!(matches!(err, BootstrapError::ConfigurationMissing(_)), "{err}");
    assert_eq!(log.position(Step::LoadConfiguration, Phase::Failed), Some(1));
    assert!(!log.started(Step::RegisterPersistence));
}

#[tokio::test]
async fn failed_migration_prevents_seeding() {
    let dir = common::content_root();
    let seed = Arc::new(CountingSeed::default());
    let bootstrap = Bootstrap::new(common::source(&dir))
        .with_persistence(|cs| {
            let db = MemoryDatabase::connect(cs)?.with_migration(Migration {
                id: "20240101000000_AddServiceRequests",
                apply: |_| Err("table already exists".to_owned()),
            });
            Ok(Arc::new(db))
        })
        .with_seed(Arc::clone(&seed) as Arc<dyn DataSeed>);
    let log = bootstrap.log();

    let err = bootstrap.prepare().await.err().unwrap();
    assert!(matches!(err, BootstrapError::Migration(_)), "{err}");
    assert_eq!(seed.runs.load(Ordering::SeqCst), 0);
    assert!(!log.started(Step::Seed));
    assert!(!log.started(Step::Serve));
}

#[tokio::test]
async fn seeding_again_creates_no_duplicates() {
    let dir = common::content_root();
    let application = Bootstrap::new(common::source(&dir)).prepare().await.unwrap();
    let services = application.services();

    assert_eq!(services.identity.user_count().await.unwrap(), 2);
    let report = services.seed.seed(services.identity.as_ref(), &services.settings).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(services.identity.user_count().await.unwrap(), 2);

    let admin = services.identity.find_user_by_email(common::ADMIN_EMAIL).await.unwrap().unwrap();
    assert_eq!(services.identity.roles_of(admin.id).await.unwrap(), vec!["Admin"]);
}

#[tokio::test]
async fn development_uses_the_diagnostic_page_and_no_hsts() {
    let dir = common::content_root();
    let source = common::source(&dir).with_var("ASC_ENVIRONMENT", "Development");
    let application = Bootstrap::new(source).prepare().await.unwrap();

    let app = application.app();
    assert!(app.position(Stage::DeveloperExceptionPage).is_some());
    assert!(app.position(Stage::ExceptionHandler).is_none());
    assert!(app.position(Stage::Hsts).is_none());
}

#[tokio::test]
async fn disabled_sessions_drop_the_session_stage() {
    let dir = common::content_root();
    let source = common::source(&dir).with_var("Session__Enabled", "false");
    let application = Bootstrap::new(source).prepare().await.unwrap();
    assert!(application.app().position(Stage::Session).is_none());
    assert!(application.app().position(Stage::Authorization).is_some());
}

#[tokio::test]
async fn out_of_range_idle_timeout_fails_startup() {
    let dir = common::content_root();
    let source = common::source(&dir).with_var("Session__IdleTimeoutMinutes", "200000000000000000");
    let bootstrap = Bootstrap::new(source);
    let log = bootstrap.log();

    let err = bootstrap.prepare().await.err().unwrap();
    assert!(matches!(err, BootstrapError::Configuration(ConfigError::Invalid { .. })), "{err}");
    assert!(!log.started(Step::RegisterPersistence));
}

#[tokio::test(start_paused = true)]
async fn abandoned_sessions_are_swept_while_serving() {
    let dir = common::content_root();
    let store = Arc::new(MemoryStore::new());
    let application = Bootstrap::new(common::source(&dir))
        .with_session_store(store.clone())
        .prepare()
        .await
        .unwrap();

    for _ in 0..1000 {
        let res = application
            .app()
            .handle(common::request(Method::GET, "/Dashboard", None, None))
            .await;
        assert_eq!(res.status_code(), StatusCode::FOUND);
    }
    assert_eq!(store.len(), 1000);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(application.serve_on(listener, async move {
        let _ = stopped.await;
    }));

    tokio::time::sleep(Duration::from_secs(3 * 3600)).await;
    assert_eq!(store.len(), 0);

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}
