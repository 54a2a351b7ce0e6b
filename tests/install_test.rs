use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicI64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use flate2::{write::GzEncoder, Compression};
use pigpen::{
    install::{Component, InstallContext, InstallLedger, Installed, JavaHome, JythonInstaller, Layout, PigInstaller},
    SandboxError,
};
use tempfile::tempdir;

#[derive(Clone)]
struct Mirror {
    hits: Arc<AtomicUsize>,
    last_modified: Arc<AtomicI64>,
    archive: Arc<Vec<u8>>,
    broken: Arc<Vec<u8>>,
}

impl Mirror {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn tgz(files: &[(&str, &str)]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, body) in files {
        let mut h = tar::Header::new_gnu();
        h.set_size(body.len() as u64);
        h.set_mode(0o644);
        h.set_cksum();
        builder.append_data(&mut h, path, body.as_bytes())?;
    }
    Ok(builder.into_inner()?.finish()?)
}

fn pig_archive() -> Result<Vec<u8>> {
    tgz(&[("pig/bin/pig", "#!/bin/sh\necho pig\n"), ("pig/conf/pig.properties", "")])
}

async fn serve_archive(State(m): State<Mirror>) -> impl IntoResponse {
    m.hits.fetch_add(1, Ordering::SeqCst);
    let modified = chrono::DateTime::from_timestamp(m.last_modified.load(Ordering::SeqCst), 0)
        .unwrap_or_default()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    (
        StatusCode::OK,
        [(header::LAST_MODIFIED, modified)],
        m.archive.as_ref().clone(),
    )
}

/// A distribution without its launcher.
async fn serve_broken(State(m): State<Mirror>) -> impl IntoResponse {
    m.hits.fetch_add(1, Ordering::SeqCst);
    m.broken.as_ref().clone()
}

/// Declares more bytes than it sends.
async fn serve_truncated(State(m): State<Mirror>) -> impl IntoResponse {
    m.hits.fetch_add(1, Ordering::SeqCst);
    ([(header::CONTENT_LENGTH, "4096")], vec![0u8; 16])
}

async fn serve_jar(State(m): State<Mirror>) -> impl IntoResponse {
    m.hits.fetch_add(1, Ordering::SeqCst);
    b"PK\x03\x04 not really a jar".to_vec()
}

async fn start_mirror() -> Result<(SocketAddr, Mirror)> {
    let mirror = Mirror {
        hits: Arc::new(AtomicUsize::new(0)),
        last_modified: Arc::new(AtomicI64::new(1_000)),
        archive: Arc::new(pig_archive()?),
        broken: Arc::new(tgz(&[("pig/conf/a.txt", "a")])?),
    };
    let app = Router::new()
        .route("/pig.tgz", get(serve_archive))
        .route("/broken-pig.tgz", get(serve_broken))
        .route("/truncated.tgz", get(serve_truncated))
        .route("/jython_installer.jar", get(serve_jar))
        .with_state(mirror.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok((addr, mirror))
}

#[tokio::test]
async fn test_pig_install_is_idempotent() -> Result<()> {
    let (addr, mirror) = start_mirror().await?;
    let project = tempdir()?;
    let layout = Layout::new(project.path());
    let ctx = InstallContext::new(layout.clone(), Duration::from_secs(5))?;
    let pig = PigInstaller::new(&layout, format!("http://{addr}/pig.tgz"));

    assert!(!pig.is_installed());
    pig.install(&ctx).await?;
    assert!(pig.command().is_file());
    assert_eq!(mirror.hits(), 1);
    let recorded = ctx.ledger.lookup(PigInstaller::ID).expect("install recorded");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(pig.command())?.permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    // Second install: no request, record untouched.
    pig.install(&ctx).await?;
    assert_eq!(mirror.hits(), 1);
    assert_eq!(ctx.ledger.lookup(PigInstaller::ID), Some(recorded));

    // Neither the archive nor the staging tree is left behind.
    assert_eq!(entries(&layout.install_root)?, vec!["pig".to_string()]);
    Ok(())
}

fn entries(dir: &std::path::Path) -> Result<Vec<String>> {
    let mut names = std::fs::read_dir(dir)?
        .map(|e| Ok(e?.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

#[tokio::test]
async fn test_archive_without_launcher_is_refetched() -> Result<()> {
    let (addr, mirror) = start_mirror().await?;
    let project = tempdir()?;
    let layout = Layout::new(project.path());
    let ctx = InstallContext::new(layout.clone(), Duration::from_secs(5))?;
    let broken = PigInstaller::new(&layout, format!("http://{addr}/broken-pig.tgz"));

    let err = broken.install(&ctx).await.unwrap_err();
    assert!(matches!(err, SandboxError::Io { .. }), "got {err:?}");
    assert!(!broken.is_installed());
    assert!(!layout.pig_dir().exists());
    assert!(ctx.ledger.needs_install(PigInstaller::ID));
    assert!(entries(&layout.install_root)?.is_empty());

    // The failed attempt is not mistaken for an install.
    assert!(broken.install(&ctx).await.is_err());
    assert_eq!(mirror.hits(), 2);

    let pig = PigInstaller::new(&layout, format!("http://{addr}/pig.tgz"));
    pig.install(&ctx).await?;
    assert!(pig.command().is_file());
    assert_eq!(mirror.hits(), 3);
    Ok(())
}

#[tokio::test]
async fn test_truncated_download_is_a_fetch_error() -> Result<()> {
    let (addr, mirror) = start_mirror().await?;
    let project = tempdir()?;
    let layout = Layout::new(project.path());
    let ctx = InstallContext::new(layout.clone(), Duration::from_secs(5))?;
    let pig = PigInstaller::new(&layout, format!("http://{addr}/truncated.tgz"));

    let err = pig.install(&ctx).await.unwrap_err();
    assert!(matches!(err, SandboxError::Fetch { .. }), "got {err:?}");
    assert_eq!(mirror.hits(), 1);
    assert!(!pig.is_installed());
    assert!(ctx.ledger.needs_install(PigInstaller::ID));
    assert!(entries(&layout.install_root)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_jython_installer_removed_when_java_fails_to_launch() -> Result<()> {
    let (addr, mirror) = start_mirror().await?;
    let project = tempdir()?;
    let layout = Layout::new(project.path());
    let ctx = InstallContext::new(layout.clone(), Duration::from_secs(5))?;
    let jython = JythonInstaller::new(&layout, format!("http://{addr}/jython_installer.jar"));
    let java = JavaHome {
        home: project.path().join("no-java"),
        binary: project.path().join("no-java/bin/java"),
    };

    let err = jython.install(&ctx, &java).await.unwrap_err();
    assert!(matches!(err, SandboxError::Io { .. }), "got {err:?}");
    assert_eq!(mirror.hits(), 1);
    assert!(entries(&layout.install_root)?.is_empty());
    assert!(ctx.ledger.needs_install(JythonInstaller::ID));
    Ok(())
}

#[tokio::test]
async fn test_update_detection_against_last_modified() -> Result<()> {
    let (addr, mirror) = start_mirror().await?;
    let url = format!("http://{addr}/pig.tgz");
    let project = tempdir()?;
    let layout = Layout::new(project.path());
    let ctx = InstallContext::new(layout.clone(), Duration::from_secs(5))?;
    let ledger = InstallLedger::new(&layout.install_root);

    // No record is not an update, and needs no network.
    assert!(!ledger.needs_update("jython", &url, &ctx.fetcher).await?);
    assert_eq!(mirror.hits(), 0);

    ledger.record_at("jython", 1_000)?;
    mirror.last_modified.store(1_000, Ordering::SeqCst);
    assert!(!ledger.needs_update("jython", &url, &ctx.fetcher).await?);

    mirror.last_modified.store(999, Ordering::SeqCst);
    assert!(!ledger.needs_update("jython", &url, &ctx.fetcher).await?);

    mirror.last_modified.store(1_001, Ordering::SeqCst);
    assert!(ledger.needs_update("jython", &url, &ctx.fetcher).await?);
    Ok(())
}

#[tokio::test]
async fn test_failed_fetch_records_nothing() -> Result<()> {
    let (addr, _mirror) = start_mirror().await?;
    let project = tempdir()?;
    let layout = Layout::new(project.path());
    let ctx = InstallContext::new(layout.clone(), Duration::from_secs(5))?;
    let pig = PigInstaller::new(&layout, format!("http://{addr}/missing.tgz"));

    let err = pig.install(&ctx).await.unwrap_err();
    assert!(matches!(err, SandboxError::Fetch { .. }), "got {err:?}");
    assert!(ctx.ledger.needs_install(PigInstaller::ID));
    assert!(!pig.is_installed());
    Ok(())
}

#[tokio::test]
async fn test_engine_component_has_no_update_path() -> Result<()> {
    let (addr, mirror) = start_mirror().await?;
    let project = tempdir()?;
    let layout = Layout::new(project.path());
    let ctx = InstallContext::new(layout.clone(), Duration::from_secs(5))?;
    let component = Component::Pig(PigInstaller::new(&layout, format!("http://{addr}/pig.tgz")));

    let mut installed = Installed::default();
    component.install(&ctx, &mut installed).await?;
    assert!(component.is_installed());
    assert_eq!(installed.pig_command, Some(layout.pig_dir().join("bin").join("pig")));

    mirror.last_modified.store(i64::from(u32::MAX), Ordering::SeqCst);
    assert!(!component.needs_update(&ctx).await?);
    component.update(&ctx, &mut installed).await?;
    assert_eq!(mirror.hits(), 1);
    Ok(())
}
