//! TLS termination and listener lifecycle
//!
//! The public listener speaks TLS 1.3 with server auth only. The cluster
//! listener additionally demands a client certificate chained to the
//! shared CA, so replication endpoints are unreachable without mTLS.
//! Both listeners share an [`axum_server::Handle`] for graceful drain.

use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MtlsFiles {
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Pick the process-level rustls provider once. With both ring (reqwest)
/// and aws-lc-rs (axum-server) in the dependency tree, rustls refuses to
/// guess.
fn ensure_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Serve the public router, with TLS when certificates are configured.
pub async fn serve_public(
    addr: SocketAddr,
    app: Router,
    tls: Option<TlsFiles>,
    handle: Handle,
) -> Result<(), ServerError> {
    ensure_crypto_provider();
    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    match tls {
        Some(files) => {
            info!(%addr, "Public listener up (TLS)");
            let config = RustlsConfig::from_pem_file(&files.cert_file, &files.key_file)
                .await
                .map_err(|e| ServerError::Tls(e.to_string()))?;
            axum_server::bind_rustls(addr, config)
                .handle(handle)
                .serve(service)
                .await?;
        }
        None => {
            info!(%addr, "Public listener up (plaintext)");
            axum_server::bind(addr).handle(handle).serve(service).await?;
        }
    }
    Ok(())
}

/// Serve the cluster router behind mandatory client-certificate auth.
pub async fn serve_cluster(
    addr: SocketAddr,
    app: Router,
    files: MtlsFiles,
    handle: Handle,
) -> Result<(), ServerError> {
    ensure_crypto_provider();
    let config = RustlsConfig::from_config(Arc::new(mtls_server_config(&files)?));
    info!(%addr, "Cluster listener up (mTLS)");
    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}

/// Serve the metrics router without TLS on a loopback-style listener.
pub async fn serve_metrics(
    addr: SocketAddr,
    app: Router,
    handle: Handle,
) -> Result<(), ServerError> {
    info!(%addr, "Metrics listener up");
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}

fn mtls_server_config(files: &MtlsFiles) -> Result<rustls::ServerConfig, ServerError> {
    let mut roots = RootCertStore::empty();
    let ca_file = std::fs::File::open(&files.ca_file)?;
    let mut reader = BufReader::new(ca_file);
    for cert in rustls_pemfile::certs(&mut reader) {
        roots
            .add(cert?)
            .map_err(|e| ServerError::Tls(e.to_string()))?;
    }
    if roots.is_empty() {
        return Err(ServerError::Tls(format!(
            "no CA certificates in {:?}",
            files.ca_file
        )));
    }

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| ServerError::Tls(e.to_string()))?;

    let cert_file = std::fs::File::open(&files.cert_file)?;
    let mut reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;

    let key_file = std::fs::File::open(&files.key_file)?;
    let mut reader = BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| ServerError::Tls(format!("no private key in {:?}", files.key_file)))?;

    rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))
}
