use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use clap::Parser;
use identity::jose::TokenIssuer;
use identity::middleware::openapi::{Pipeline, Schema, validate};
use identity::repository::Repository;
use identity::router::create_router;
use identity::service::{IdentityService, IdentityServiceParams};
use rand::RngCore;
use shared::error::CommonError;
use tracing::{info, warn};

use crate::commands::manifests;

#[derive(Debug, Parser)]
pub struct ServeParams {
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Namespace holding the server-global resources.
    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Directory of resource manifests loaded at startup.
    #[arg(long)]
    pub manifest_dir: Option<PathBuf>,

    /// PEM-encoded RSA signing key. Generated per process when absent, which
    /// breaks multi-replica deployments.
    #[arg(long)]
    pub signing_key_file: Option<PathBuf>,

    /// Base64-encoded 256-bit envelope sealing key. Random when absent.
    #[arg(long)]
    pub sealing_key_file: Option<PathBuf>,
}

fn load_issuer(params: &ServeParams) -> Result<TokenIssuer, CommonError> {
    let Some(signing_key_file) = &params.signing_key_file else {
        warn!("no signing key configured, generating an ephemeral one");
        return TokenIssuer::generate();
    };

    let pem = std::fs::read_to_string(signing_key_file)?;

    let sealing_key = match &params.sealing_key_file {
        Some(path) => {
            let encoded = std::fs::read_to_string(path)?;

            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| CommonError::Validation {
                    msg: format!("sealing key is not valid base64: {e}"),
                })?;

            bytes.try_into().map_err(|_| CommonError::Validation {
                msg: "sealing key must be exactly 32 bytes".to_string(),
            })?
        }
        None => {
            warn!("no sealing key configured, envelopes will not survive a restart");

            let mut key = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut key);
            key
        }
    };

    TokenIssuer::from_private_key_pem(&pem, sealing_key)
}

pub async fn cmd_serve(params: ServeParams) -> Result<(), CommonError> {
    let repository = Repository::new();

    if let Some(dir) = &params.manifest_dir {
        let count = manifests::load_dir(&repository, dir).await?;
        info!(count, dir = %dir.display(), "loaded resource manifests");
    }

    let issuer = Arc::new(load_issuer(&params)?);

    let service = IdentityService::new(IdentityServiceParams {
        namespace: params.namespace.clone(),
        repository,
        issuer,
    })?;

    let (router, api) = create_router().split_for_parts();

    let document = serde_json::to_value(&api)?;
    let schema = Arc::new(Schema::from_document(&document)?);

    let pipeline = Pipeline {
        schema,
        authenticator: Arc::new(service.authenticator()),
    };

    let app = router
        .layer(axum::middleware::from_fn_with_state(pipeline, validate))
        .with_state(service);

    let addr: SocketAddr = format!("{}:{}", params.host, params.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(%addr, "identity service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
}
