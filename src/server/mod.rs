pub mod api;
pub mod error;

use crate::cli::Args;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use log::{ error, info };
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

pub use api::{ create_router, AppState };

pub struct Server {
    addr: SocketAddr,
    tls: Option<(PathBuf, PathBuf)>,
    router: Router,
}

impl Server {
    pub fn new(args: &Args, state: AppState) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let addr = args.server_addr.parse::<SocketAddr>()?;
        let tls = match (args.enable_tls, &args.tls_cert_path, &args.tls_key_path) {
            (true, Some(cert), Some(key)) => Some((cert.into(), key.into())),
            (true, _, _) => {
                return Err("--enable-tls requires both --tls-cert-path and --tls-key-path".into());
            }
            _ => None,
        };

        Ok(Self {
            addr,
            tls,
            router: create_router(state, args.static_dir.as_deref()),
        })
    }

    /// Serves until the listener fails.
    pub async fn run(self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let app = self.router.into_make_service();

        if let Some((cert_path, key_path)) = self.tls {
            let tls_config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
            info!("Starting HTTPS server on: https://{}", self.addr);
            axum_server::bind_rustls(self.addr, tls_config).serve(app).await.map_err(|e| {
                error!("HTTPS server error: {}", e);
                e
            })?;
        } else {
            let listener = tokio::net::TcpListener::bind(self.addr).await.map_err(|e| {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", self.addr, e);
                e
            })?;
            info!("Starting HTTP server on: http://{}", self.addr);
            axum::serve(listener, app).await?;
        }

        Ok(())
    }
}
