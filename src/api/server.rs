//! Binds and runs the Ingest-HTTP server: one hyper listener, optionally
//! behind TLS, serving every request off the shared `ApiContext`.
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;

use storage_util::error::{Error, Result};

use crate::context::ApiContext;
use crate::handlers::route;

pub async fn run(
	ctx: Arc<ApiContext>,
	bind_addr: SocketAddr,
	ssl_cert: Option<&Path>,
	ssl_key: Option<&Path>,
) -> Result<()> {
	match (ssl_cert, ssl_key) {
		(Some(cert), Some(key)) => run_tls(ctx, bind_addr, cert, key).await,
		_ => run_plain(ctx, bind_addr).await,
	}
}

async fn run_plain(ctx: Arc<ApiContext>, bind_addr: SocketAddr) -> Result<()> {
	let make_svc = make_service_fn(move |_conn: &AddrStream| {
		let ctx = ctx.clone();
		async move {
			Ok::<_, Infallible>(service_fn(move |req| {
				let ctx = ctx.clone();
				async move { Ok::<_, Infallible>(route(ctx, req).await) }
			}))
		}
	});

	info!("Ingest-HTTP listening on {}", bind_addr);
	Server::bind(&bind_addr)
		.serve(make_svc)
		.await
		.map_err(|e| Error::Backend(e.to_string()))
}

async fn run_tls(ctx: Arc<ApiContext>, bind_addr: SocketAddr, cert: &Path, key: &Path) -> Result<()> {
	use tokio::net::TcpListener;

	let acceptor = crate::tls::build_acceptor(cert, key)?;
	let listener = TcpListener::bind(bind_addr).await?;
	info!("Ingest-HTTP listening on {} (TLS)", bind_addr);

	loop {
		let (stream, _peer) = listener.accept().await?;
		let acceptor = acceptor.clone();
		let ctx = ctx.clone();

		tokio::spawn(async move {
			let tls_stream = match acceptor.accept(stream).await {
				Ok(s) => s,
				Err(e) => {
					warn!("TLS handshake failed: {}", e);
					return;
				}
			};

			let service = service_fn(move |req| {
				let ctx = ctx.clone();
				async move { Ok::<_, Infallible>(route(ctx, req).await) }
			});

			if let Err(e) = hyper::server::conn::Http::new()
				.http1_only(true)
				.serve_connection(tls_stream, service)
				.await
			{
				warn!("connection error: {}", e);
			}
		});
	}
}
