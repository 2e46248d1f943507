//! TLS 1.2+ acceptor configuration, used when `ssl_cert`/`ssl_key` are both
//! set. Built on `rustls`/`tokio-rustls`, a pure-Rust TLS stack, with ALPN
//! restricted to `http/1.1`.
use std::path::Path;
use std::sync::Arc;

use rustls::server::ServerConfig;
use rustls::{Certificate, PrivateKey};
use tokio_rustls::TlsAcceptor;

use storage_util::error::{Error, Result};

pub fn build_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
	let certs = load_certs(cert_path)?;
	let key = load_key(key_path)?;

	let mut config = ServerConfig::builder()
		.with_safe_default_cipher_suites()
		.with_safe_default_kx_groups()
		.with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
		.map_err(|e| Error::Validation(e.to_string()))?
		.with_no_client_auth()
		.with_single_cert(certs, key)
		.map_err(|e| Error::Validation(e.to_string()))?;

	// HTTP/2 disabled: only advertise HTTP/1.1 over ALPN.
	config.alpn_protocols = vec![b"http/1.1".to_vec()];

	Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
	let file = std::fs::File::open(path)?;
	let mut reader = std::io::BufReader::new(file);
	let certs = rustls_pemfile::certs(&mut reader)
		.map_err(|e| Error::Validation(e.to_string()))?
		.into_iter()
		.map(Certificate)
		.collect();
	Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKey> {
	let file = std::fs::File::open(path)?;
	let mut reader = std::io::BufReader::new(file);
	let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
		.map_err(|e| Error::Validation(e.to_string()))?;
	let key = keys.pop().ok_or_else(|| Error::Validation("no private key found".into()))?;
	Ok(PrivateKey(key))
}
