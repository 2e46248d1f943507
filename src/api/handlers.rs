//! Request routing and individual endpoint handlers.
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use hyper::{Body, Method, Request, Response, StatusCode};

use storage_meta::model::ConfigEntry;
use storage_util::error::Error;

use crate::context::ApiContext;
use crate::envelope;
use crate::upload::{store_sample, UploadFields};

/// Fields larger than this spill from the in-memory buffer to a temp file
/// rather than growing the buffer without bound.
const MULTIPART_MEMORY_LIMIT: usize = 20 * 1024 * 1024;

/// Reads a multipart field in chunks, buffering in memory up to
/// [`MULTIPART_MEMORY_LIMIT`] and spilling any remainder to a temp file.
async fn read_field(mut field: multer::Field<'_>) -> Result<Bytes, HandlerError> {
	let mut buf: Vec<u8> = Vec::new();
	let mut spill: Option<tempfile::NamedTempFile> = None;

	while let Some(chunk) = field
		.chunk()
		.await
		.map_err(|e| HandlerError::Validation(e.to_string()))?
	{
		match spill.as_mut() {
			Some(file) => {
				file.write_all(&chunk)
					.map_err(|e| HandlerError::Validation(e.to_string()))?;
			}
			None => {
				buf.extend_from_slice(&chunk);
				if buf.len() > MULTIPART_MEMORY_LIMIT {
					let mut file = tempfile::NamedTempFile::new()
						.map_err(|e| HandlerError::Validation(e.to_string()))?;
					file.write_all(&buf)
						.map_err(|e| HandlerError::Validation(e.to_string()))?;
					buf.clear();
					spill = Some(file);
				}
			}
		}
	}

	match spill {
		Some(mut file) => {
			file.flush().map_err(|e| HandlerError::Validation(e.to_string()))?;
			let mut out = Vec::new();
			file.reopen()
				.map_err(|e| HandlerError::Validation(e.to_string()))?
				.read_to_end(&mut out)
				.map_err(|e| HandlerError::Validation(e.to_string()))?;
			Ok(Bytes::from(out))
		}
		None => Ok(Bytes::from(buf)),
	}
}

pub async fn route(ctx: Arc<ApiContext>, req: Request<Body>) -> Response<Body> {
	let method = req.method().clone();
	let path = req.uri().path().to_string();

	let result = match (&method, path.as_str()) {
		(&Method::PUT, "/samples/") | (&Method::PUT, "/samples") => upload_sample(&ctx, req).await,
		(&Method::GET, p) if p.starts_with("/samples/") => {
			download_sample(&ctx, &p["/samples/".len()..]).await
		}
		(&Method::GET, p) if p.starts_with("/config/") => {
			get_config(&ctx, &p["/config/".len()..]).await
		}
		(&Method::POST, p) if p.starts_with("/config/") => {
			post_config(&ctx, &p["/config/".len()..], req).await
		}
		(&Method::GET, "/maintenance/listOrphans") => list_orphans(&ctx).await,
		(&Method::POST, "/maintenance/deleteOrphans") => delete_orphans(&ctx).await,
		_ => Err(HandlerError::NotFound),
	};

	match result {
		Ok(response) => response,
		Err(HandlerError::Store(e)) => envelope::failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
		Err(HandlerError::Validation(msg)) => envelope::failure(StatusCode::INTERNAL_SERVER_ERROR, msg),
		Err(HandlerError::NotFound) => envelope::failure(StatusCode::NOT_FOUND, "not found"),
	}
}

enum HandlerError {
	Store(Error),
	Validation(String),
	NotFound,
}

impl From<Error> for HandlerError {
	fn from(e: Error) -> Self {
		HandlerError::Store(e)
	}
}

async fn upload_sample(ctx: &ApiContext, req: Request<Body>) -> Result<Response<Body>, HandlerError> {
	let boundary = multer::parse_boundary(
		req.headers()
			.get(hyper::header::CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.unwrap_or(""),
	)
	.map_err(|e| HandlerError::Validation(e.to_string()))?;

	let mut multipart = multer::Multipart::new(req.into_body(), boundary);

	let mut user_id = None;
	let mut source = None;
	let mut name = None;
	let mut date = None;
	let mut tags = Vec::new();
	let mut comment = String::new();
	let mut data = None;

	while let Some(field) = multipart
		.next_field()
		.await
		.map_err(|e| HandlerError::Validation(e.to_string()))?
	{
		match field.name().map(|s| s.to_string()).as_deref() {
			Some("user_id") => {
				user_id = Some(field.text().await.map_err(|e| HandlerError::Validation(e.to_string()))?)
			}
			Some("source") => {
				source = Some(field.text().await.map_err(|e| HandlerError::Validation(e.to_string()))?)
			}
			Some("name") => {
				name = Some(field.text().await.map_err(|e| HandlerError::Validation(e.to_string()))?)
			}
			Some("date") => {
				date = Some(field.text().await.map_err(|e| HandlerError::Validation(e.to_string()))?)
			}
			Some("tags") => {
				tags.push(field.text().await.map_err(|e| HandlerError::Validation(e.to_string()))?)
			}
			Some("comment") => {
				comment = field.text().await.map_err(|e| HandlerError::Validation(e.to_string()))?
			}
			Some("sample") => data = Some(read_field(field).await?),
			_ => {}
		}
	}

	let fields = UploadFields {
		user_id: user_id.unwrap_or_default(),
		source: source.unwrap_or_default(),
		name: name.unwrap_or_default(),
		date: date.unwrap_or_default(),
		tags,
		comment,
		data: data.unwrap_or_default(),
	};

	let outcome = store_sample(ctx, fields)
		.await
		.map_err(to_handler_error)?;
	Ok(envelope::success(outcome.object))
}

/// Validation errors surface as a 500 with a JSON failure body per
/// Every other failure maps to 500; only config lookups distinguish 404.
fn to_handler_error(e: Error) -> HandlerError {
	match e {
		Error::Validation(msg) => HandlerError::Validation(msg),
		other => HandlerError::Store(other),
	}
}

async fn download_sample(ctx: &ApiContext, sha256: &str) -> Result<Response<Body>, HandlerError> {
	let bytes = ctx.blob.get(sha256).await?;
	Ok(Response::builder()
		.status(StatusCode::OK)
		.header("content-type", "application/octet-stream")
		.header(
			"content-disposition",
			format!("attachment; filename=\"{}\"", sha256),
		)
		.body(Body::from(bytes))
		.expect("building a response from a fixed header set cannot fail"))
}

async fn get_config(ctx: &ApiContext, path: &str) -> Result<Response<Body>, HandlerError> {
	match ctx.meta.get_config(path).await {
		Ok(entry) => Ok(Response::builder()
			.status(StatusCode::OK)
			.header("content-type", "text/plain")
			.body(Body::from(entry.file_contents))
			.expect("building a response from a fixed header set cannot fail")),
		Err(Error::NotFound) => Err(HandlerError::NotFound),
		Err(e) => Err(HandlerError::Store(e)),
	}
}

async fn post_config(
	ctx: &ApiContext,
	path: &str,
	req: Request<Body>,
) -> Result<Response<Body>, HandlerError> {
	let boundary = multer::parse_boundary(
		req.headers()
			.get(hyper::header::CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.unwrap_or(""),
	)
	.map_err(|e| HandlerError::Validation(e.to_string()))?;

	let mut multipart = multer::Multipart::new(req.into_body(), boundary);
	let mut contents = None;
	while let Some(field) = multipart
		.next_field()
		.await
		.map_err(|e| HandlerError::Validation(e.to_string()))?
	{
		if field.name() == Some("config") {
			contents = Some(read_field(field).await?);
		}
	}

	let file_contents = contents.ok_or_else(|| HandlerError::Validation("config field is required".into()))?;
	ctx.meta
		.store_config(ConfigEntry {
			path: path.to_string(),
			file_contents: file_contents.to_vec(),
		})
		.await?;
	Ok(envelope::success_empty())
}

async fn list_orphans(ctx: &ApiContext) -> Result<Response<Body>, HandlerError> {
	let report = ctx.reconciler.classify().await?;
	Ok(envelope::success(report))
}

async fn delete_orphans(ctx: &ApiContext) -> Result<Response<Body>, HandlerError> {
	ctx.reconciler.delete_orphans().await?;
	Ok(Response::builder()
		.status(StatusCode::OK)
		.body(Body::from("OK\n"))
		.expect("building a response from a fixed header set cannot fail"))
}
