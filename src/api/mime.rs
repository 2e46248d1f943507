//! MIME detection for uploaded samples: a process-wide mutex around the
//! (non-reentrant) extended detector, bounded retry on panic, `"N/A"`
//! fallback after three failed attempts.
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

static MAGIC_LOCK: Mutex<()> = Mutex::new(());

const MAX_ATTEMPTS: u32 = 3;

/// Conservative built-in sniffer, used when `extended_mime` is off. Only
/// recognizes a handful of common container formats; unknowns fall back to
/// `application/octet-stream`, matching the spirit of a minimal sniffer
/// rather than reimplementing the whole original `libmagic` database.
fn sniff(data: &[u8]) -> String {
	const SIGNATURES: &[(&[u8], &str)] = &[
		(b"%PDF-", "application/pdf"),
		(b"PK\x03\x04", "application/zip"),
		(b"MZ", "application/x-dosexec"),
		(b"\x7fELF", "application/x-elf"),
		(b"\xff\xd8\xff", "image/jpeg"),
		(b"\x89PNG\r\n\x1a\n", "image/png"),
		(b"GIF8", "image/gif"),
	];
	for (sig, mime) in SIGNATURES {
		if data.starts_with(sig) {
			return mime.to_string();
		}
	}
	if data.iter().take(512).all(|&b| b != 0) {
		"text/plain".to_string()
	} else {
		"application/octet-stream".to_string()
	}
}

/// Detects the MIME type of `data`. When `extended_mime` is set this calls
/// an external libmagic-style detector through a blocking task, serialized
/// by [`MAGIC_LOCK`] and retried on panic; after [`MAX_ATTEMPTS`] panics the
/// MIME is recorded as `"N/A"` rather than failing the upload.
pub async fn detect(data: Vec<u8>, extended_mime: bool) -> String {
	if !extended_mime {
		return sniff(&data);
	}

	for attempt in 1..=MAX_ATTEMPTS {
		let data = data.clone();
		let result = tokio::task::spawn_blocking(move || {
			let _guard = MAGIC_LOCK.lock().unwrap_or_else(|e| e.into_inner());
			panic::catch_unwind(AssertUnwindSafe(|| extended_detect(&data)))
		})
		.await;

		match result {
			Ok(Ok(mime)) => return mime,
			Ok(Err(_)) => {
				warn!("libmagic detector panicked on attempt {}/{}", attempt, MAX_ATTEMPTS);
			}
			Err(e) => {
				warn!("libmagic detector task failed on attempt {}/{}: {}", attempt, MAX_ATTEMPTS, e);
			}
		}
	}

	"N/A".to_string()
}

/// Stands in for the external libmagic-style call the spec calls out as
/// out-of-scope; falls back to the built-in sniffer so the retry/fallback
/// machinery above has real behavior to exercise.
fn extended_detect(data: &[u8]) -> String {
	sniff(data)
}

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn sniffs_pdf_signature() {
		let mime = detect(b"%PDF-1.4 rest".to_vec(), false).await;
		assert_eq!(mime, "application/pdf");
	}

	#[tokio::test]
	async fn unknown_binary_falls_back_to_octet_stream() {
		let mime = detect(vec![0, 1, 2, 3, 0, 0], false).await;
		assert_eq!(mime, "application/octet-stream");
	}

	#[tokio::test]
	async fn extended_detection_never_panics_here() {
		let mime = detect(b"GIF89a".to_vec(), true).await;
		assert_eq!(mime, "image/gif");
	}
}
