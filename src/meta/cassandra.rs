//! Cassandra/ScyllaDB `MetaStore` backend: four tables (`objects`,
//! `submissions`, `results`, `config`), an "insert on first submission,
//! update afterwards" object-write rule, and a recovery lock implemented as
//! an explicit state machine around transient query errors.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use scylla::transport::errors::QueryError;
use scylla::{IntoTypedRows, Session, SessionBuilder};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use storage_util::error::{Error, Result};

use crate::model::{ConfigEntry, Object, ObjectType, ResultRecord, Submission};
use crate::store::MetaStore;

const OPERATION_TIMEOUT: Duration = Duration::from_secs(20);
const RECOVERY_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Tracks whether the cluster connection is known-good. `Recovering` blocks
/// new operations behind a `RwLock` write-guard until a background task
/// reconnects, mirroring the original's `recoverLock *sync.RWMutex` but
/// without relying on a panic to notice the connection dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Healthy,
	Recovering,
}

pub struct CassandraMetaStore {
	session: RwLock<Arc<Session>>,
	state: RwLock<State>,
	nodes: Vec<String>,
	keyspace: String,
}

impl CassandraMetaStore {
	pub async fn connect(nodes: Vec<String>, keyspace: String) -> Result<Self> {
		let session = build_session(&nodes, &keyspace).await?;
		Ok(CassandraMetaStore {
			session: RwLock::new(Arc::new(session)),
			state: RwLock::new(State::Healthy),
			nodes,
			keyspace,
		})
	}

	/// Runs `f` against the current session, timing out after
	/// [`OPERATION_TIMEOUT`]. On a transient failure, flips to `Recovering`
	/// and spawns reconnection; callers see `Error::Transient` and may retry.
	async fn with_session<F, T>(&self, f: F) -> Result<T>
	where
		F: for<'a> FnOnce(
			&'a Session,
		) -> std::pin::Pin<
			Box<dyn std::future::Future<Output = std::result::Result<T, QueryError>> + Send + 'a>,
		>,
	{
		if *self.state.read().await == State::Recovering {
			return Err(Error::Transient("cassandra session is recovering".into()));
		}

		let session = self.session.read().await.clone();
		let result = tokio::time::timeout(OPERATION_TIMEOUT, f(&session)).await;

		match result {
			Ok(Ok(value)) => Ok(value),
			Ok(Err(e)) => {
				if is_transient(&e) {
					self.begin_recovery().await;
					Err(Error::Transient(e.to_string()))
				} else {
					Err(Error::Backend(e.to_string()))
				}
			}
			Err(_) => {
				self.begin_recovery().await;
				Err(Error::Transient("cassandra query timed out".into()))
			}
		}
	}

	async fn begin_recovery(&self) {
		let mut state = self.state.write().await;
		if *state == State::Recovering {
			return;
		}
		*state = State::Recovering;
		drop(state);

		let nodes = self.nodes.clone();
		let keyspace = self.keyspace.clone();
		loop {
			tokio::time::sleep(RECOVERY_RETRY_INTERVAL).await;
			match build_session(&nodes, &keyspace).await {
				Ok(fresh) => {
					*self.session.write().await = Arc::new(fresh);
					*self.state.write().await = State::Healthy;
					info!("cassandra session recovered");
					return;
				}
				Err(e) => warn!("cassandra recovery attempt failed: {}", e),
			}
		}
	}
}

async fn build_session(nodes: &[String], keyspace: &str) -> Result<Session> {
	SessionBuilder::new()
		.known_nodes(nodes)
		.use_keyspace(keyspace, false)
		.build()
		.await
		.map_err(|e| Error::Transient(e.to_string()))
}

/// Replaces the original's panic-on-`gocql.ErrTimeoutNoResponse` detection
/// with an explicit predicate over scylla's error type.
fn is_transient(e: &QueryError) -> bool {
	matches!(
		e,
		QueryError::RequestTimeout(_)
			| QueryError::IoError(_)
			| QueryError::ConnectionPoolError(_)
			| QueryError::TimeoutError
	)
}

const CREATE_OBJECTS: &str = "CREATE TABLE objects (\
	sha256 text PRIMARY KEY, md5 text, sha1 text, mime text, object_type text, \
	source set<text>, object_name set<text>, submissions set<text>, created timestamp)";
const CREATE_SUBMISSIONS: &str = "CREATE TABLE submissions (\
	id uuid PRIMARY KEY, sha256 text, user_id text, source text, name text, \
	date_time timestamp, tags list<text>, comment text)";
const CREATE_SUBMISSIONS_BY_OBJECT_INDEX: &str =
	"CREATE CUSTOM INDEX submissions_sha256_idx ON submissions (sha256) \
	USING 'org.apache.cassandra.index.sasi.SASIIndex'";
const CREATE_RESULTS: &str = "CREATE TABLE results (\
	id uuid PRIMARY KEY, sha256 text, schema_version text, service_name text, \
	service_version text, service_config text, object_type text, \
	object_category list<text>, results blob, tags list<text>, \
	execution_time timestamp, watchguard_status text, watchguard_log list<text>, \
	watchguard_version text)";
const CREATE_CONFIG: &str =
	"CREATE TABLE config (path text PRIMARY KEY, file_contents blob)";

#[async_trait]
impl MetaStore for CassandraMetaStore {
	async fn setup_schema(&self) -> Result<()> {
		for stmt in [
			CREATE_OBJECTS,
			CREATE_SUBMISSIONS,
			CREATE_SUBMISSIONS_BY_OBJECT_INDEX,
			CREATE_RESULTS,
			CREATE_CONFIG,
		] {
			let stmt = stmt.to_string();
			self.with_session(move |s| Box::pin(async move { s.query(stmt, &[]).await.map(|_| ()) }))
				.await
				.map_err(|e| {
					if matches!(e, Error::Backend(ref msg) if msg.contains("AlreadyExists")) {
						Error::AlreadyExists("cassandra schema".into())
					} else {
						e
					}
				})?;
		}
		Ok(())
	}

	async fn store_submission(&self, submission: Submission) -> Result<Uuid> {
		let id = submission.id;
		self.with_session(move |s| {
			Box::pin(async move {
				s.query(
					"INSERT INTO submissions (id, sha256, user_id, source, name, date_time, tags, comment) \
					 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
					(
						submission.id,
						submission.sha256,
						submission.user_id,
						submission.source,
						submission.name,
						submission.date_time.timestamp_millis(),
						submission.tags,
						submission.comment,
					),
				)
				.await
				.map(|_| ())
			})
		})
		.await?;
		Ok(id)
	}

	async fn store_object(&self, object: &Object) -> Result<bool> {
		let existing = self.submissions_for(&object.sha256).await?;
		if existing.is_empty() {
			return Err(Error::OrphanWrite(object.sha256.clone()));
		}
		let inserted = existing.len() == 1;

		let mut object = object.clone();
		object.source = existing.iter().map(|s| s.source.clone()).collect();
		object.object_name = existing.iter().map(|s| s.name.clone()).collect();
		object.submissions = existing.iter().map(|s| s.id.to_string()).collect();

		self.with_session(move |s| {
			Box::pin(async move {
				s.query(
					"INSERT INTO objects (sha256, md5, sha1, mime, object_type, source, object_name, submissions, created) \
					 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
					(
						object.sha256,
						object.md5,
						object.sha1,
						object.mime,
						object_type_str(object.object_type),
						object.source.into_iter().collect::<Vec<_>>(),
						object.object_name.into_iter().collect::<Vec<_>>(),
						object.submissions.into_iter().collect::<Vec<_>>(),
						object.created.timestamp_millis(),
					),
				)
				.await
				.map(|_| ())
			})
		})
		.await?;
		Ok(inserted)
	}

	async fn update_object(&self, sha256: &str) -> Result<()> {
		let submissions = self.submissions_for(sha256).await?;
		let source: Vec<String> = submissions.iter().map(|s| s.source.clone()).collect();
		let object_name: Vec<String> = submissions.iter().map(|s| s.name.clone()).collect();
		let ids: Vec<String> = submissions.iter().map(|s| s.id.to_string()).collect();
		let sha256 = sha256.to_string();
		self.with_session(move |s| {
			Box::pin(async move {
				s.query(
					"UPDATE objects SET source = ?, object_name = ?, submissions = ? WHERE sha256 = ?",
					(source, object_name, ids, sha256),
				)
				.await
				.map(|_| ())
			})
		})
		.await
	}

	async fn get_object(&self, sha256: &str) -> Result<Object> {
		let sha256 = sha256.to_string();
		let rows = self
			.with_session(move |s| {
				Box::pin(async move {
					s.query(
						"SELECT sha256, md5, sha1, mime, object_type, source, object_name, submissions, created \
						 FROM objects WHERE sha256 = ?",
						(sha256,),
					)
					.await
				})
			})
			.await?;

		let row = rows
			.rows
			.unwrap_or_default()
			.into_typed::<(
				String,
				String,
				String,
				String,
				String,
				Vec<String>,
				Vec<String>,
				Vec<String>,
				i64,
			)>()
			.next()
			.ok_or(Error::NotFound)?
			.map_err(|e| Error::Backend(e.to_string()))?;

		Ok(Object {
			sha256: row.0,
			md5: row.1,
			sha1: row.2,
			mime: row.3,
			object_type: object_type_from_str(&row.4),
			source: row.5.into_iter().collect(),
			object_name: row.6.into_iter().collect(),
			submissions: row.7.into_iter().collect(),
			created: millis_to_datetime(row.8),
		})
	}

	async fn get_submission(&self, id: Uuid) -> Result<Submission> {
		let rows = self
			.with_session(move |s| {
				Box::pin(async move {
					s.query(
						"SELECT id, sha256, user_id, source, name, date_time, tags, comment \
						 FROM submissions WHERE id = ?",
						(id,),
					)
					.await
				})
			})
			.await?;

		let row = rows
			.rows
			.unwrap_or_default()
			.into_typed::<(Uuid, String, String, String, String, i64, Vec<String>, String)>()
			.next()
			.ok_or(Error::NotFound)?
			.map_err(|e| Error::Backend(e.to_string()))?;

		Ok(Submission {
			id: row.0,
			sha256: row.1,
			user_id: row.2,
			source: row.3,
			name: row.4,
			date_time: millis_to_datetime(row.5),
			tags: row.6,
			comment: row.7,
		})
	}

	async fn get_result(&self, id: Uuid) -> Result<ResultRecord> {
		let rows = self
			.with_session(move |s| {
				Box::pin(async move {
					s.query(
						"SELECT id, sha256, schema_version, service_name, service_version, service_config, \
						 object_type, object_category, results, tags, execution_time, watchguard_status, \
						 watchguard_log, watchguard_version FROM results WHERE id = ?",
						(id,),
					)
					.await
				})
			})
			.await?;

		#[allow(clippy::type_complexity)]
		let row = rows
			.rows
			.unwrap_or_default()
			.into_typed::<(
				Uuid,
				String,
				String,
				String,
				String,
				String,
				String,
				Vec<String>,
				Vec<u8>,
				Vec<String>,
				i64,
				String,
				Vec<String>,
				String,
			)>()
			.next()
			.ok_or(Error::NotFound)?
			.map_err(|e| Error::Backend(e.to_string()))?;

		Ok(ResultRecord {
			id: row.0,
			sha256: row.1,
			schema_version: row.2,
			service_name: row.3,
			service_version: row.4,
			service_config: row.5,
			object_type: row.6,
			object_category: row.7,
			results: row.8,
			tags: row.9,
			execution_time: millis_to_datetime(row.10),
			watchguard_status: row.11,
			watchguard_log: row.12,
			watchguard_version: row.13,
		})
	}

	async fn get_config(&self, path: &str) -> Result<ConfigEntry> {
		let path = path.to_string();
		let rows = self
			.with_session(move |s| {
				Box::pin(async move {
					s.query("SELECT path, file_contents FROM config WHERE path = ?", (path,))
						.await
				})
			})
			.await?;

		let row = rows
			.rows
			.unwrap_or_default()
			.into_typed::<(String, Vec<u8>)>()
			.next()
			.ok_or(Error::NotFound)?
			.map_err(|e| Error::Backend(e.to_string()))?;

		Ok(ConfigEntry {
			path: row.0,
			file_contents: row.1,
		})
	}

	async fn store_result(&self, result: ResultRecord) -> Result<Uuid> {
		let id = result.id;
		if result.results.len() > 16 * 1024 * 1024 - 7424 {
			return Err(Error::Oversize(format!(
				"result row for {} exceeds cassandra's row size limit",
				result.sha256
			)));
		}
		self.with_session(move |s| {
			Box::pin(async move {
				s.query(
					"INSERT INTO results (id, sha256, schema_version, service_name, service_version, \
					 service_config, object_type, object_category, results, tags, execution_time, \
					 watchguard_status, watchguard_log, watchguard_version) \
					 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
					(
						result.id,
						result.sha256,
						result.schema_version,
						result.service_name,
						result.service_version,
						result.service_config,
						result.object_type,
						result.object_category,
						result.results,
						result.tags,
						result.execution_time.timestamp_millis(),
						result.watchguard_status,
						result.watchguard_log,
						result.watchguard_version,
					),
				)
				.await
				.map(|_| ())
			})
		})
		.await?;
		Ok(id)
	}

	async fn store_config(&self, config: ConfigEntry) -> Result<()> {
		self.with_session(move |s| {
			Box::pin(async move {
				s.query(
					"INSERT INTO config (path, file_contents) VALUES (?, ?)",
					(config.path, config.file_contents),
				)
				.await
				.map(|_| ())
			})
		})
		.await
	}

	async fn delete_object(&self, sha256: &str) -> Result<()> {
		let sha256 = sha256.to_string();
		self.with_session(move |s| {
			Box::pin(async move {
				s.query("DELETE FROM objects WHERE sha256 = ?", (sha256,))
					.await
					.map(|_| ())
			})
		})
		.await
	}

	async fn delete_submission(&self, id: Uuid) -> Result<()> {
		self.with_session(move |s| {
			Box::pin(async move {
				s.query("DELETE FROM submissions WHERE id = ?", (id,))
					.await
					.map(|_| ())
			})
		})
		.await
	}

	async fn delete_all_submissions_of_object(&self, sha256: &str) -> Result<()> {
		for submission in self.submissions_for(sha256).await? {
			self.delete_submission(submission.id).await?;
		}
		Ok(())
	}

	async fn submissions_for(&self, sha256: &str) -> Result<Vec<Submission>> {
		let key = sha256.to_string();
		let rows = self
			.with_session(move |s| {
				Box::pin(async move {
					s.query(
						"SELECT id, sha256, user_id, source, name, date_time, tags, comment \
						 FROM submissions WHERE sha256 = ?",
						(key,),
					)
					.await
				})
			})
			.await?;

		let typed = rows
			.rows
			.unwrap_or_default()
			.into_typed::<(Uuid, String, String, String, String, i64, Vec<String>, String)>();

		let mut out = Vec::new();
		for row in typed {
			let row = row.map_err(|e| Error::Backend(e.to_string()))?;
			out.push(Submission {
				id: row.0,
				sha256: row.1,
				user_id: row.2,
				source: row.3,
				name: row.4,
				date_time: millis_to_datetime(row.5),
				tags: row.6,
				comment: row.7,
			});
		}
		Ok(out)
	}

	async fn iterate_objects(&self, tx: mpsc::Sender<(String, DateTime<Utc>)>) -> Result<()> {
		let rows = self
			.with_session(|s| Box::pin(async move { s.query("SELECT sha256, created FROM objects", &[]).await }))
			.await?;

		let typed = rows.rows.unwrap_or_default().into_typed::<(String, i64)>();
		for row in typed {
			let (sha256, created) = row.map_err(|e| Error::Backend(e.to_string()))?;
			if tx.send((sha256, millis_to_datetime(created))).await.is_err() {
				break;
			}
		}
		Ok(())
	}

	async fn iterate_submissions_first_seen(&self) -> Result<HashMap<String, DateTime<Utc>>> {
		let rows = self
			.with_session(|s| {
				Box::pin(async move { s.query("SELECT sha256, date_time FROM submissions", &[]).await })
			})
			.await?;

		let typed = rows.rows.unwrap_or_default().into_typed::<(String, i64)>();
		let mut out: HashMap<String, DateTime<Utc>> = HashMap::new();
		for row in typed {
			let (sha256, date_time) = row.map_err(|e| Error::Backend(e.to_string()))?;
			let ts = millis_to_datetime(date_time);
			out.entry(sha256)
				.and_modify(|existing| {
					if ts < *existing {
						*existing = ts;
					}
				})
				.or_insert(ts);
		}
		Ok(out)
	}
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
	Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

fn object_type_str(t: ObjectType) -> &'static str {
	match t {
		ObjectType::File => "file",
		ObjectType::Domain => "domain",
		ObjectType::Ip => "ip",
		ObjectType::Email => "email",
		ObjectType::Generic => "generic",
	}
}

fn object_type_from_str(s: &str) -> ObjectType {
	match s {
		"domain" => ObjectType::Domain,
		"ip" => ObjectType::Ip,
		"email" => ObjectType::Email,
		"generic" => ObjectType::Generic,
		_ => ObjectType::File,
	}
}
