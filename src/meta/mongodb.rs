//! MongoDB `MetaStore` backend: four collections (`objects`, `submissions`,
//! `results`, `config`), a unique index on the natural key of each,
//! upsert-by-key semantics.
use std::collections::HashMap;

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use mongodb::options::{IndexOptions, ReplaceOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use tokio::sync::mpsc;
use uuid::Uuid;

use storage_util::error::{Error, Result};

use crate::model::{ConfigEntry, Object, ResultRecord, Submission};
use crate::store::MetaStore;

pub struct MongoMetaStore {
	db: Database,
}

impl MongoMetaStore {
	pub async fn connect(uri: &str, database: &str) -> Result<Self> {
		let client = Client::with_uri_str(uri)
			.await
			.map_err(|e| Error::Transient(e.to_string()))?;
		Ok(MongoMetaStore {
			db: client.database(database),
		})
	}

	fn objects(&self) -> Collection<ObjectDoc> {
		self.db.collection("objects")
	}
	fn submissions(&self) -> Collection<SubmissionDoc> {
		self.db.collection("submissions")
	}
	fn results(&self) -> Collection<ResultDoc> {
		self.db.collection("results")
	}
	fn configs(&self) -> Collection<ConfigEntry> {
		self.db.collection("config")
	}
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ObjectDoc {
	#[serde(rename = "_id")]
	sha256: String,
	md5: String,
	sha1: String,
	mime: String,
	object_type: String,
	source: Vec<String>,
	object_name: Vec<String>,
	submissions: Vec<String>,
	created: DateTime<Utc>,
}

fn object_type_str(t: crate::model::ObjectType) -> &'static str {
	use crate::model::ObjectType;
	match t {
		ObjectType::File => "file",
		ObjectType::Domain => "domain",
		ObjectType::Ip => "ip",
		ObjectType::Email => "email",
		ObjectType::Generic => "generic",
	}
}

fn object_type_from_str(s: &str) -> crate::model::ObjectType {
	use crate::model::ObjectType;
	match s {
		"domain" => ObjectType::Domain,
		"ip" => ObjectType::Ip,
		"email" => ObjectType::Email,
		"generic" => ObjectType::Generic,
		_ => ObjectType::File,
	}
}

impl From<Object> for ObjectDoc {
	fn from(o: Object) -> Self {
		ObjectDoc {
			sha256: o.sha256,
			md5: o.md5,
			sha1: o.sha1,
			mime: o.mime,
			object_type: object_type_str(o.object_type).to_string(),
			source: o.source.into_iter().collect(),
			object_name: o.object_name.into_iter().collect(),
			submissions: o.submissions.into_iter().collect(),
			created: o.created,
		}
	}
}

impl From<ObjectDoc> for Object {
	fn from(d: ObjectDoc) -> Self {
		Object {
			sha256: d.sha256,
			md5: d.md5,
			sha1: d.sha1,
			mime: d.mime,
			object_type: object_type_from_str(&d.object_type),
			source: d.source.into_iter().collect(),
			object_name: d.object_name.into_iter().collect(),
			submissions: d.submissions.into_iter().collect(),
			created: d.created,
		}
	}
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SubmissionDoc {
	#[serde(rename = "_id")]
	id: Uuid,
	sha256: String,
	user_id: String,
	source: String,
	name: String,
	date_time: DateTime<Utc>,
	tags: Vec<String>,
	comment: String,
}

impl From<Submission> for SubmissionDoc {
	fn from(s: Submission) -> Self {
		SubmissionDoc {
			id: s.id,
			sha256: s.sha256,
			user_id: s.user_id,
			source: s.source,
			name: s.name,
			date_time: s.date_time,
			tags: s.tags,
			comment: s.comment,
		}
	}
}

impl From<SubmissionDoc> for Submission {
	fn from(d: SubmissionDoc) -> Self {
		Submission {
			id: d.id,
			sha256: d.sha256,
			user_id: d.user_id,
			source: d.source,
			name: d.name,
			date_time: d.date_time,
			tags: d.tags,
			comment: d.comment,
		}
	}
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ResultDoc {
	#[serde(rename = "_id")]
	id: Uuid,
	sha256: String,
	schema_version: String,
	service_name: String,
	service_version: String,
	service_config: String,
	object_type: String,
	object_category: Vec<String>,
	#[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
	execution_time: DateTime<Utc>,
	results: bson::Binary,
	tags: Vec<String>,
	watchguard_status: String,
	watchguard_log: Vec<String>,
	watchguard_version: String,
}

impl From<ResultRecord> for ResultDoc {
	fn from(r: ResultRecord) -> Self {
		ResultDoc {
			id: r.id,
			sha256: r.sha256,
			schema_version: r.schema_version,
			service_name: r.service_name,
			service_version: r.service_version,
			service_config: r.service_config,
			object_type: r.object_type,
			object_category: r.object_category,
			execution_time: r.execution_time,
			results: bson::Binary {
				subtype: bson::spec::BinarySubtype::Generic,
				bytes: r.results,
			},
			tags: r.tags,
			watchguard_status: r.watchguard_status,
			watchguard_log: r.watchguard_log,
			watchguard_version: r.watchguard_version,
		}
	}
}

impl From<ResultDoc> for ResultRecord {
	fn from(d: ResultDoc) -> Self {
		ResultRecord {
			id: d.id,
			sha256: d.sha256,
			schema_version: d.schema_version,
			service_name: d.service_name,
			service_version: d.service_version,
			service_config: d.service_config,
			object_type: d.object_type,
			object_category: d.object_category,
			results: d.results.bytes,
			tags: d.tags,
			execution_time: d.execution_time,
			watchguard_status: d.watchguard_status,
			watchguard_log: d.watchguard_log,
			watchguard_version: d.watchguard_version,
		}
	}
}

fn mongo_err(e: mongodb::error::Error) -> Error {
	use mongodb::error::ErrorKind;
	match *e.kind {
		ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } => Error::Transient(e.to_string()),
		_ => Error::Backend(e.to_string()),
	}
}

#[async_trait]
impl MetaStore for MongoMetaStore {
	async fn setup_schema(&self) -> Result<()> {
		let unique = IndexOptions::builder().unique(true).build();

		self.submissions()
			.create_index(
				IndexModel::builder()
					.keys(doc! { "sha256": 1 })
					.options(None)
					.build(),
				None,
			)
			.await
			.map_err(mongo_err)?;

		self.results()
			.create_index(
				IndexModel::builder()
					.keys(doc! { "sha256": 1 })
					.options(unique.clone())
					.build(),
				None,
			)
			.await
			.map_err(mongo_err)?;

		Ok(())
	}

	async fn store_submission(&self, submission: Submission) -> Result<Uuid> {
		let id = submission.id;
		self.submissions()
			.insert_one(SubmissionDoc::from(submission), None)
			.await
			.map_err(mongo_err)?;
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

		self.objects()
			.replace_one(
				doc! { "_id": &object.sha256 },
				ObjectDoc::from(object),
				ReplaceOptions::builder().upsert(true).build(),
			)
			.await
			.map_err(mongo_err)?;
		Ok(inserted)
	}

	async fn update_object(&self, sha256: &str) -> Result<()> {
		let submissions = self.submissions_for(sha256).await?;
		let source: Vec<String> = submissions.iter().map(|s| s.source.clone()).collect();
		let object_name: Vec<String> = submissions.iter().map(|s| s.name.clone()).collect();
		let ids: Vec<String> = submissions.iter().map(|s| s.id.to_string()).collect();

		self.objects()
			.update_one(
				doc! { "_id": sha256 },
				doc! { "$set": { "source": source, "object_name": object_name, "submissions": ids } },
				None,
			)
			.await
			.map_err(mongo_err)?;
		Ok(())
	}

	async fn get_object(&self, sha256: &str) -> Result<Object> {
		self.objects()
			.find_one(doc! { "_id": sha256 }, None)
			.await
			.map_err(mongo_err)?
			.map(Object::from)
			.ok_or(Error::NotFound)
	}

	async fn get_submission(&self, id: Uuid) -> Result<Submission> {
		self.submissions()
			.find_one(doc! { "_id": id }, None)
			.await
			.map_err(mongo_err)?
			.map(Submission::from)
			.ok_or(Error::NotFound)
	}

	async fn get_result(&self, id: Uuid) -> Result<ResultRecord> {
		self.results()
			.find_one(doc! { "_id": id }, None)
			.await
			.map_err(mongo_err)?
			.map(ResultRecord::from)
			.ok_or(Error::NotFound)
	}

	async fn get_config(&self, path: &str) -> Result<ConfigEntry> {
		self.configs()
			.find_one(doc! { "path": path }, None)
			.await
			.map_err(mongo_err)?
			.ok_or(Error::NotFound)
	}

	async fn store_result(&self, result: ResultRecord) -> Result<Uuid> {
		let id = result.id;
		self.results()
			.insert_one(ResultDoc::from(result), None)
			.await
			.map_err(mongo_err)?;
		Ok(id)
	}

	async fn store_config(&self, config: ConfigEntry) -> Result<()> {
		self.configs()
			.replace_one(
				doc! { "path": &config.path },
				config,
				ReplaceOptions::builder().upsert(true).build(),
			)
			.await
			.map_err(mongo_err)?;
		Ok(())
	}

	async fn delete_object(&self, sha256: &str) -> Result<()> {
		let res = self
			.objects()
			.delete_one(doc! { "_id": sha256 }, None)
			.await
			.map_err(mongo_err)?;
		if res.deleted_count == 0 {
			return Err(Error::NotFound);
		}
		Ok(())
	}

	async fn delete_submission(&self, id: Uuid) -> Result<()> {
		let res = self
			.submissions()
			.delete_one(doc! { "_id": id }, None)
			.await
			.map_err(mongo_err)?;
		if res.deleted_count == 0 {
			return Err(Error::NotFound);
		}
		Ok(())
	}

	async fn delete_all_submissions_of_object(&self, sha256: &str) -> Result<()> {
		self.submissions()
			.delete_many(doc! { "sha256": sha256 }, None)
			.await
			.map_err(mongo_err)?;
		Ok(())
	}

	async fn submissions_for(&self, sha256: &str) -> Result<Vec<Submission>> {
		use futures::stream::TryStreamExt;
		let cursor = self
			.submissions()
			.find(doc! { "sha256": sha256 }, None)
			.await
			.map_err(mongo_err)?;
		let docs: Vec<SubmissionDoc> = cursor.try_collect().await.map_err(mongo_err)?;
		Ok(docs.into_iter().map(Submission::from).collect())
	}

	async fn iterate_objects(&self, tx: mpsc::Sender<(String, DateTime<Utc>)>) -> Result<()> {
		use futures::stream::TryStreamExt;
		let mut cursor = self.objects().find(doc! {}, None).await.map_err(mongo_err)?;
		while let Some(doc) = cursor.try_next().await.map_err(mongo_err)? {
			if tx.send((doc.sha256, doc.created)).await.is_err() {
				break;
			}
		}
		Ok(())
	}

	async fn iterate_submissions_first_seen(&self) -> Result<HashMap<String, DateTime<Utc>>> {
		use futures::stream::TryStreamExt;
		let mut cursor = self.submissions().find(doc! {}, None).await.map_err(mongo_err)?;
		let mut out: HashMap<String, DateTime<Utc>> = HashMap::new();
		while let Some(doc) = cursor.try_next().await.map_err(mongo_err)? {
			out.entry(doc.sha256)
				.and_modify(|ts| {
					if doc.date_time < *ts {
						*ts = doc.date_time;
					}
				})
				.or_insert(doc.date_time);
		}
		Ok(out)
	}
}
