use crate::{
    config::Config,
    error::{Error, Result},
    types::{FixtureFile, FixtureRecord, RequestData, TestItem},
};
use log::{debug, info, warn};
use serde::Serialize;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs;

/// Service name the request is filed under when it names none.
pub const DEFAULT_SERVICE: &str = "default";

/// A stored test as it shows up in a listing.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FixtureEntry {
    pub name: String,
    pub location_key: String,
    pub service: Option<String>,
}

/// Named test requests, one JSON file per service.
#[derive(Debug, Clone)]
pub struct FixtureStore {
    dir: PathBuf,
}

/// The file name stem a service is stored under.
pub fn location_key(service: &str) -> String {
    service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl FixtureStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.fixture_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", location_key(key)))
    }

    /// Every test in every fixture file, sorted by name ignoring case. Files
    /// that cannot be parsed are skipped.
    pub async fn list(&self) -> Result<Vec<FixtureEntry>> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::fixture_io(&self.dir, e))?;
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::fixture_io(&self.dir, e))?;
        let mut all = vec![];
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(Error::fixture_io(&self.dir, e)),
            };
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let Some(key) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let file = match load(&path).await {
                Ok(Some(file)) => file,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Failed to parse {:?}: {}", path, e);
                    continue;
                }
            };
            all.extend(file.entries().into_iter().map(|(name, service)| FixtureEntry {
                name,
                location_key: key.clone(),
                service,
            }));
        }
        all.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(all)
    }

    /// The named test of a fixture file, or its first test when no name is
    /// given. A missing or blank file reads as `None`.
    pub async fn read(&self, key: &str, name: Option<&str>) -> Result<Option<RequestData>> {
        let path = self.path_for(key);
        match load(&path).await {
            Ok(file) => Ok(file.and_then(|f| f.find(name))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::fixture_io(path, e)),
        }
    }

    /// Saves a named test under its service. Shared endpoint and schema path
    /// are overwritten by every save; legacy files are rewritten grouped.
    /// Returns the location key written.
    pub async fn upsert(&self, data: &RequestData) -> Result<String> {
        let name = data.name.as_deref().unwrap_or_default();
        if name.trim().is_empty() {
            return Err(Error::fixture_io(
                &self.dir,
                io::Error::new(ErrorKind::InvalidInput, "Please enter a test name"),
            ));
        }
        let service = if data.service.is_empty() {
            DEFAULT_SERVICE
        } else {
            data.service.as_str()
        };
        let key = location_key(service);
        let path = self.path_for(&key);
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::fixture_io(&self.dir, e))?;

        let mut record = match load(&path).await {
            Ok(Some(FixtureFile::Grouped(record))) => record,
            Ok(Some(legacy)) => FixtureRecord {
                service: service.to_owned(),
                ..legacy.into_record(service)
            },
            Ok(None) => FixtureRecord::new(service, &data.endpoint, &data.schema_path),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                FixtureRecord::new(service, &data.endpoint, &data.schema_path)
            }
            Err(e) => return Err(Error::fixture_io(path, e)),
        };
        record.endpoint = data.endpoint.clone();
        record.schema_path = data.schema_path.clone();
        record.upsert(TestItem::from_request(data));

        store(&path, &record).await?;
        info!("Saved {} to {}.json", name, key);
        Ok(key)
    }

    /// Removes a test. A file left without tests is deleted, as is a legacy
    /// single-request file whatever the name.
    pub async fn delete(&self, key: &str, name: &str) -> Result<()> {
        let path = self.path_for(key);
        let file = load(&path)
            .await
            .map_err(|e| Error::fixture_io(&path, e))?;
        let mut record = match file {
            Some(FixtureFile::LegacySingle(_)) | None => return remove(&path).await,
            Some(file) => file.into_record(key),
        };
        if !record.remove(name) {
            debug!("No test {} in {:?}", name, path);
        }
        if record.tests.is_empty() {
            return remove(&path).await;
        }
        store(&path, &record).await
    }
}

async fn load(path: &Path) -> io::Result<Option<FixtureFile>> {
    let bytes = fs::read(path).await?;
    FixtureFile::detect(&bytes).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
}

async fn store(path: &Path, record: &FixtureRecord) -> Result<()> {
    let content = serde_json::to_string_pretty(record)
        .map_err(|e| Error::fixture_io(path, io::Error::new(ErrorKind::InvalidData, e)))?;
    fs::write(path, content)
        .await
        .map_err(|e| Error::fixture_io(path, e))
}

async fn remove(path: &Path) -> Result<()> {
    debug!("Removing {:?}", path);
    fs::remove_file(path)
        .await
        .map_err(|e| Error::fixture_io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::fs as stdfs;

    fn request(name: &str, endpoint: &str, body: &str) -> RequestData {
        RequestData {
            name: Some(name.into()),
            endpoint: endpoint.into(),
            service: "pkg.Greeter".into(),
            method: "SayHello".into(),
            metadata: "{}".into(),
            body: body.into(),
            schema_path: "/protos/greeter.proto".into(),
        }
    }

    fn stored(store: &FixtureStore, key: &str) -> Value {
        serde_json::from_slice(&stdfs::read(store.path_for(key)).unwrap()).unwrap()
    }

    #[test]
    fn keys_replace_non_alphanumerics() {
        assert_eq!(location_key("pkg.v1.Greeter"), "pkg_v1_Greeter");
        assert_eq!(location_key("../etc"), "___etc");
    }

    #[tokio::test]
    async fn upsert_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path().join(".grpc-tests"));
        let key = store
            .upsert(&request("t1", "localhost:50051", r#"{"name":"a"}"#))
            .await
            .unwrap();
        assert_eq!(key, "pkg_Greeter");

        let read = store.read(&key, Some("t1")).await.unwrap().unwrap();
        assert_eq!(read, request("t1", "localhost:50051", r#"{"name":"a"}"#));
        assert_eq!(
            stored(&store, &key),
            json!({
                "service": "pkg.Greeter",
                "endpoint": "localhost:50051",
                "schemaPath": "/protos/greeter.proto",
                "tests": [
                    { "name": "t1", "method": "SayHello", "metadata": "{}", "body": "{\"name\":\"a\"}" }
                ]
            })
        );
    }

    #[tokio::test]
    async fn later_saves_win_shared_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        store
            .upsert(&request("t1", "localhost:50051", r#"{"name":"a"}"#))
            .await
            .unwrap();
        store
            .upsert(&request("t2", "localhost:9999", r#"{"name":"b"}"#))
            .await
            .unwrap();

        let t1 = store.read("pkg_Greeter", Some("t1")).await.unwrap().unwrap();
        assert_eq!(t1.endpoint, "localhost:9999");
        assert_eq!(t1.body, r#"{"name":"a"}"#);

        store
            .upsert(&request("t1", "localhost:9999", r#"{"name":"c"}"#))
            .await
            .unwrap();
        let record = stored(&store, "pkg_Greeter");
        assert_eq!(record["tests"].as_array().unwrap().len(), 2);
        assert_eq!(record["tests"][0]["body"], r#"{"name":"c"}"#);
    }

    #[tokio::test]
    async fn read_without_name_takes_first_and_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        store.upsert(&request("b", "e", "{}")).await.unwrap();
        store.upsert(&request("a", "e", "{}")).await.unwrap();
        let first = store.read("pkg_Greeter", None).await.unwrap().unwrap();
        assert_eq!(first.name.as_deref(), Some("b"));
        assert_eq!(store.read("pkg_Greeter", Some("zzz")).await.unwrap(), None);
        assert_eq!(store.read("other", Some("a")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn deleting_last_test_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        store.upsert(&request("t1", "e", "{}")).await.unwrap();
        store.upsert(&request("t2", "e", "{}")).await.unwrap();

        store.delete("pkg_Greeter", "t1").await.unwrap();
        assert!(store.path_for("pkg_Greeter").exists());
        assert_eq!(store.read("pkg_Greeter", Some("t1")).await.unwrap(), None);

        store.delete("pkg_Greeter", "t2").await.unwrap();
        assert!(!store.path_for("pkg_Greeter").exists());
        assert_eq!(store.read("pkg_Greeter", Some("t2")).await.unwrap(), None);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        assert!(matches!(
            store.delete("nothing", "t").await,
            Err(Error::FixtureIo { .. })
        ));
    }

    #[tokio::test]
    async fn upsert_migrates_legacy_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        let legacy = json!([
            { "name": "old1", "service": "pkg.Greeter", "method": "SayHello",
              "metadata": "{\"k\":\"v\"}", "body": "{\"name\":\"x\"}", "endpoint": "localhost:1",
              "protoPath": "/old.proto" },
            { "name": "old2", "service": "pkg.Greeter", "method": "SayGoodbye",
              "metadata": "{}", "body": "{}" }
        ]);
        stdfs::write(store.path_for("pkg_Greeter"), legacy.to_string()).unwrap();

        store.upsert(&request("new", "localhost:2", "{}")).await.unwrap();

        let record = stored(&store, "pkg_Greeter");
        assert_eq!(record["service"], "pkg.Greeter");
        assert_eq!(record["endpoint"], "localhost:2");
        let names: Vec<_> = record["tests"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["old1", "old2", "new"]);
        assert!(record["tests"][0].get("endpoint").is_none());

        let old1 = store.read("pkg_Greeter", Some("old1")).await.unwrap().unwrap();
        assert_eq!(old1.method, "SayHello");
        assert_eq!(old1.metadata, r#"{"k":"v"}"#);
        assert_eq!(old1.body, r#"{"name":"x"}"#);
        assert_eq!(old1.endpoint, "localhost:2");
    }

    #[tokio::test]
    async fn legacy_migration_keeps_every_item() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        let legacy = json!([
            { "name": "dup", "service": "pkg.Greeter", "method": "M", "body": "A" },
            { "name": "dup", "service": "pkg.Greeter", "method": "M", "body": "B" },
            { "service": "pkg.Greeter", "method": "M", "body": "C" },
            { "service": "pkg.Greeter", "method": "M", "body": "D" }
        ]);
        stdfs::write(store.path_for("pkg_Greeter"), legacy.to_string()).unwrap();

        store.upsert(&request("new", "e", "E")).await.unwrap();

        let record = stored(&store, "pkg_Greeter");
        let bodies: Vec<_> = record["tests"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["body"].as_str().unwrap())
            .collect();
        assert_eq!(bodies, ["A", "B", "C", "D", "E"]);
    }

    #[tokio::test]
    async fn nameless_grouped_test_does_not_hide_its_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        let grouped = json!({
            "service": "pkg.Greeter",
            "endpoint": "e",
            "schemaPath": "/protos/greeter.proto",
            "tests": [
                { "method": "SayHello", "body": "{}" },
                { "name": "ok", "method": "SayGoodbye", "body": "{}" }
            ]
        });
        stdfs::write(store.path_for("pkg_Greeter"), grouped.to_string()).unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(
            listed,
            vec![FixtureEntry {
                name: "ok".into(),
                location_key: "pkg_Greeter".into(),
                service: Some("pkg.Greeter".into()),
            }]
        );
        let ok = store.read("pkg_Greeter", Some("ok")).await.unwrap().unwrap();
        assert_eq!(ok.method, "SayGoodbye");

        store.upsert(&request("more", "e", "{}")).await.unwrap();
        assert_eq!(stored(&store, "pkg_Greeter")["tests"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn upsert_migrates_legacy_single() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        let legacy = json!({ "name": "solo", "service": "pkg.Greeter", "method": "SayHello",
                             "metadata": "{}", "body": "{}" });
        stdfs::write(store.path_for("pkg_Greeter"), legacy.to_string()).unwrap();

        store.upsert(&request("solo", "localhost:3", "{\"name\":\"z\"}")).await.unwrap();

        let record = stored(&store, "pkg_Greeter");
        assert_eq!(record["tests"].as_array().unwrap().len(), 1);
        assert_eq!(record["tests"][0]["body"], "{\"name\":\"z\"}");
    }

    #[tokio::test]
    async fn legacy_reads_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        let seq = json!([
            { "name": "a", "service": "pkg.Greeter", "method": "M", "endpoint": "h:1" },
            { "name": "b", "service": "pkg.Greeter", "method": "N" }
        ]);
        stdfs::write(store.path_for("seq"), seq.to_string()).unwrap();
        let single = json!({ "name": "s", "service": "pkg.Other", "method": "M" });
        stdfs::write(store.path_for("single"), single.to_string()).unwrap();

        let b = store.read("seq", Some("b")).await.unwrap().unwrap();
        assert_eq!(b.method, "N");
        assert_eq!(b.endpoint, "");
        let s = store.read("single", Some("anything")).await.unwrap().unwrap();
        assert_eq!(s.name.as_deref(), Some("s"));

        store.delete("seq", "a").await.unwrap();
        let record = stored(&store, "seq");
        assert_eq!(record["endpoint"], "h:1");
        assert_eq!(record["tests"][0]["name"], "b");

        store.delete("single", "not-its-name").await.unwrap();
        assert!(!store.path_for("single").exists());
    }

    #[tokio::test]
    async fn list_sorts_by_name_and_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        store.upsert(&request("beta", "e", "{}")).await.unwrap();
        store.upsert(&request("Alpha", "e", "{}")).await.unwrap();
        let legacy = json!([{ "name": "gamma", "service": "pkg.Other", "method": "M" }]);
        stdfs::write(store.path_for("pkg_Other"), legacy.to_string()).unwrap();
        stdfs::write(store.path_for("broken"), "{ nope").unwrap();
        stdfs::write(store.path_for("blank"), "  ").unwrap();
        stdfs::write(dir.path().join("notes.txt"), "[]").unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(
            listed,
            vec![
                FixtureEntry {
                    name: "Alpha".into(),
                    location_key: "pkg_Greeter".into(),
                    service: Some("pkg.Greeter".into()),
                },
                FixtureEntry {
                    name: "beta".into(),
                    location_key: "pkg_Greeter".into(),
                    service: Some("pkg.Greeter".into()),
                },
                FixtureEntry {
                    name: "gamma".into(),
                    location_key: "pkg_Other".into(),
                    service: Some("pkg.Other".into()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn nameless_requests_are_rejected_and_serviceless_go_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        let mut data = request("", "e", "{}");
        assert!(matches!(
            store.upsert(&data).await,
            Err(Error::FixtureIo { .. })
        ));
        data.name = Some("t".into());
        data.service = String::new();
        assert_eq!(store.upsert(&data).await.unwrap(), "default");
        let read = store.read("default", Some("t")).await.unwrap().unwrap();
        assert_eq!(read.service, "default");
    }

    #[tokio::test]
    async fn malformed_existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixtureStore::new(dir.path());
        stdfs::write(store.path_for("pkg_Greeter"), "{ nope").unwrap();
        assert!(matches!(
            store.upsert(&request("t", "e", "{}")).await,
            Err(Error::FixtureIo { .. })
        ));
        assert_eq!(stdfs::read_to_string(store.path_for("pkg_Greeter")).unwrap(), "{ nope");
    }
}
