use serde::{
    de::{self, MapAccess, Visitor},
    Deserialize, Deserializer, Serialize,
};
use serde_json::Value;
use std::fmt;

/// One request as the editor sees it. `metadata` and `body` stay as the JSON
/// text the user typed.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, alias = "protoPath")]
    pub schema_path: String,
}

impl RequestData {
    /// Parses a standalone request document. Blank text is an empty request.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text)
    }

    /// The request body, `{}` when nothing was entered.
    pub fn body_value(&self) -> serde_json::Result<Value> {
        if self.body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.body)
    }

    pub fn metadata_value(&self) -> serde_json::Result<Metadata> {
        Metadata::from_json(&self.metadata)
    }
}

/// A named test inside a grouped fixture record. Hand-edited files may carry
/// nameless entries; those are kept but never listed.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TestItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub body: String,
}

impl TestItem {
    /// Drops the shared fields; those live on the record.
    pub fn from_request(data: &RequestData) -> Self {
        Self {
            name: data.name.clone().unwrap_or_default(),
            method: data.method.clone(),
            metadata: data.metadata.clone(),
            body: data.body.clone(),
        }
    }

    fn into_request(self, record: &FixtureRecord) -> RequestData {
        RequestData {
            name: Some(self.name),
            endpoint: record.endpoint.clone(),
            service: record.service.clone(),
            method: self.method,
            metadata: self.metadata,
            body: self.body,
            schema_path: record.schema_path.clone(),
        }
    }
}

/// All tests of one service. Endpoint and schema path are shared by every
/// test in the record.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FixtureRecord {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, alias = "protoPath")]
    pub schema_path: String,
    pub tests: Vec<TestItem>,
}

impl FixtureRecord {
    pub fn new(service: &str, endpoint: &str, schema_path: &str) -> Self {
        Self {
            service: service.to_owned(),
            endpoint: endpoint.to_owned(),
            schema_path: schema_path.to_owned(),
            tests: vec![],
        }
    }

    /// Replaces the test with the same name or appends it.
    pub fn upsert(&mut self, item: TestItem) {
        match self.tests.iter_mut().find(|t| t.name == item.name) {
            Some(existing) => *existing = item,
            None => self.tests.push(item),
        }
    }

    /// Returns true when a test was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.tests.len();
        self.tests.retain(|t| t.name != name);
        self.tests.len() != before
    }

    /// The named test with the shared fields merged back in; the first test
    /// when no name is given.
    pub fn find(&self, name: Option<&str>) -> Option<RequestData> {
        let item = match name {
            Some(n) => self.tests.iter().find(|t| t.name == n),
            None => self.tests.first(),
        };
        item.cloned().map(|t| t.into_request(self))
    }
}

/// The three shapes a fixture file has had over time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureFile {
    /// `{ service, endpoint, schemaPath, tests: [...] }`
    Grouped(FixtureRecord),
    /// A bare array of requests.
    LegacySequence(Vec<RequestData>),
    /// A single request object.
    LegacySingle(RequestData),
}

impl FixtureFile {
    /// Detects the shape of a fixture file. Blank content is `None`.
    pub fn detect(bytes: &[u8]) -> serde_json::Result<Option<Self>> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let json: Value = serde_json::from_slice(bytes)?;
        let grouped = json.get("tests").map_or(false, Value::is_array);
        let named = json.get("name").map_or(false, |n| !n.is_null());
        let file = if grouped {
            FixtureFile::Grouped(serde_json::from_value(json)?)
        } else if json.is_array() {
            FixtureFile::LegacySequence(serde_json::from_value(json)?)
        } else if named {
            FixtureFile::LegacySingle(serde_json::from_value(json)?)
        } else {
            return Err(de::Error::custom("unrecognized fixture shape"));
        };
        Ok(Some(file))
    }

    /// `(name, service)` for every test in the file.
    pub fn entries(&self) -> Vec<(String, Option<String>)> {
        match self {
            FixtureFile::Grouped(record) => record
                .tests
                .iter()
                .filter(|t| !t.name.is_empty())
                .map(|t| (t.name.clone(), Some(record.service.clone())))
                .collect(),
            FixtureFile::LegacySequence(items) => items
                .iter()
                .filter_map(|r| r.name.clone().map(|n| (n, non_empty(&r.service))))
                .collect(),
            FixtureFile::LegacySingle(r) => r
                .name
                .clone()
                .map(|n| vec![(n, non_empty(&r.service))])
                .unwrap_or_default(),
        }
    }

    /// Looks a test up the way each shape was written: grouped records merge
    /// their shared fields, legacy sequences match by name, a legacy single
    /// file is returned whatever the name.
    pub fn find(&self, name: Option<&str>) -> Option<RequestData> {
        match self {
            FixtureFile::Grouped(record) => record.find(name),
            FixtureFile::LegacySequence(items) => match name {
                Some(n) => items.iter().find(|r| r.name.as_deref() == Some(n)).cloned(),
                None => items.first().cloned(),
            },
            FixtureFile::LegacySingle(r) => Some(r.clone()),
        }
    }

    /// Migrates any shape into a grouped record. Legacy files had no shared
    /// fields, so they come from the first test that carries them and then
    /// from `fallback_service`. Every legacy item is carried over as it was,
    /// duplicate and missing names included.
    pub fn into_record(self, fallback_service: &str) -> FixtureRecord {
        let items = match self {
            FixtureFile::Grouped(record) => return record,
            FixtureFile::LegacySequence(items) => items,
            FixtureFile::LegacySingle(item) => vec![item],
        };
        let pick = |f: fn(&RequestData) -> &str| {
            items
                .iter()
                .map(f)
                .find(|s| !s.is_empty())
                .unwrap_or_default()
                .to_owned()
        };
        let mut service = pick(|r| &r.service);
        if service.is_empty() {
            service = fallback_service.to_owned();
        }
        let mut record = FixtureRecord {
            service,
            endpoint: pick(|r| &r.endpoint),
            schema_path: pick(|r| &r.schema_path),
            tests: vec![],
        };
        record.tests.extend(items.iter().map(TestItem::from_request));
        record
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_owned())
    }
}

/// Request metadata in the order it was written. Repeated keys are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(Vec<(String, String)>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON object of keys to values; an array value adds the key
    /// once per element. Blank text is empty metadata.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text)
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MetadataVisitor;

        impl<'de> Visitor<'de> for MetadataVisitor {
            type Value = Metadata;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of metadata keys to values")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Metadata, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut metadata = Metadata::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    match value {
                        Value::Array(values) => {
                            for v in values {
                                metadata.append(key.clone(), stringify(v));
                            }
                        }
                        Value::Null => {}
                        other => metadata.append(key, stringify(other)),
                    }
                }
                Ok(metadata)
            }
        }

        deserializer.deserialize_map(MetadataVisitor)
    }
}

fn stringify(v: Value) -> String {
    match v {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
