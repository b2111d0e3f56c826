//! The JSON documents exchanged between the mapping, polling and reporting commands.
//!
//! Documents are written whole, with sorted keys and four-space indentation, and carry a `$meta`
//! header with a generation counter. The generation only moves forward when the content does,
//! so re-mapping an unchanged file yields a byte-identical document. Readers get the generation
//! and the modification time of the file along with the content, which is enough to notice a
//! document left behind by a stale run. A document caught half-written fails to parse.

use crate::entity::{Channel, Concentrator, Register};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const META_KEY: &str = "$meta";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not read the document at {1:?}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("could not write the document to {1:?}")]
    Write(#[source] std::io::Error, PathBuf),
    #[error("document at {1:?} is not valid JSON, it may be in the middle of being written")]
    Parse(#[source] serde_json::Error, PathBuf),
    #[error("document at {1:?} does not have the expected structure")]
    Structure(#[source] serde_json::Error, PathBuf),
    #[error("document at {0:?} is not a JSON object")]
    NotAnObject(PathBuf),
    #[error("could not serialize the document")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub generation: u64,
}

/// A document read back from disk.
#[derive(Clone, Debug, PartialEq)]
pub struct Loaded<T> {
    pub body: T,
    pub meta: Option<DocumentMeta>,
    pub modified: Option<jiff::Timestamp>,
}

impl<T> Loaded<T> {
    /// Whether the file was last written more than `max_age` before `now`.
    ///
    /// Documents with an unknown modification time are never considered stale.
    pub fn is_older_than(&self, max_age: std::time::Duration, now: jiff::Timestamp) -> bool {
        let Some(modified) = self.modified else {
            return false;
        };
        let Ok(max_age) = jiff::SignedDuration::try_from(max_age) else {
            return false;
        };
        now.duration_since(modified) > max_age
    }
}

/// Register ranges per gateway section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayDocument {
    pub sections: BTreeMap<String, RegisterSection>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSection {
    pub registers: Vec<Register>,
}

/// Concentrator and channels per device, keyed by the colon-stripped section name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostsDocument {
    pub devices: BTreeMap<String, HostDevice>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostDevice {
    pub concentrator: Concentrator,
    pub channels: Vec<Channel>,
}

/// Each device is stored as `{"concentrator": {..}, "<name>": {"channels": [..]}}`.
#[derive(Serialize)]
struct HostEntryRef<'a> {
    concentrator: &'a Concentrator,
    #[serde(flatten)]
    nested: BTreeMap<&'a str, ChannelListRef<'a>>,
}

#[derive(Serialize)]
struct ChannelListRef<'a> {
    channels: &'a [Channel],
}

#[derive(Deserialize)]
struct HostEntry {
    concentrator: Concentrator,
    #[serde(flatten)]
    nested: BTreeMap<String, ChannelList>,
}

#[derive(Deserialize)]
struct ChannelList {
    channels: Vec<Channel>,
}

impl Serialize for HostsDocument {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap as _;
        let mut map = serializer.serialize_map(Some(self.devices.len()))?;
        for (name, device) in &self.devices {
            let nested = BTreeMap::from([(
                name.as_str(),
                ChannelListRef { channels: &device.channels },
            )]);
            map.serialize_entry(name, &HostEntryRef { concentrator: &device.concentrator, nested })?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HostsDocument {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        let raw = BTreeMap::<String, HostEntry>::deserialize(deserializer)?;
        let mut devices = BTreeMap::new();
        for (name, mut entry) in raw {
            let Some(list) = entry.nested.remove(&name) else {
                return Err(D::Error::custom(format_args!(
                    "device `{name}` has no nested `{name}` channel list"
                )));
            };
            let device = HostDevice { concentrator: entry.concentrator, channels: list.channels };
            devices.insert(name, device);
        }
        Ok(Self { devices })
    }
}

/// Poll responses keyed by transaction id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollDocument {
    pub transactions: BTreeMap<u64, PollResponse>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    /// Start address of the range that was read.
    pub register: u16,
    pub response: Vec<serde_json::Number>,
    pub device: String,
    pub last_read: jiff::Timestamp,
}

/// Render `body` the way it is stored on disk.
pub fn to_pretty_json<T: Serialize>(
    body: &T,
    meta: Option<DocumentMeta>,
) -> Result<Vec<u8>, serde_json::Error> {
    let mut value = serde_json::to_value(body)?;
    if let (Some(meta), serde_json::Value::Object(map)) = (meta, &mut value) {
        map.insert(META_KEY.to_string(), serde_json::to_value(meta)?);
    }
    let mut output = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut output, formatter);
    value.serialize(&mut serializer)?;
    Ok(output)
}

/// Overwrite the document at `path` with `body`.
pub fn store<T: Serialize>(path: &Path, body: &T) -> Result<DocumentMeta, Error> {
    let content = serde_json::to_value(body).map_err(Error::Serialize)?;
    let generation = match read_value(path) {
        Ok((previous, Some(meta))) if previous == content => meta.generation,
        Ok((_, Some(meta))) => meta.generation.wrapping_add(1),
        Ok((_, None)) | Err(_) => 0,
    };
    let meta = DocumentMeta { generation };
    let bytes = to_pretty_json(&content, Some(meta)).map_err(Error::Serialize)?;
    std::fs::write(path, bytes).map_err(|e| Error::Write(e, path.to_path_buf()))?;
    tracing::debug!(message = "stored document", path = %path.display(), generation);
    Ok(meta)
}

pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Loaded<T>, Error> {
    let (value, meta) = read_value(path)?;
    let body = serde_json::from_value(value).map_err(|e| Error::Structure(e, path.to_path_buf()))?;
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| jiff::Timestamp::try_from(t).ok());
    Ok(Loaded { body, meta, modified })
}

fn read_value(path: &Path) -> Result<(serde_json::Value, Option<DocumentMeta>), Error> {
    let bytes = std::fs::read(path).map_err(|e| Error::Read(e, path.to_path_buf()))?;
    let mut value = serde_json::from_slice::<serde_json::Value>(&bytes)
        .map_err(|e| Error::Parse(e, path.to_path_buf()))?;
    let serde_json::Value::Object(map) = &mut value else {
        return Err(Error::NotAnObject(path.to_path_buf()));
    };
    let meta = map
        .remove(META_KEY)
        .map(serde_json::from_value::<DocumentMeta>)
        .transpose()
        .map_err(|e| Error::Structure(e, path.to_path_buf()))?;
    Ok((value, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn concentrator() -> Concentrator {
        Concentrator {
            co_tsap_id: "1".into(),
            co_id: "2".into(),
            data_period: "30".into(),
            data_phase: "0".into(),
            data_stale_limit: "5".into(),
            data_version: "1".into(),
            interface_type: "ISA".into(),
        }
    }

    fn channel(name: &str) -> Channel {
        Channel {
            tsap_id: "1".into(),
            obj_id: "2".into(),
            attr_id: "3".into(),
            index1: "4".into(),
            index2: "5".into(),
            format: "fmt".into(),
            name: name.into(),
            unit: "C".into(),
            with_status: "true".into(),
        }
    }

    fn hosts() -> HostsDocument {
        let device = HostDevice { concentrator: concentrator(), channels: vec![channel("Temp")] };
        HostsDocument { devices: BTreeMap::from([("AA1".to_string(), device)]) }
    }

    #[test]
    fn hosts_document_nests_channels_under_device_name() {
        let value = serde_json::to_value(hosts()).unwrap();
        assert_eq!(value["AA1"]["concentrator"]["Data_StaleLimit"], "5");
        assert_eq!(value["AA1"]["AA1"]["channels"][0]["name"], "Temp");
        assert_eq!(serde_json::from_value::<HostsDocument>(value).unwrap(), hosts());
    }

    #[test]
    fn hosts_document_without_nested_list_is_rejected() {
        let value = serde_json::json!({
            "AA1": { "concentrator": serde_json::to_value(concentrator()).unwrap() }
        });
        assert!(serde_json::from_value::<HostsDocument>(value).is_err());
    }

    #[test]
    fn output_is_sorted_and_indented() {
        let gateway = GatewayDocument {
            sections: BTreeMap::from([("B".to_string(), Default::default()), ("A".to_string(), Default::default())]),
        };
        let text = String::from_utf8(to_pretty_json(&gateway, None).unwrap()).unwrap();
        assert_eq!(
            text,
            "{\n    \"A\": {\n        \"registers\": []\n    },\n    \"B\": {\n        \"registers\": []\n    }\n}"
        );
    }

    #[test]
    fn generation_advances_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.json");
        assert_eq!(store(&path, &hosts()).unwrap().generation, 0);
        let first = std::fs::read(&path).unwrap();
        assert_eq!(store(&path, &hosts()).unwrap().generation, 0);
        assert_eq!(std::fs::read(&path).unwrap(), first);

        let mut changed = hosts();
        changed.devices.get_mut("AA1").unwrap().channels.push(channel("Hum"));
        assert_eq!(store(&path, &changed).unwrap().generation, 1);

        let loaded = load::<HostsDocument>(&path).unwrap();
        assert_eq!(loaded.body, changed);
        assert_eq!(loaded.meta, Some(DocumentMeta { generation: 1 }));
        assert!(loaded.modified.is_some());
    }

    #[test]
    fn poll_document_keys_are_transaction_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resp.json");
        let last_read: jiff::Timestamp = "2024-05-01T10:00:00Z".parse().unwrap();
        let transactions = (0..11u64)
            .map(|id| {
                let response = PollResponse {
                    register: 100 + id as u16,
                    response: vec![serde_json::Number::from(id)],
                    device: "AA1".into(),
                    last_read,
                };
                (id, response)
            })
            .collect();
        let document = PollDocument { transactions };
        store(&path, &document).unwrap();
        let loaded = load::<PollDocument>(&path).unwrap();
        assert_eq!(loaded.body, document);
        let order = loaded.body.transactions.keys().copied().collect::<Vec<_>>();
        assert_eq!(order, (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn truncated_document_fails_to_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.json");
        std::fs::write(&path, "{\n    \"INPUT_REGISTERS\": {").unwrap();
        assert!(matches!(load::<GatewayDocument>(&path), Err(Error::Parse(..))));
        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(load::<GatewayDocument>(&path), Err(Error::NotAnObject(_))));
    }

    #[test]
    fn staleness_uses_modification_time() {
        let now: jiff::Timestamp = "2024-05-01T10:00:00Z".parse().unwrap();
        let loaded = Loaded {
            body: (),
            meta: None,
            modified: Some("2024-05-01T09:59:00Z".parse().unwrap()),
        };
        assert!(loaded.is_older_than(std::time::Duration::from_secs(30), now));
        assert!(!loaded.is_older_than(std::time::Duration::from_secs(120), now));
        let unknown = Loaded { modified: None, ..loaded };
        assert!(!unknown.is_older_than(std::time::Duration::ZERO, now));
    }
}
