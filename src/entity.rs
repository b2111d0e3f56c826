//! Extraction of concentrators, channels and registers out of a [`RawSection`].
//!
//! Each entity is a comma-separated list of positional attributes. Channels and registers come
//! one per line of their (usually repeated) key. Attributes are kept as raw strings; turning
//! them into numbers or durations is up to whoever consumes them.
//!
//! Channel and register records may carry optional fields between the fixed leading ones and
//! the trailing status flag. The leading fields are required, while `withStatus`/`status` is
//! always taken from the *last* field. A record that has exactly the leading fields thus reports
//! its final leading field as the status as well.

use crate::section::RawSection;
use serde::{Deserialize, Serialize};

pub const CONCENTRATOR_KEY: &str = "CONCENTRATOR";
pub const CHANNEL_KEY: &str = "CHANNEL";
pub const REGISTER_KEY: &str = "REGISTER";

const CONCENTRATOR_FIELDS: usize = 7;
const CHANNEL_LEADING_FIELDS: usize = 8;
const REGISTER_LEADING_FIELDS: usize = 9;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("section `{section}` has no `{key}` value")]
    MissingKey { section: String, key: &'static str },
    #[error(
        "record {record} of `{key}` in section `{section}` has {found} fields, but {expected} are required"
    )]
    MalformedField {
        section: String,
        key: &'static str,
        record: usize,
        found: usize,
        expected: Arity,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Arity::Exactly(n) => f.write_fmt(format_args!("exactly {n}")),
            Arity::AtLeast(n) => f.write_fmt(format_args!("at least {n}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concentrator {
    #[serde(rename = "CO_TSAP_ID")]
    pub co_tsap_id: String,
    #[serde(rename = "CO_ID")]
    pub co_id: String,
    #[serde(rename = "Data_Period")]
    pub data_period: String,
    #[serde(rename = "Data_Phase")]
    pub data_phase: String,
    #[serde(rename = "Data_StaleLimit")]
    pub data_stale_limit: String,
    #[serde(rename = "Data_version")]
    pub data_version: String,
    #[serde(rename = "interfaceType")]
    pub interface_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(rename = "TSAP_ID")]
    pub tsap_id: String,
    #[serde(rename = "ObjID")]
    pub obj_id: String,
    #[serde(rename = "AttrID")]
    pub attr_id: String,
    #[serde(rename = "Index1")]
    pub index1: String,
    #[serde(rename = "Index2")]
    pub index2: String,
    pub format: String,
    pub name: String,
    pub unit: String,
    #[serde(rename = "withStatus")]
    pub with_status: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub start_addr: String,
    pub word_cnt: String,
    /// Identifier of the device this register range belongs to.
    ///
    /// Used to find the device in the hosts document.
    #[serde(rename = "EUI64")]
    pub eui64: String,
    #[serde(rename = "TSAPID")]
    pub tsap_id: String,
    #[serde(rename = "ObjId")]
    pub obj_id: String,
    #[serde(rename = "AttrId")]
    pub attr_id: String,
    #[serde(rename = "Idx1")]
    pub idx1: String,
    #[serde(rename = "Idx2")]
    pub idx2: String,
    #[serde(rename = "MethId")]
    pub meth_id: String,
    pub status: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum EntityKind {
    Concentrator,
    ChannelList,
    RegisterList,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entity {
    Concentrator(Concentrator),
    ChannelList(Vec<Channel>),
    RegisterList(Vec<Register>),
}

/// Extract the entity of `kind` from `section`, for callers that pick the kind at runtime.
pub fn extract(section: &RawSection, kind: EntityKind) -> Result<Entity, Error> {
    Ok(match kind {
        EntityKind::Concentrator => Entity::Concentrator(extract_concentrator(section)?),
        EntityKind::ChannelList => Entity::ChannelList(extract_channels(section)?),
        EntityKind::RegisterList => Entity::RegisterList(extract_registers(section)?),
    })
}

pub fn extract_concentrator(section: &RawSection) -> Result<Concentrator, Error> {
    let value = value_of(section, CONCENTRATOR_KEY)?;
    let fields = value.split(',').collect::<Vec<_>>();
    let &[co_tsap_id, co_id, data_period, data_phase, data_stale_limit, data_version, interface_type] =
        fields.as_slice()
    else {
        return Err(malformed(
            section,
            CONCENTRATOR_KEY,
            0,
            fields.len(),
            Arity::Exactly(CONCENTRATOR_FIELDS),
        ));
    };
    Ok(Concentrator {
        co_tsap_id: co_tsap_id.to_string(),
        co_id: co_id.to_string(),
        data_period: data_period.to_string(),
        data_phase: data_phase.to_string(),
        data_stale_limit: data_stale_limit.to_string(),
        data_version: data_version.to_string(),
        interface_type: interface_type.to_string(),
    })
}

pub fn extract_channels(section: &RawSection) -> Result<Vec<Channel>, Error> {
    let value = value_of(section, CHANNEL_KEY)?;
    value
        .split('\n')
        .enumerate()
        .map(|(record, line)| {
            let fields = line.split(',').collect::<Vec<_>>();
            let &[tsap_id, obj_id, attr_id, index1, index2, format, name, unit, ref rest @ ..] =
                fields.as_slice()
            else {
                return Err(malformed(
                    section,
                    CHANNEL_KEY,
                    record,
                    fields.len(),
                    Arity::AtLeast(CHANNEL_LEADING_FIELDS),
                ));
            };
            let with_status = rest.last().copied().unwrap_or(unit);
            Ok(Channel {
                tsap_id: tsap_id.to_string(),
                obj_id: obj_id.to_string(),
                attr_id: attr_id.to_string(),
                index1: index1.to_string(),
                index2: index2.to_string(),
                format: format.to_string(),
                name: name.to_string(),
                unit: unit.to_string(),
                with_status: with_status.to_string(),
            })
        })
        .collect()
}

pub fn extract_registers(section: &RawSection) -> Result<Vec<Register>, Error> {
    let value = value_of(section, REGISTER_KEY)?;
    value
        .split('\n')
        .enumerate()
        .map(|(record, line)| {
            let fields = line.split(',').collect::<Vec<_>>();
            let &[
                start_addr,
                word_cnt,
                eui64,
                tsap_id,
                obj_id,
                attr_id,
                idx1,
                idx2,
                meth_id,
                ref rest @ ..,
            ] = fields.as_slice()
            else {
                return Err(malformed(
                    section,
                    REGISTER_KEY,
                    record,
                    fields.len(),
                    Arity::AtLeast(REGISTER_LEADING_FIELDS),
                ));
            };
            let status = rest.last().copied().unwrap_or(meth_id);
            Ok(Register {
                start_addr: start_addr.to_string(),
                word_cnt: word_cnt.to_string(),
                eui64: eui64.to_string(),
                tsap_id: tsap_id.to_string(),
                obj_id: obj_id.to_string(),
                attr_id: attr_id.to_string(),
                idx1: idx1.to_string(),
                idx2: idx2.to_string(),
                meth_id: meth_id.to_string(),
                status: status.to_string(),
            })
        })
        .collect()
}

fn value_of(section: &RawSection, key: &'static str) -> Result<String, Error> {
    section.get(key).ok_or_else(|| Error::MissingKey { section: section.name().to_string(), key })
}

fn malformed(
    section: &RawSection,
    key: &'static str,
    record: usize,
    found: usize,
    expected: Arity,
) -> Error {
    Error::MalformedField { section: section.name().to_string(), key, record, found, expected }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionFile;
    use pretty_assertions::assert_eq;

    fn section(text: &str) -> RawSection {
        let file = SectionFile::parse(text).unwrap();
        let name = file.section_names().next().unwrap().to_string();
        file.section(&name).unwrap()
    }

    #[test]
    fn concentrator_fields_are_positional_and_raw() {
        let s = section("[AA1]\nCONCENTRATOR=1,2, 30 ,4,5,v1,ISA\n");
        assert_eq!(
            extract_concentrator(&s).unwrap(),
            Concentrator {
                co_tsap_id: "1".into(),
                co_id: "2".into(),
                data_period: " 30 ".into(),
                data_phase: "4".into(),
                data_stale_limit: "5".into(),
                data_version: "v1".into(),
                interface_type: "ISA".into(),
            }
        );
    }

    #[test]
    fn concentrator_requires_exactly_seven_fields() {
        let short = section("[AA1]\nCONCENTRATOR=1,2,3,4,5,6\n");
        assert_eq!(
            extract_concentrator(&short),
            Err(Error::MalformedField {
                section: "AA1".into(),
                key: CONCENTRATOR_KEY,
                record: 0,
                found: 6,
                expected: Arity::Exactly(7),
            })
        );
        let long = section("[AA1]\nCONCENTRATOR=1,2,3,4,5,6,7,8\n");
        assert!(matches!(
            extract_concentrator(&long),
            Err(Error::MalformedField { found: 8, .. })
        ));
    }

    #[test]
    fn channels_keep_file_order_and_last_field_status() {
        let s = section(
            "[AA1]\n\
             CHANNEL=1,2,3,4,5,fmt,Temp,C,true\n\
             CHANNEL=1,2,3,4,5,fmt,Hum,%,extra,false\n\
             CHANNEL=1,2,3,4,5,fmt,Press,kPa\n",
        );
        let channels = extract_channels(&s).unwrap();
        assert_eq!(channels.len(), 3);
        let names = channels.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["Temp", "Hum", "Press"]);
        let status = channels.iter().map(|c| c.with_status.as_str()).collect::<Vec<_>>();
        assert_eq!(status, ["true", "false", "kPa"]);
    }

    #[test]
    fn short_channel_record_is_malformed() {
        let s = section("[AA1]\nCHANNEL=1,2,3,4,5,fmt,Temp,C,true\nCHANNEL=1\n");
        assert_eq!(
            extract_channels(&s),
            Err(Error::MalformedField {
                section: "AA1".into(),
                key: CHANNEL_KEY,
                record: 1,
                found: 1,
                expected: Arity::AtLeast(8),
            })
        );
    }

    #[test]
    fn registers_are_extracted() {
        let s = section("[INPUT_REGISTERS]\nREGISTER=100,2,AA1,1,2,3,4,5,6,Fresh\n");
        let registers = extract_registers(&s).unwrap();
        assert_eq!(registers.len(), 1);
        let register = &registers[0];
        assert_eq!(register.start_addr, "100");
        assert_eq!(register.word_cnt, "2");
        assert_eq!(register.eui64, "AA1");
        assert_eq!(register.meth_id, "6");
        assert_eq!(register.status, "Fresh");
    }

    #[test]
    fn missing_key_is_reported() {
        let s = section("[AA1]\nCHANNEL=1,2,3,4,5,fmt,Temp,C,true\n");
        assert_eq!(
            extract_registers(&s),
            Err(Error::MissingKey { section: "AA1".into(), key: REGISTER_KEY })
        );
    }

    #[test]
    fn extract_dispatches_on_kind() {
        let s = section("[AA1]\nCONCENTRATOR=1,2,3,4,5,6,7\nCHANNEL=1,2,3,4,5,f,n,u,s\n");
        let kind: EntityKind = "channel-list".parse().unwrap();
        let Entity::ChannelList(channels) = extract(&s, kind).unwrap() else {
            panic!("expected a channel list");
        };
        assert_eq!(channels.len(), 1);
        assert!(matches!(
            extract(&s, EntityKind::Concentrator),
            Ok(Entity::Concentrator(_))
        ));
    }

    #[test]
    fn entities_survive_json_round_trip() {
        let s = section(
            "[AA1]\nCONCENTRATOR=1,2,3,4,5,6,7\nCHANNEL=1,2,3,4,5,f,n,u,s\n\
             REGISTER=100,2,AA1,1,2,3,4,5,6,Fresh\n",
        );
        let concentrator = extract_concentrator(&s).unwrap();
        let channels = extract_channels(&s).unwrap();
        let registers = extract_registers(&s).unwrap();

        let json = serde_json::to_string(&concentrator).unwrap();
        assert_eq!(serde_json::from_str::<Concentrator>(&json).unwrap(), concentrator);
        let json = serde_json::to_string(&channels).unwrap();
        assert_eq!(serde_json::from_str::<Vec<Channel>>(&json).unwrap(), channels);
        let json = serde_json::to_string(&registers).unwrap();
        assert_eq!(serde_json::from_str::<Vec<Register>>(&json).unwrap(), registers);
    }
}
