//! Process-wide settings, read once at startup from the `[working_context]` section of an INI
//! file and then passed around by reference.

use crate::section::{self, RawSection};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SECTION: &str = "working_context";
pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_UNIT: u8 = 1;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not load the settings")]
    Load(#[source] section::Error),
    #[error("setting `{0}` is missing from the `[working_context]` section")]
    Missing(&'static str),
    #[error("setting `{key}` has an invalid value `{value}`")]
    Invalid {
        key: &'static str,
        value: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Gateway configuration file (registers).
    pub in_gw: PathBuf,
    /// Hosts configuration file (concentrators and channels).
    pub in_hosts: PathBuf,
    /// Time between the refresh cycles of `sync`.
    pub interval: Duration,
    pub out_gw: PathBuf,
    pub out_hosts: PathBuf,
    /// Where the poll responses are recorded.
    pub resp_file: PathBuf,
    pub address: String,
    pub port: u16,
    /// Modbus unit identifier of the device.
    pub unit: u8,
    /// Give up on connecting or on a single read after this long.
    pub timeout: Duration,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let section = section::load_section(path, SECTION).map_err(Error::Load)?;
        Self::from_section(&section)
    }

    pub fn from_section(section: &RawSection) -> Result<Self, Error> {
        let required = |key: &'static str| section.get(key).ok_or(Error::Missing(key));
        let interval = required("interval")?;
        let port = section.get("port");
        let unit = section.get("unit");
        let timeout = section.get("timeout");
        Ok(Self {
            in_gw: required("in_gw")?.into(),
            in_hosts: required("in_hosts")?.into(),
            interval: parse_interval(&interval).map_err(|e| invalid("interval", &interval, e))?,
            out_gw: required("out_gw")?.into(),
            out_hosts: required("out_hosts")?.into(),
            resp_file: required("resp_file")?.into(),
            address: required("address")?,
            port: match port {
                None => DEFAULT_PORT,
                Some(port) => port.parse().map_err(|e| invalid("port", &port, e))?,
            },
            unit: match unit {
                None => DEFAULT_UNIT,
                Some(unit) => unit.parse().map_err(|e| invalid("unit", &unit, e))?,
            },
            timeout: match timeout {
                None => DEFAULT_TIMEOUT,
                Some(timeout) => {
                    parse_interval(&timeout).map_err(|e| invalid("timeout", &timeout, e))?
                }
            },
        })
    }
}

/// Plain seconds (`5`) or a humantime duration (`5s`, `1m 30s`).
fn parse_interval(value: &str) -> Result<Duration, humantime::DurationError> {
    match value.parse::<u64>() {
        Ok(seconds) => Ok(Duration::from_secs(seconds)),
        Err(_) => humantime::parse_duration(value),
    }
}

fn invalid(
    key: &'static str,
    value: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> Error {
    Error::Invalid { key, value: value.to_string(), source: Box::new(source) }
}
