//! Mapping runs: configuration file in, normalized JSON document out.
//!
//! A run either maps every section or writes nothing at all. Whatever a previous successful run
//! left on disk stays there as the last known good document.

use crate::document::{self, GatewayDocument, HostDevice, HostsDocument, RegisterSection};
use crate::entity;
use crate::section::{self, SectionFile};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not load the configuration")]
    Load(#[source] section::Error),
    #[error("could not map the configuration at {1:?}")]
    Extract(#[source] entity::Error, PathBuf),
    #[error("could not store the mapped document")]
    Store(#[source] document::Error),
}

pub fn gateway_document(file: &SectionFile) -> Result<GatewayDocument, entity::Error> {
    let mut document = GatewayDocument::default();
    for section in file.sections() {
        let registers = entity::extract_registers(&section)?;
        debug!(section = section.name(), registers = registers.len(), "mapped gateway section");
        document.sections.insert(section.name().to_string(), RegisterSection { registers });
    }
    Ok(document)
}

pub fn hosts_document(file: &SectionFile) -> Result<HostsDocument, entity::Error> {
    let mut document = HostsDocument::default();
    for section in file.sections() {
        let concentrator = entity::extract_concentrator(&section)?;
        let channels = entity::extract_channels(&section)?;
        let key = device_key(section.name());
        debug!(section = section.name(), key = %key, channels = channels.len(), "mapped hosts section");
        if document.devices.insert(key.clone(), HostDevice { concentrator, channels }).is_some() {
            warn!(section = section.name(), key = %key, "device key already mapped, replacing it");
        }
    }
    Ok(document)
}

/// Section names may be written with colons (`[00:1B:1E:...]`), device keys never are.
pub fn device_key(section_name: &str) -> String {
    section_name.replace(':', "")
}

/// Map the gateway file at `input` into the document at `output`.
pub fn map_gateway(input: &Path, output: &Path) -> Result<PathBuf, Error> {
    let file = SectionFile::load(input).map_err(Error::Load)?;
    let document = gateway_document(&file).map_err(|e| Error::Extract(e, input.to_path_buf()))?;
    let meta = document::store(output, &document).map_err(Error::Store)?;
    info!(
        input = %input.display(),
        output = %output.display(),
        sections = document.sections.len(),
        generation = meta.generation,
        "mapped gateway configuration"
    );
    Ok(output.to_path_buf())
}

/// Map the hosts file at `input` into the document at `output`.
pub fn map_hosts(input: &Path, output: &Path) -> Result<PathBuf, Error> {
    let file = SectionFile::load(input).map_err(Error::Load)?;
    let document = hosts_document(&file).map_err(|e| Error::Extract(e, input.to_path_buf()))?;
    let meta = document::store(output, &document).map_err(Error::Store)?;
    info!(
        input = %input.display(),
        output = %output.display(),
        devices = document.devices.len(),
        generation = meta.generation,
        "mapped hosts configuration"
    );
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GATEWAY: &str = "\
[INPUT_REGISTERS]
REGISTER=100,2,AA1,1,2,3,4,5,6,Fresh
REGISTER=102,1,BB2,1,2,3,4,5,6,Fresh
[HOLDING_REGISTERS]
REGISTER=200,1,AA1,1,2,3,4,5,6,Fresh
";

    const HOSTS: &str = "\
[AA:1]
CONCENTRATOR=1,2,30,0,5,1,ISA
CHANNEL=1,2,3,4,5,fmt,Temp,C,true
CHANNEL=1,2,3,4,5,fmt,Hum,%,true
[BB2]
CONCENTRATOR=1,2,30,0,5,1,ISA
CHANNEL=1,2,3,4,5,fmt,Press,kPa,false
";

    #[test]
    fn gateway_sections_are_keyed_by_name() {
        let document = gateway_document(&SectionFile::parse(GATEWAY).unwrap()).unwrap();
        let keys = document.sections.keys().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(keys, ["HOLDING_REGISTERS", "INPUT_REGISTERS"]);
        let eui64 = document.sections["INPUT_REGISTERS"]
            .registers
            .iter()
            .map(|r| r.eui64.as_str())
            .collect::<Vec<_>>();
        assert_eq!(eui64, ["AA1", "BB2"]);
    }

    #[test]
    fn hosts_keys_have_colons_removed() {
        let document = hosts_document(&SectionFile::parse(HOSTS).unwrap()).unwrap();
        let keys = document.devices.keys().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(keys, ["AA1", "BB2"]);
        assert_eq!(document.devices["AA1"].channels.len(), 2);
    }

    #[test]
    fn mapping_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("gateway.ini");
        let output = dir.path().join("gateway.json");
        std::fs::write(&input, GATEWAY).unwrap();
        assert_eq!(map_gateway(&input, &output).unwrap(), output);
        let first = std::fs::read(&output).unwrap();
        map_gateway(&input, &output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), first);

        let input = dir.path().join("hosts.conf");
        let output = dir.path().join("hosts.json");
        std::fs::write(&input, HOSTS).unwrap();
        map_hosts(&input, &output).unwrap();
        let first = std::fs::read(&output).unwrap();
        map_hosts(&input, &output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), first);
    }

    #[test]
    fn failed_run_leaves_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("hosts.conf");
        let output = dir.path().join("hosts.json");
        std::fs::write(&input, HOSTS).unwrap();
        map_hosts(&input, &output).unwrap();
        let good = std::fs::read(&output).unwrap();

        std::fs::write(&input, format!("{HOSTS}[CC3]\nCONCENTRATOR=1,2,3\nCHANNEL=x\n")).unwrap();
        let error = map_hosts(&input, &output).unwrap_err();
        assert!(matches!(
            error,
            Error::Extract(entity::Error::MalformedField { ref section, .. }, _) if section == "CC3"
        ));
        assert_eq!(std::fs::read(&output).unwrap(), good);
    }

    #[test]
    fn missing_input_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let error = map_gateway(&dir.path().join("nope.ini"), &dir.path().join("gw.json"));
        assert!(matches!(error, Err(Error::Load(section::Error::Read(..)))));
    }
}
