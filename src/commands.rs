pub mod interpret;
pub mod read;
pub mod sync;

pub mod sections {
    use std::path::PathBuf;

    use crate::entity::{self, Entity, EntityKind};
    use crate::output::{self, Row};
    use crate::section::{self, SectionFile};

    /// List the section names of a configuration file.
    #[derive(clap::Parser)]
    pub struct Args {
        file: PathBuf,
        /// Also extract this entity (`concentrator`, `channel-list` or `register-list`) from
        /// every section and count its records.
        #[arg(long)]
        entity: Option<EntityKind>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the configuration file")]
        Load(#[source] section::Error),
        #[error("could not extract entities from {1:?}")]
        Extract(#[source] entity::Error, PathBuf),
        #[error("could not output the section names")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct SectionRow {
        pub section: String,
        pub keys: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub records: Option<usize>,
    }

    impl Row for SectionRow {
        const HEADERS: &'static [&'static str] = &["Section", "Keys", "Records"];
        fn cells(&self) -> Vec<String> {
            let records = self.records.map(|n| n.to_string()).unwrap_or_default();
            vec![self.section.clone(), self.keys.join(", "), records]
        }
    }

    pub fn rows(
        file: &SectionFile,
        kind: Option<EntityKind>,
    ) -> Result<Vec<SectionRow>, entity::Error> {
        file.sections()
            .map(|section| {
                let records = match kind {
                    None => None,
                    Some(kind) => Some(match entity::extract(&section, kind)? {
                        Entity::Concentrator(_) => 1,
                        Entity::ChannelList(channels) => channels.len(),
                        Entity::RegisterList(registers) => registers.len(),
                    }),
                };
                Ok(SectionRow {
                    section: section.name().to_string(),
                    keys: section.keys().map(|key| key.to_uppercase()).collect(),
                    records,
                })
            })
            .collect()
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let file = SectionFile::load(&args.file).map_err(Error::Load)?;
        let rows = rows(&file, args.entity).map_err(|e| Error::Extract(e, args.file))?;
        output::write_rows(args.output, rows).map_err(Error::Output)
    }

}

pub mod gateway {
    use std::path::PathBuf;

    use crate::correlate;
    use crate::document::{self, GatewayDocument};
    use crate::mapping;
    use crate::output;
    use crate::settings::Settings;

    /// Map the gateway configuration and show the registers it lists.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Gateway configuration file, `in_gw` of the settings by default.
        file: Option<PathBuf>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not map the gateway configuration")]
        Map(#[source] mapping::Error),
        #[error("could not load the mapped gateway document")]
        Load(#[source] document::Error),
        #[error("could not output the registers")]
        Output(#[source] output::Error),
    }

    pub fn run(args: Args, settings: &Settings) -> Result<(), Error> {
        let input = args.file.as_deref().unwrap_or(&settings.in_gw);
        let mapped = mapping::map_gateway(input, &settings.out_gw).map_err(Error::Map)?;
        let gateway = document::load::<GatewayDocument>(&mapped).map_err(Error::Load)?;
        let rows = correlate::register_rows(&gateway.body);
        output::write_rows(args.output, rows).map_err(Error::Output)
    }
}

pub mod hosts {
    use std::path::PathBuf;

    use crate::correlate;
    use crate::document::{self, GatewayDocument, HostsDocument};
    use crate::mapping;
    use crate::output;
    use crate::settings::Settings;

    /// Map the hosts and gateway configurations and show the channels of every device the
    /// gateway reads.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Hosts configuration file, `in_hosts` of the settings by default.
        hosts: Option<PathBuf>,
        /// Gateway configuration file, `in_gw` of the settings by default.
        gateway: Option<PathBuf>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not map the configuration")]
        Map(#[source] mapping::Error),
        #[error("could not load a mapped document")]
        Load(#[source] document::Error),
        #[error("gateway and hosts configurations do not agree")]
        Join(#[source] correlate::Error),
        #[error("could not output the channels")]
        Output(#[source] output::Error),
    }

    pub fn run(args: Args, settings: &Settings) -> Result<(), Error> {
        let gateway_input = args.gateway.as_deref().unwrap_or(&settings.in_gw);
        let hosts_input = args.hosts.as_deref().unwrap_or(&settings.in_hosts);
        let gateway_path =
            mapping::map_gateway(gateway_input, &settings.out_gw).map_err(Error::Map)?;
        let hosts_path = mapping::map_hosts(hosts_input, &settings.out_hosts).map_err(Error::Map)?;
        let gateway = document::load::<GatewayDocument>(&gateway_path).map_err(Error::Load)?;
        let hosts = document::load::<HostsDocument>(&hosts_path).map_err(Error::Load)?;
        let rows = correlate::join_topology(&gateway.body, &hosts.body).map_err(Error::Join)?;
        output::write_rows(args.output, rows).map_err(Error::Output)
    }
}

pub mod concentrators {
    use std::path::PathBuf;

    use crate::correlate;
    use crate::entity;
    use crate::mapping;
    use crate::output;
    use crate::section::{self, SectionFile};

    /// Show the concentrator of every section of a hosts configuration file.
    #[derive(clap::Parser)]
    pub struct Args {
        file: PathBuf,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the hosts configuration")]
        Load(#[source] section::Error),
        #[error("could not read the concentrators of {1:?}")]
        Extract(#[source] entity::Error, PathBuf),
        #[error("could not output the concentrators")]
        Output(#[source] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let file = SectionFile::load(&args.file).map_err(Error::Load)?;
        let hosts = mapping::hosts_document(&file).map_err(|e| Error::Extract(e, args.file))?;
        output::write_rows(args.output, correlate::concentrator_rows(&hosts))
            .map_err(Error::Output)
    }
}

pub mod channels {
    use std::path::PathBuf;

    use crate::correlate;
    use crate::entity;
    use crate::mapping;
    use crate::output;
    use crate::section::{self, SectionFile};

    /// Show the channels of every section of a hosts configuration file.
    #[derive(clap::Parser)]
    pub struct Args {
        file: PathBuf,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the hosts configuration")]
        Load(#[source] section::Error),
        #[error("could not read the channels of {1:?}")]
        Extract(#[source] entity::Error, PathBuf),
        #[error("could not output the channels")]
        Output(#[source] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let file = SectionFile::load(&args.file).map_err(Error::Load)?;
        let hosts = mapping::hosts_document(&file).map_err(|e| Error::Extract(e, args.file))?;
        output::write_rows(args.output, correlate::channel_rows(&hosts)).map_err(Error::Output)
    }
}

pub mod registers {
    use std::path::PathBuf;

    use crate::correlate;
    use crate::entity;
    use crate::mapping;
    use crate::output;
    use crate::section::{self, SectionFile};

    /// Show the registers of every section of a gateway configuration file.
    #[derive(clap::Parser)]
    pub struct Args {
        file: PathBuf,
        /// Only show registers of devices whose EUI64 contains this text.
        #[arg(long)]
        device: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the gateway configuration")]
        Load(#[source] section::Error),
        #[error("could not read the registers of {1:?}")]
        Extract(#[source] entity::Error, PathBuf),
        #[error("could not output the registers")]
        Output(#[source] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let file = SectionFile::load(&args.file).map_err(Error::Load)?;
        let gateway = mapping::gateway_document(&file).map_err(|e| Error::Extract(e, args.file))?;
        let pattern = args.device.map(|d| d.to_uppercase());
        let rows = correlate::register_rows(&gateway).into_iter().filter(|row| {
            pattern.as_deref().is_none_or(|p| row.register.eui64.to_uppercase().contains(p))
        });
        output::write_rows(args.output, rows).map_err(Error::Output)
    }
}
