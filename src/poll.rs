//! Reading the registers listed in the gateway document off the device.
//!
//! The register protocol itself is `tokio-modbus`'s business. This module only decides what to
//! read, reads it one range after another in document order, and records the outcome as a
//! [`PollDocument`].

use crate::document::{self, GatewayDocument, PollDocument, PollResponse};
use crate::settings::Settings;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_modbus::prelude::{Client as _, Reader as _};
use tracing::{debug, info, warn};

pub const HOLDING_SECTION: &str = "HOLDING_REGISTERS";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("`{0}` did not resolve to any address")]
    NoAddress(String),
    #[error("could not connect to `{1}` over Modbus TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("{operation} `{endpoint}` did not complete within {limit}")]
    Timeout { operation: String, endpoint: String, limit: humantime::FormattedDuration },
    #[error("reading {count} {kind} registers at {address} failed")]
    Read {
        #[source]
        source: tokio_modbus::Error,
        kind: RegisterKind,
        address: u16,
        count: u16,
    },
    #[error("device answered the read of {count} {kind} registers at {address} with {exception}")]
    Exception { exception: String, kind: RegisterKind, address: u16, count: u16 },
    #[error("`{field}` of register {index} in section `{section}` is not a register number: `{value}`")]
    MalformedRegister {
        section: String,
        index: usize,
        field: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("could not load the gateway document")]
    LoadGateway(#[source] document::Error),
    #[error("could not store the poll responses")]
    Store(#[source] document::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RegisterKind {
    Input,
    Holding,
}

impl RegisterKind {
    /// Registers of the `HOLDING_REGISTERS` section are holding registers, all others are
    /// read as input registers.
    pub fn for_section(section: &str) -> Self {
        if section.eq_ignore_ascii_case(HOLDING_SECTION) {
            RegisterKind::Holding
        } else {
            RegisterKind::Input
        }
    }
}

/// Something that can read a range of registers off the device.
#[allow(async_fn_in_trait)]
pub trait RegisterReader {
    async fn read(&mut self, kind: RegisterKind, address: u16, count: u16)
    -> Result<Vec<u16>, Error>;

    /// Release the connection. Failing to do so cleanly is only worth a warning.
    async fn disconnect(self);
}

pub struct ModbusTcpReader {
    context: tokio_modbus::client::Context,
    endpoint: String,
    timeout: Duration,
}

impl ModbusTcpReader {
    /// Connect to the device at `host:port`. `timeout` bounds the connection attempt and every
    /// later read.
    pub async fn connect(
        host: &str,
        port: u16,
        unit: u8,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let endpoint = format!("{host}:{port}");
        info!(message = "connecting...", %endpoint);
        let address = tokio::net::lookup_host(&endpoint)
            .await
            .map_err(|e| Error::LookupHost(e, endpoint.clone()))?
            .next()
            .ok_or_else(|| Error::NoAddress(endpoint.clone()))?;
        debug!(message = "resolved", %address);
        let slave = tokio_modbus::Slave(unit);
        let connecting = tokio_modbus::client::tcp::connect_slave(address, slave);
        let context = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| timed_out("connecting to".into(), &endpoint, timeout))?
            .map_err(|e| Error::Connect(e, endpoint.clone()))?;
        info!(message = "connected", %endpoint);
        Ok(Self { context, endpoint, timeout })
    }
}

fn timed_out(operation: String, endpoint: &str, limit: Duration) -> Error {
    Error::Timeout {
        operation,
        endpoint: endpoint.to_string(),
        limit: humantime::format_duration(limit),
    }
}

impl RegisterReader for ModbusTcpReader {
    async fn read(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, Error> {
        let limit = self.timeout;
        let reading = match kind {
            RegisterKind::Input => {
                tokio::time::timeout(limit, self.context.read_input_registers(address, count)).await
            }
            RegisterKind::Holding => {
                tokio::time::timeout(limit, self.context.read_holding_registers(address, count))
                    .await
            }
        };
        let outcome = reading.map_err(|_| {
            let operation = format!("reading {count} {kind} registers at {address} from");
            timed_out(operation, &self.endpoint, limit)
        })?;
        match outcome {
            Ok(Ok(words)) => Ok(words),
            Ok(Err(exception)) => Err(Error::Exception {
                exception: format!("{exception:?}"),
                kind,
                address,
                count,
            }),
            Err(source) => Err(Error::Read { source, kind, address, count }),
        }
    }

    async fn disconnect(mut self) {
        match self.context.disconnect().await {
            Ok(_) => debug!(message = "disconnected", endpoint = %self.endpoint),
            Err(error) => warn!(
                message = "could not close the connection",
                endpoint = %self.endpoint,
                %error
            ),
        }
    }
}

/// Read every register range of `gateway`, strictly one after another.
///
/// Transaction ids count up from 0 in reading order. `clock` stamps each response right after
/// its read completes.
pub async fn poll<R: RegisterReader>(
    gateway: &GatewayDocument,
    reader: &mut R,
    mut clock: impl FnMut() -> jiff::Timestamp,
) -> Result<PollDocument, Error> {
    let mut transactions = BTreeMap::new();
    let mut transaction_id = 0u64;
    for (section, entry) in &gateway.sections {
        let kind = RegisterKind::for_section(section);
        for (index, register) in entry.registers.iter().enumerate() {
            let number = |field: &'static str, value: &str| {
                value.trim().parse::<u16>().map_err(|source| Error::MalformedRegister {
                    section: section.clone(),
                    index,
                    field,
                    value: value.to_string(),
                    source,
                })
            };
            let address = number("start_addr", &register.start_addr)?;
            let count = number("word_cnt", &register.word_cnt)?;
            debug!(transaction_id, %kind, address, count, device = %register.eui64, "reading");
            let words = reader.read(kind, address, count).await?;
            let response = PollResponse {
                register: address,
                response: words.into_iter().map(serde_json::Number::from).collect(),
                device: register.eui64.clone(),
                last_read: clock(),
            };
            transactions.insert(transaction_id, response);
            transaction_id += 1;
        }
    }
    Ok(PollDocument { transactions })
}

/// One read-and-record cycle: poll everything the mapped gateway document lists and overwrite
/// the response file.
///
/// Nothing is written unless every read succeeds.
pub fn read_cycle(
    runtime: &tokio::runtime::Runtime,
    settings: &Settings,
) -> Result<PollDocument, Error> {
    let gateway = document::load::<GatewayDocument>(&settings.out_gw).map_err(Error::LoadGateway)?;
    if gateway.is_older_than(settings.interval * 2, jiff::Timestamp::now()) {
        warn!(
            path = %settings.out_gw.display(),
            "gateway document is older than two refresh intervals, it may be stale"
        );
    }
    let document = runtime.block_on(async {
        let mut reader = ModbusTcpReader::connect(
            &settings.address,
            settings.port,
            settings.unit,
            settings.timeout,
        )
        .await?;
        let outcome = poll(&gateway.body, &mut reader, jiff::Timestamp::now).await;
        reader.disconnect().await;
        outcome
    })?;
    let meta = document::store(&settings.resp_file, &document).map_err(Error::Store)?;
    info!(
        path = %settings.resp_file.display(),
        transactions = document.transactions.len(),
        generation = meta.generation,
        "recorded poll responses"
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::gateway_document;
    use crate::section::SectionFile;
    use pretty_assertions::assert_eq;

    /// Answers every read with `count` words counting up from `address`.
    #[derive(Default)]
    struct FakeReader {
        reads: Vec<(RegisterKind, u16, u16)>,
        fail_at: Option<u16>,
    }

    impl RegisterReader for FakeReader {
        async fn read(
            &mut self,
            kind: RegisterKind,
            address: u16,
            count: u16,
        ) -> Result<Vec<u16>, Error> {
            self.reads.push((kind, address, count));
            if self.fail_at == Some(address) {
                return Err(Error::Exception {
                    exception: "IllegalDataAddress".into(),
                    kind,
                    address,
                    count,
                });
            }
            Ok((address..address + count).collect())
        }

        async fn disconnect(self) {}
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
    }

    fn clock() -> impl FnMut() -> jiff::Timestamp {
        let mut second = 0;
        move || {
            second += 1;
            jiff::Timestamp::from_second(second).unwrap()
        }
    }

    const GATEWAY: &str = "\
[INPUT_REGISTERS]
REGISTER=100,2,AA1,1,2,3,4,5,6,Fresh
REGISTER=110,1,BB2,1,2,3,4,5,6,Fresh
[HOLDING_REGISTERS]
REGISTER=200,1,AA1,1,2,3,4,5,6,Fresh
";

    #[test]
    fn reads_are_sequential_and_numbered() {
        let gateway = gateway_document(&SectionFile::parse(GATEWAY).unwrap()).unwrap();
        let mut reader = FakeReader::default();
        let document = block_on(poll(&gateway, &mut reader, clock())).unwrap();
        assert_eq!(
            reader.reads,
            [
                (RegisterKind::Holding, 200, 1),
                (RegisterKind::Input, 100, 2),
                (RegisterKind::Input, 110, 1),
            ]
        );
        let ids = document.transactions.keys().copied().collect::<Vec<_>>();
        assert_eq!(ids, [0, 1, 2]);
        let second = &document.transactions[&1];
        assert_eq!(second.register, 100);
        assert_eq!(second.device, "AA1");
        assert_eq!(second.response, [serde_json::Number::from(100), serde_json::Number::from(101)]);
        assert_eq!(second.last_read, jiff::Timestamp::from_second(2).unwrap());
    }

    #[test]
    fn failed_read_aborts_the_cycle() {
        let gateway = gateway_document(&SectionFile::parse(GATEWAY).unwrap()).unwrap();
        let mut reader = FakeReader { fail_at: Some(100), ..Default::default() };
        let error = block_on(poll(&gateway, &mut reader, clock())).unwrap_err();
        assert!(matches!(error, Error::Exception { address: 100, .. }));
        // The range after the failing one is never attempted.
        assert_eq!(reader.reads.len(), 2);
    }

    #[test]
    fn non_numeric_address_is_malformed() {
        let text = "[INPUT_REGISTERS]\nREGISTER=0x10,2,AA1,1,2,3,4,5,6,Fresh\n";
        let gateway = gateway_document(&SectionFile::parse(text).unwrap()).unwrap();
        let error = block_on(poll(&gateway, &mut FakeReader::default(), clock())).unwrap_err();
        assert!(matches!(error, Error::MalformedRegister { field: "start_addr", index: 0, .. }));
    }

    #[test]
    fn silent_device_times_out() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            // Accepts the connection and never answers.
            let device = tokio::spawn(async move {
                let _socket = listener.accept().await.unwrap();
                std::future::pending::<()>().await;
            });
            let limit = Duration::from_millis(200);
            let mut reader = ModbusTcpReader::connect("127.0.0.1", port, 1, limit).await.unwrap();
            let reading = reader.read(RegisterKind::Input, 100, 2);
            let outcome = tokio::time::timeout(Duration::from_secs(5), reading)
                .await
                .expect("read must give up on its own");
            assert!(matches!(outcome, Err(Error::Timeout { .. })));
            reader.disconnect().await;
            device.abort();
        });
    }

    #[test]
    fn register_kind_follows_section_name() {
        assert_eq!(RegisterKind::for_section("HOLDING_REGISTERS"), RegisterKind::Holding);
        assert_eq!(RegisterKind::for_section("holding_registers"), RegisterKind::Holding);
        assert_eq!(RegisterKind::for_section("INPUT_REGISTERS"), RegisterKind::Input);
        assert_eq!(RegisterKind::for_section("whatever"), RegisterKind::Input);
        assert_eq!("holding".parse::<RegisterKind>().unwrap(), RegisterKind::Holding);
    }
}
