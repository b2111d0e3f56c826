use std::path::PathBuf;

use csv_core::WriteResult;

use crate::correlate::{ChannelRow, ConcentratorRow, ReadingRow, RegisterRow, TopologyRow};
use crate::entity::{Channel, Concentrator, Register};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a row to JSON")]
    SerializeJson(#[source] serde_json::Error),
    #[error("could not encode a row as CSV")]
    EncodeCsv,
    #[error("CSV headers must be written before any row")]
    LateCsvHeaders,
}

/// A record the presenter knows how to lay out as a table row.
///
/// JSON lines use the `Serialize` implementation instead, so the field names there match the
/// ones in the mapped documents.
pub trait Row: serde::Serialize {
    const HEADERS: &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

impl Args {
    pub fn new(format: Format, output: Option<PathBuf>) -> Self {
        Self { output, format }
    }

    pub fn to_output(self) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let formatter = match &self.format {
            Format::Table => {
                let mut comfy = comfy_table::Table::new();
                comfy.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Formatter::Table { comfy }
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv { written_records: false },
        };
        Ok(Output { args: self, io, formatter })
    }
}

/// Render `rows` in one go with the headers of `R`.
pub fn write_rows<R: Row>(args: Args, rows: impl IntoIterator<Item = R>) -> Result<(), Error> {
    let mut output = args.to_output()?;
    output.table_headers(R::HEADERS)?;
    for row in rows {
        output.row(&row)?;
    }
    output.commit()
}

pub struct Output {
    args: Args,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
}

enum Formatter {
    Csv { written_records: bool },
    Table { comfy: comfy_table::Table },
    Jsonl,
}

impl Output {
    pub fn table_headers(&mut self, hdrs: &[&'static str]) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_records } => {
                if *written_records {
                    return Err(Error::LateCsvHeaders);
                }
                *written_records = true;
                self.write_csv_row(hdrs)?;
            }
            Formatter::Table { comfy } => {
                comfy.set_header(hdrs.to_vec());
            }
            Formatter::Jsonl => {}
        }
        Ok(())
    }

    fn write_csv_row<V: std::ops::Deref<Target = str>>(
        &mut self,
        values: &[V],
    ) -> Result<(), Error> {
        let max_len = 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        for (index, value) in values.iter().enumerate() {
            if index > 0 {
                let (WriteResult::InputEmpty, ob) = writer.delimiter(&mut output) else {
                    return Err(Error::EncodeCsv);
                };
                self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
            }
            let (WriteResult::InputEmpty, ib, ob) = writer.field(value.as_bytes(), &mut output)
            else {
                return Err(Error::EncodeCsv);
            };
            if ib != value.len() {
                return Err(Error::EncodeCsv);
            }
            self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
        }
        let (WriteResult::InputEmpty, ob) = writer.terminator(&mut output) else {
            return Err(Error::EncodeCsv);
        };
        self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))
    }

    pub fn row<R: Row>(&mut self, row: &R) -> Result<(), Error> {
        self.result(|| row.cells(), || row)
    }

    pub fn result<R: serde::Serialize>(
        &mut self,
        table_row: impl FnOnce() -> Vec<String>,
        serde_record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_records } => {
                *written_records = true;
                let values = table_row();
                self.write_csv_row(&values)?;
            }
            Formatter::Table { comfy } => {
                comfy.add_row(table_row());
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, &serde_record())
                    .map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.args.output {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.into()),
        }
    }

    pub fn commit(mut self) -> Result<(), Error> {
        match &self.formatter {
            Formatter::Csv { written_records: _ } => {}
            Formatter::Table { comfy } => {
                writeln!(self.io, "{}", comfy).map_err(|e| self.write_error(e))?;
            }
            Formatter::Jsonl => {}
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}

const CHANNEL_HEADERS: [&str; 9] =
    ["TSAP_ID", "ObjID", "AttrID", "Index1", "Index2", "format", "name", "unit", "withStatus"];

fn channel_cells(channel: &Channel) -> [String; 9] {
    [
        channel.tsap_id.clone(),
        channel.obj_id.clone(),
        channel.attr_id.clone(),
        channel.index1.clone(),
        channel.index2.clone(),
        channel.format.clone(),
        channel.name.clone(),
        channel.unit.clone(),
        channel.with_status.clone(),
    ]
}

fn register_cells(register: &Register) -> [String; 10] {
    [
        register.start_addr.clone(),
        register.word_cnt.clone(),
        register.eui64.clone(),
        register.tsap_id.clone(),
        register.obj_id.clone(),
        register.attr_id.clone(),
        register.idx1.clone(),
        register.idx2.clone(),
        register.meth_id.clone(),
        register.status.clone(),
    ]
}

fn concentrator_cells(concentrator: &Concentrator) -> [String; 7] {
    [
        concentrator.co_tsap_id.clone(),
        concentrator.co_id.clone(),
        concentrator.data_period.clone(),
        concentrator.data_phase.clone(),
        concentrator.data_stale_limit.clone(),
        concentrator.data_version.clone(),
        concentrator.interface_type.clone(),
    ]
}

impl Row for TopologyRow {
    const HEADERS: &'static [&'static str] = &[
        "EUI64", "Channel", "TSAP_ID", "ObjID", "AttrID", "Index1", "Index2", "format", "name",
        "unit", "withStatus",
    ];
    fn cells(&self) -> Vec<String> {
        [self.eui64.clone(), self.channel_index.to_string()]
            .into_iter()
            .chain(channel_cells(&self.channel))
            .collect()
    }
}

impl Row for ChannelRow {
    const HEADERS: &'static [&'static str] = &[
        "Device", "Channel", "TSAP_ID", "ObjID", "AttrID", "Index1", "Index2", "format", "name",
        "unit", "withStatus",
    ];
    fn cells(&self) -> Vec<String> {
        [self.device.clone(), self.channel_index.to_string()]
            .into_iter()
            .chain(channel_cells(&self.channel))
            .collect()
    }
}

impl Row for RegisterRow {
    const HEADERS: &'static [&'static str] = &[
        "Section", "start_addr", "word_cnt", "EUI64", "TSAPID", "ObjId", "AttrId", "Idx1",
        "Idx2", "MethId", "status",
    ];
    fn cells(&self) -> Vec<String> {
        std::iter::once(self.section.clone()).chain(register_cells(&self.register)).collect()
    }
}

impl Row for ConcentratorRow {
    const HEADERS: &'static [&'static str] = &[
        "Device",
        "CO_TSAP_ID",
        "CO_ID",
        "Data_Period",
        "Data_Phase",
        "Data_StaleLimit",
        "Data_version",
        "interfaceType",
    ];
    fn cells(&self) -> Vec<String> {
        std::iter::once(self.device.clone())
            .chain(concentrator_cells(&self.concentrator))
            .collect()
    }
}

impl Row for ReadingRow {
    const HEADERS: &'static [&'static str] = &["Device", "Value", "Unit", "Last read", "Status"];
    fn cells(&self) -> Vec<String> {
        vec![
            self.device.clone(),
            self.value.to_string(),
            self.unit.clone(),
            self.last_read.to_string(),
            self.freshness.to_string(),
        ]
    }
}
