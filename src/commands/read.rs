use crate::document::PollResponse;
use crate::output::{self, Row};
use crate::poll;
use crate::settings::Settings;

/// Read every register listed in the mapped gateway document once and record the responses.
#[derive(clap::Parser)]
pub struct Args {
    #[clap(flatten)]
    output: output::Args,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not set up the async runtime")]
    Runtime(#[source] std::io::Error),
    #[error("could not complete the read cycle")]
    Poll(#[source] poll::Error),
    #[error("could not output the recorded responses")]
    Output(#[source] output::Error),
}

#[derive(serde::Serialize)]
pub struct TransactionRow {
    pub transaction_id: u64,
    #[serde(flatten)]
    pub response: PollResponse,
}

impl Row for TransactionRow {
    const HEADERS: &'static [&'static str] =
        &["Transaction", "Device", "Register", "Values", "Last read"];
    fn cells(&self) -> Vec<String> {
        let values = self.response.response.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        vec![
            self.transaction_id.to_string(),
            self.response.device.clone(),
            self.response.register.to_string(),
            values.join(" "),
            self.response.last_read.to_string(),
        ]
    }
}

pub fn runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

pub fn run(args: Args, settings: &Settings) -> Result<(), Error> {
    let runtime = runtime().map_err(Error::Runtime)?;
    let document = poll::read_cycle(&runtime, settings).map_err(Error::Poll)?;
    let rows = document
        .transactions
        .into_iter()
        .map(|(transaction_id, response)| TransactionRow { transaction_id, response });
    output::write_rows(args.output, rows).map_err(Error::Output)
}
