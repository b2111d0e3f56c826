use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::correlate::{self, ReadingRow};
use crate::document::{self, HostsDocument, PollDocument};
use crate::output;
use crate::settings::Settings;

/// Show the values of the latest poll responses next to the channels they belong to.
#[derive(clap::Parser)]
pub struct Args {
    /// Poll response file, `resp_file` of the settings by default.
    response: Option<PathBuf>,
    /// Refuse a response file that was written longer ago than this.
    #[arg(long, value_parser = humantime::parse_duration)]
    max_age: Option<Duration>,
    #[clap(flatten)]
    output: output::Args,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not load the document at {1:?}")]
    Load(#[source] document::Error, PathBuf),
    #[error("responses at {path:?} are older than {max_age}")]
    Stale { path: PathBuf, max_age: humantime::FormattedDuration },
    #[error("responses do not match the hosts document")]
    Join(#[source] correlate::Error),
    #[error("could not output the readings")]
    Output(#[source] output::Error),
}

/// Join the responses at `response` with the mapped hosts document of `settings`.
pub fn readings(
    settings: &Settings,
    response: &Path,
    max_age: Option<Duration>,
    now: jiff::Timestamp,
) -> Result<Vec<ReadingRow>, Error> {
    let poll = document::load::<PollDocument>(response)
        .map_err(|e| Error::Load(e, response.to_path_buf()))?;
    if let Some(max_age) = max_age {
        if poll.is_older_than(max_age, now) {
            return Err(Error::Stale {
                path: response.to_path_buf(),
                max_age: humantime::format_duration(max_age),
            });
        }
    }
    let hosts = document::load::<HostsDocument>(&settings.out_hosts)
        .map_err(|e| Error::Load(e, settings.out_hosts.clone()))?;
    correlate::join_readings(&poll.body, &hosts.body, now).map_err(Error::Join)
}

pub fn run(args: Args, settings: &Settings) -> Result<(), Error> {
    let response = args.response.as_deref().unwrap_or(&settings.resp_file);
    let rows = readings(settings, response, args.max_age, jiff::Timestamp::now())?;
    output::write_rows(args.output, rows).map_err(Error::Output)
}
