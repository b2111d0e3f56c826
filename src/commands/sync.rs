use tracing::{error, info};

use crate::mapping;
use crate::output;
use crate::poll;
use crate::settings::Settings;

use super::{interpret, read};

/// Keep remapping the configuration, reading the device and showing the readings, once every
/// `interval` of the settings.
#[derive(clap::Parser)]
pub struct Args {
    #[clap(flatten)]
    output: output::Args,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not set up the async runtime")]
    Runtime(#[source] std::io::Error),
    #[error("could not map the configuration")]
    Map(#[source] mapping::Error),
    #[error("could not complete the read cycle")]
    Poll(#[source] poll::Error),
    #[error("could not interpret the responses")]
    Interpret(#[source] interpret::Error),
    #[error("could not output the readings")]
    Output(#[source] output::Error),
}

/// One refresh: remap both configuration files, read the device and report what was read.
pub fn refresh(
    runtime: &tokio::runtime::Runtime,
    settings: &Settings,
    output: output::Args,
) -> Result<(), Error> {
    mapping::map_gateway(&settings.in_gw, &settings.out_gw).map_err(Error::Map)?;
    mapping::map_hosts(&settings.in_hosts, &settings.out_hosts).map_err(Error::Map)?;
    poll::read_cycle(runtime, settings).map_err(Error::Poll)?;
    let rows = interpret::readings(settings, &settings.resp_file, None, jiff::Timestamp::now())
        .map_err(Error::Interpret)?;
    output::write_rows(output, rows).map_err(Error::Output)
}

/// Runs until the process is terminated. A failed refresh is logged and retried on the next
/// interval.
pub fn run(args: Args, settings: &Settings) -> Result<(), Error> {
    let runtime = read::runtime().map_err(Error::Runtime)?;
    for cycle in 0u64.. {
        info!(cycle, "refreshing");
        if let Err(err) = refresh(&runtime, settings, args.output.clone()) {
            error!(cycle, err = ?err, "refresh failed");
        }
        std::thread::sleep(settings.interval);
    }
    Ok(())
}
