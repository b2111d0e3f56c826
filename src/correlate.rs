//! Joining the mapped documents into rows for display.
//!
//! Rows are matched up by device identifier and then by *position*: the n-th channel of a
//! device describes the n-th value read for it. Nothing in the documents enforces that, so a
//! channel list that is out of step with the register layout produces misaligned rows. The
//! only thing detected here is a device that is missing from the hosts document altogether.

use crate::document::{GatewayDocument, HostDevice, HostsDocument, PollDocument};
use crate::entity::{Channel, Concentrator, Register};
use serde::Serialize;
use tracing::warn;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("device `{device}` referenced by {referrer} is not present in the hosts document")]
    JoinMiss { device: String, referrer: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TopologyRow {
    pub eui64: String,
    pub channel_index: usize,
    #[serde(flatten)]
    pub channel: Channel,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReadingRow {
    pub device: String,
    pub value: serde_json::Number,
    pub unit: String,
    pub last_read: jiff::Timestamp,
    pub freshness: Freshness,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegisterRow {
    pub section: String,
    #[serde(flatten)]
    pub register: Register,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelRow {
    pub device: String,
    pub channel_index: usize,
    #[serde(flatten)]
    pub channel: Channel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConcentratorRow {
    pub device: String,
    #[serde(flatten)]
    pub concentrator: Concentrator,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
pub enum Freshness {
    Fresh,
    Stale,
    /// The concentrator does not say how old a reading may get.
    Unknown,
}

/// How long a reading of this concentrator's data stays fresh: `Data_Period` seconds times
/// `Data_StaleLimit` periods.
pub fn stale_after(concentrator: &Concentrator) -> Option<jiff::SignedDuration> {
    let period = concentrator.data_period.trim().parse::<u32>().ok()?;
    let limit = concentrator.data_stale_limit.trim().parse::<u32>().ok()?;
    let seconds = i64::from(period) * i64::from(limit);
    if seconds == 0 {
        return None;
    }
    Some(jiff::SignedDuration::from_secs(seconds))
}

pub fn freshness(
    concentrator: &Concentrator,
    last_read: jiff::Timestamp,
    now: jiff::Timestamp,
) -> Freshness {
    match stale_after(concentrator) {
        None => Freshness::Unknown,
        Some(limit) if now.duration_since(last_read) <= limit => Freshness::Fresh,
        Some(_) => Freshness::Stale,
    }
}

fn lookup<'a>(
    hosts: &'a HostsDocument,
    device: &str,
    referrer: impl FnOnce() -> String,
) -> Result<&'a HostDevice, Error> {
    hosts
        .devices
        .get(device)
        .ok_or_else(|| Error::JoinMiss { device: device.to_string(), referrer: referrer() })
}

/// One row per channel of every device referenced by a register of the gateway document.
pub fn join_topology(
    gateway: &GatewayDocument,
    hosts: &HostsDocument,
) -> Result<Vec<TopologyRow>, Error> {
    let mut rows = Vec::new();
    for (section, entry) in &gateway.sections {
        for register in &entry.registers {
            let host = lookup(hosts, &register.eui64, || {
                format!("register {} of section `{section}`", register.start_addr)
            })?;
            rows.extend(host.channels.iter().enumerate().map(|(channel_index, channel)| {
                TopologyRow {
                    eui64: register.eui64.clone(),
                    channel_index,
                    channel: channel.clone(),
                }
            }));
        }
    }
    Ok(rows)
}

/// One row per value of every poll response, labelled by the channel in the same position.
pub fn join_readings(
    poll: &PollDocument,
    hosts: &HostsDocument,
    now: jiff::Timestamp,
) -> Result<Vec<ReadingRow>, Error> {
    let mut rows = Vec::new();
    for (transaction_id, response) in &poll.transactions {
        let host = lookup(hosts, &response.device, || format!("transaction {transaction_id}"))?;
        if host.channels.len() != response.response.len() {
            warn!(
                transaction_id,
                device = %response.device,
                channels = host.channels.len(),
                values = response.response.len(),
                "channel count does not match the number of values read"
            );
        }
        let status = freshness(&host.concentrator, response.last_read, now);
        rows.extend(response.response.iter().zip(&host.channels).map(|(value, channel)| {
            ReadingRow {
                device: response.device.clone(),
                value: value.clone(),
                unit: channel.unit.clone(),
                last_read: response.last_read,
                freshness: status,
            }
        }));
    }
    Ok(rows)
}

pub fn register_rows(gateway: &GatewayDocument) -> Vec<RegisterRow> {
    gateway
        .sections
        .iter()
        .flat_map(|(section, entry)| {
            entry.registers.iter().map(move |register| RegisterRow {
                section: section.clone(),
                register: register.clone(),
            })
        })
        .collect()
}

pub fn channel_rows(hosts: &HostsDocument) -> Vec<ChannelRow> {
    hosts
        .devices
        .iter()
        .flat_map(|(device, host)| {
            host.channels.iter().enumerate().map(move |(channel_index, channel)| ChannelRow {
                device: device.clone(),
                channel_index,
                channel: channel.clone(),
            })
        })
        .collect()
}

pub fn concentrator_rows(hosts: &HostsDocument) -> Vec<ConcentratorRow> {
    hosts
        .devices
        .iter()
        .map(|(device, host)| ConcentratorRow {
            device: device.clone(),
            concentrator: host.concentrator.clone(),
        })
        .collect()
}
