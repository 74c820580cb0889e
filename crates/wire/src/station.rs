// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Station records parsed from `STA-FIRST`/`STA-NEXT` replies.
//!
//! The reply is one station per datagram: the first line is the MAC
//! address, the remaining lines `key=value` pairs. Unknown keys are kept so
//! nothing is lost between the supplicant and callers.

use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Station {
    pub address: String,
    pub device_name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub args: Vec<String>,
    pub named: Vec<(String, String)>,
}

impl Station {
    pub fn parse(buffer: &str) -> Station {
        let mut station = Station::default();
        for line in buffer.split('\n') {
            if line.is_empty() {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    station.named.push((key.to_string(), value.to_string()));
                }
                None => station.args.push(line.to_string()),
            }
        }
        station.address = station.arg(0).to_string();
        station.device_name =
            station.named("p2p_device_name").unwrap_or("").to_string();
        station.rx_bytes = station.numeric_or("rx_bytes", 0);
        station.tx_bytes = station.numeric_or("tx_bytes", 0);
        station.rx_packets = station.numeric_or("rx_packets", 0);
        station.tx_packets = station.numeric_or("tx_packets", 0);
        station
    }

    pub fn arg(&self, index: usize) -> &str {
        self.args.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn named(&self, name: &str) -> Option<&str> {
        self.named
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn numeric_or(&self, name: &str, default: u64) -> u64 {
        self.named(name).and_then(|value| value.parse().ok()).unwrap_or(default)
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.device_name, self.address)
    }
}

#[cfg(test)]
#[path = "station_tests.rs"]
mod tests;
