//! Process-wide record of the clients seen on any interface.

use std::{
    collections::HashMap,
    net::Ipv4Addr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use eui48::MacAddress;

/// What is known about a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub hardware_address: MacAddress,
    /// The number of distinct clients seen before this one.
    pub ordinal: u32,
    pub interface: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_offered: Option<Ipv4Addr>,
}

/// Shared by every listener, so a client keeps its ordinal whichever interface hears it.
#[derive(Debug, Default)]
pub struct ClientTable {
    records: Mutex<HashMap<MacAddress, ClientRecord>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request from `hardware_address` and returns the client's ordinal.
    ///
    /// Ordinals are handed out in the order clients are first seen and never reused.
    pub fn observe(&self, hardware_address: MacAddress, interface: &str) -> u32 {
        let now = Utc::now();
        let mut records = self.lock();
        let ordinal = records.len() as u32;
        let record = records.entry(hardware_address).or_insert_with(|| ClientRecord {
            hardware_address,
            ordinal,
            interface   : interface.to_owned(),
            first_seen  : now,
            last_seen   : now,
            last_offered: None,
        });
        record.last_seen = now;
        if record.interface != interface {
            trace!(
                "Client {} moved from {} to {}",
                hardware_address.to_hex_string(),
                record.interface,
                interface
            );
            record.interface = interface.to_owned();
        }
        record.ordinal
    }

    /// Remembers the address last offered to a known client.
    pub fn record_offer(&self, hardware_address: MacAddress, address: Ipv4Addr) {
        if let Some(record) = self.lock().get_mut(&hardware_address) {
            record.last_offered = Some(address);
        }
    }

    pub fn get(&self, hardware_address: &MacAddress) -> Option<ClientRecord> {
        self.lock().get(hardware_address).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// A handler that panicked mid-update leaves at worst a stale timestamp behind.
    fn lock(&self) -> MutexGuard<HashMap<MacAddress, ClientRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x52, 0x54, 0x00, 0x00, 0x00, last])
    }

    #[test]
    fn ordinals_follow_first_sighting() {
        let table = ClientTable::new();

        assert_eq!(table.observe(mac(1), "eth0"), 0);
        assert_eq!(table.observe(mac(2), "wlan0"), 1);
        assert_eq!(table.observe(mac(1), "wlan0"), 0);
        assert_eq!(table.observe(mac(3), "eth0"), 2);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(&mac(1)).unwrap().interface, "wlan0");
    }

    #[test]
    fn offer_is_remembered() {
        let table = ClientTable::new();
        table.record_offer(mac(9), Ipv4Addr::new(10, 0, 0, 150));
        assert!(table.is_empty());

        table.observe(mac(9), "eth0");
        table.record_offer(mac(9), Ipv4Addr::new(10, 0, 0, 150));

        let record = table.get(&mac(9)).unwrap();
        assert_eq!(record.last_offered, Some(Ipv4Addr::new(10, 0, 0, 150)));
        assert!(record.first_seen <= record.last_seen);
    }

    #[test]
    fn concurrent_listeners_get_distinct_ordinals() {
        let table = Arc::new(ClientTable::new());

        let handles: Vec<_> = (0..8u8)
            .map(|index| {
                let table = Arc::clone(&table);
                thread::spawn(move || table.observe(mac(index), "eth0"))
            })
            .collect();
        let mut ordinals: Vec<u32> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        ordinals.sort_unstable();

        assert_eq!(ordinals, (0..8).collect::<Vec<u32>>());
    }
}
