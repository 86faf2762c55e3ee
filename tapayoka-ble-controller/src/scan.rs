//! Scan bookkeeping shared by the transports: name filtering, deduplication
//! and the session that keeps discovered ids resolvable.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tapayoka_proto::{DiscoveredDevice, wallet_prefix_from_name};

/// How long ids from one scan stay resolvable when no new scan happens
pub const SESSION_TTL: Duration = Duration::from_secs(5 * 60);

/// RSSI reported when the radio never gave a reading
pub const RSSI_UNKNOWN: i16 = -127;

/// One observation of an advertising device
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Filter observations by name prefix and merge repeats of the same id
///
/// Devices keep the position of their first observation and the most recent
/// signal strength.
pub fn collect_devices(ads: impl IntoIterator<Item = Advertisement>) -> Vec<DiscoveredDevice> {
    let mut devices: Vec<DiscoveredDevice> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for ad in ads {
        if let Some(&i) = index.get(&ad.id) {
            let device = &mut devices[i];
            if let Some(rssi) = ad.rssi {
                device.rssi = rssi;
            }
            continue;
        }

        let Some(name) = ad.name else { continue };
        let Some(wallet_address_prefix) = wallet_prefix_from_name(&name) else {
            continue;
        };

        index.insert(ad.id.clone(), devices.len());
        devices.push(DiscoveredDevice {
            id: ad.id,
            name,
            wallet_address_prefix,
            rssi: ad.rssi.unwrap_or(RSSI_UNKNOWN),
        });
    }

    devices
}

/// Handles from the latest scan, valid until replaced or expired
pub struct ScanSession<P> {
    devices: HashMap<String, SessionEntry<P>>,
    started_at: Instant,
    ttl: Duration,
}

struct SessionEntry<P> {
    name: String,
    handle: P,
}

impl<P> ScanSession<P> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            devices: HashMap::new(),
            started_at: Instant::now(),
            ttl,
        }
    }

    pub fn insert(&mut self, device: &DiscoveredDevice, handle: P) {
        self.devices.insert(
            device.id.clone(),
            SessionEntry {
                name: device.name.clone(),
                handle,
            },
        );
    }

    /// Look a device up by id (any case) or by advertised name
    pub fn resolve(&self, key: &str) -> Option<&P> {
        if self.is_expired() {
            return None;
        }
        if let Some(entry) = self.devices.get(key) {
            return Some(&entry.handle);
        }
        self.devices
            .iter()
            .find(|(id, entry)| id.eq_ignore_ascii_case(key) || entry.name == key)
            .map(|(_, entry)| &entry.handle)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    pub fn is_expired(&self) -> bool {
        self.started_at.elapsed() >= self.ttl
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad(id: &str, name: Option<&str>, rssi: Option<i16>) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: name.map(String::from),
            rssi,
        }
    }

    #[test]
    fn filters_by_name_prefix() {
        let devices = collect_devices(vec![
            ad("a", Some("tapayoka-ab12cd34"), Some(-40)),
            ad("b", Some("Other-1234"), Some(-50)),
            ad("c", None, Some(-60)),
            ad("d", Some("tapayoka-"), Some(-70)),
        ]);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "a");
        assert_eq!(devices[0].wallet_address_prefix, "ab12cd34");
        assert!(devices.iter().all(|d| d.name.starts_with("tapayoka-")));
    }

    #[test]
    fn deduplicates_keeping_latest_rssi() {
        let devices = collect_devices(vec![
            ad("a", Some("tapayoka-ab12cd34"), Some(-80)),
            ad("b", Some("tapayoka-00ff00ff"), None),
            ad("a", Some("tapayoka-ab12cd34"), Some(-55)),
            ad("a", None, None),
        ]);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "a");
        assert_eq!(devices[0].rssi, -55);
        assert_eq!(devices[1].rssi, RSSI_UNKNOWN);
    }

    #[test]
    fn nameless_first_sighting_is_picked_up_later() {
        let devices = collect_devices(vec![
            ad("a", None, Some(-80)),
            ad("a", Some("tapayoka-ab12cd34"), Some(-70)),
        ]);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].rssi, -70);
    }

    fn scanned(id: &str, name: &str) -> DiscoveredDevice {
        collect_devices([ad(id, Some(name), Some(-40))]).remove(0)
    }

    #[test]
    fn session_expires() {
        let mut session = ScanSession::new(Duration::from_secs(60));
        session.insert(&scanned("a", "tapayoka-ab12cd34"), 1u8);
        assert_eq!(session.resolve("a"), Some(&1));
        assert_eq!(session.resolve("b"), None);

        let mut expired = ScanSession::new(Duration::ZERO);
        expired.insert(&scanned("a", "tapayoka-ab12cd34"), 1u8);
        assert_eq!(expired.resolve("a"), None);
        assert_eq!(expired.len(), 1);
    }

    #[test]
    fn session_resolves_address_or_name() {
        let mut session = ScanSession::new(SESSION_TTL);
        session.insert(&scanned("AA:BB:CC:DD:EE:01", "tapayoka-ab12cd34"), 1u8);
        session.insert(&scanned("AA:BB:CC:DD:EE:02", "tapayoka-00ff00ff"), 2u8);

        assert_eq!(session.resolve("AA:BB:CC:DD:EE:01"), Some(&1));
        assert_eq!(session.resolve("aa:bb:cc:dd:ee:02"), Some(&2));
        assert_eq!(session.resolve("tapayoka-00ff00ff"), Some(&2));
        assert_eq!(session.resolve("tapayoka-ffffffff"), None);
        assert!(session.contains("AA:BB:CC:DD:EE:01"));
        assert!(!session.contains("aa:bb:cc:dd:ee:01"));
    }
}
