//! Device partitioning across SNMP transport instances.
//!
//! Devices are assigned by `hash(device_id) % instance_count`; each
//! instance keeps its own position in the sorted list of peers that
//! support SNMP.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use trapline_core::{
    DeviceId, EventBus, ServiceInfo, ServiceListChangedEvent, TransportEvent, SNMP_TRANSPORT_NAME,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Partition {
    instance_count: usize,
    instance_index: usize,
}

/// Tracks this instance's share of devices.
pub struct TransportBalancingService {
    partition: RwLock<Partition>,
    event_bus: EventBus,
}

impl TransportBalancingService {
    /// Starts as the only instance until membership says otherwise.
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            partition: RwLock::new(Partition {
                instance_count: 1,
                instance_index: 0,
            }),
            event_bus,
        }
    }

    pub fn instance_count(&self) -> usize {
        self.partition.read().instance_count
    }

    pub fn instance_index(&self) -> usize {
        self.partition.read().instance_index
    }

    /// Recalculate the partition from a membership event.
    ///
    /// Returns `true` when count or index changed, in which case a
    /// [`TransportEvent::TransportListChanged`] is published. An event
    /// with no SNMP peers leaves the previous partition in place.
    pub fn on_service_list_changed(&self, event: &ServiceListChangedEvent) -> bool {
        if !event.concerns(SNMP_TRANSPORT_NAME) {
            return false;
        }

        let mut peers: Vec<&ServiceInfo> = event
            .services
            .iter()
            .chain(std::iter::once(&event.current_service))
            .filter(|service| service.supports(SNMP_TRANSPORT_NAME))
            .collect();
        peers.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        peers.dedup_by(|a, b| a.service_id == b.service_id);

        if peers.is_empty() {
            debug!("No SNMP transport instances in service list, keeping partition");
            return false;
        }

        let instance_index = peers
            .iter()
            .position(|service| service.service_id == event.current_service.service_id);
        let Some(instance_index) = instance_index else {
            debug!(
                service_id = %event.current_service.service_id,
                "Current service does not support SNMP, keeping partition"
            );
            return false;
        };

        let next = Partition {
            instance_count: peers.len(),
            instance_index,
        };
        {
            let mut partition = self.partition.write();
            if *partition == next {
                return false;
            }
            *partition = next;
        }

        info!(
            instance_count = next.instance_count,
            instance_index = next.instance_index,
            "SNMP transport partition recalculated"
        );
        self.event_bus.publish(TransportEvent::TransportListChanged {
            instance_count: next.instance_count,
            instance_index: next.instance_index,
        });
        true
    }

    /// Whether this instance is responsible for the device.
    pub fn is_owned_by_this_instance(&self, device_id: &DeviceId) -> bool {
        let partition = *self.partition.read();
        owner_index(device_id, partition.instance_count) == partition.instance_index
    }
}

/// Instance index owning a device for a given instance count.
pub fn owner_index(device_id: &DeviceId, instance_count: usize) -> usize {
    let digest = Sha256::digest(device_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % instance_count.max(1) as u64) as usize
}
