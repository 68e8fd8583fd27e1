//! Live per-device session state.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use trapline_core::{
    DeviceId, DeviceProfileTransportConfig, DeviceTransportConfig, SessionInfo, SnmpDevice,
    SnmpProtocolVersion, TenantId,
};

use crate::scheduler::ScheduledHandle;
use crate::target::Target;

/// Binding of a device to its target, security context and recurring
/// queries.
///
/// A session is either active or inactive. Recurring queries only run
/// while it is active.
#[derive(Debug)]
pub struct DeviceSession {
    info: SessionInfo,
    device: SnmpDevice,
    target: Target,
    active: AtomicBool,
    querying_tasks: Mutex<Vec<ScheduledHandle>>,
}

impl DeviceSession {
    /// New, inactive session.
    pub fn new(device: SnmpDevice, target: Target) -> Self {
        Self {
            info: SessionInfo::for_device(&device),
            device,
            target,
            active: AtomicBool::new(false),
            querying_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn device_id(&self) -> DeviceId {
        self.device.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.device.tenant_id
    }

    pub fn device(&self) -> &SnmpDevice {
        &self.device
    }

    pub fn profile(&self) -> &DeviceProfileTransportConfig {
        &self.device.profile
    }

    pub fn device_config(&self) -> &DeviceTransportConfig {
        &self.device.transport
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Context for scoped PDUs; only v3 exchanges carry one.
    pub fn context_name(&self) -> Option<&str> {
        match self.device.transport.protocol_version {
            SnmpProtocolVersion::V3 => {
                Some(self.device.transport.context_name.as_deref().unwrap_or(""))
            }
            SnmpProtocolVersion::V1 | SnmpProtocolVersion::V2c => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn add_querying_task(&self, handle: ScheduledHandle) {
        self.querying_tasks.lock().push(handle);
    }

    /// Remove and return every scheduled handle.
    pub fn take_querying_tasks(&self) -> Vec<ScheduledHandle> {
        std::mem::take(&mut *self.querying_tasks.lock())
    }

    pub fn querying_task_count(&self) -> usize {
        self.querying_tasks.lock().len()
    }
}
