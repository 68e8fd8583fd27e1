//! Session lifecycle: startup, ownership changes, device updates and
//! shutdown.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use trapline_core::{DeviceId, Error, EventBusReceiver, Result, TransportEvent};

use crate::client::{ClientEvent, EVENT_CHANNEL_CAPACITY};
use crate::service::SnmpTransportService;
use crate::session::DeviceSession;

impl SnmpTransportService {
    /// Bind the protocol socket, start the event loops and establish
    /// sessions for every owned device.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.client.listen(&self.config.socket, tx).await?;
        info!(
            bind_port = self.config.socket.bind_port,
            transport = %self.config.socket.transport,
            "SNMP transport listening"
        );

        let client_loop = tokio::spawn(client_event_loop(Arc::downgrade(self), rx));
        let rebalance_loop = tokio::spawn(rebalance_loop(
            Arc::downgrade(self),
            self.event_bus.subscribe(),
        ));
        self.background.lock().extend([client_loop, rebalance_loop]);

        self.rebalance().await
    }

    /// Establish sessions for newly owned devices and destroy sessions of
    /// devices this instance no longer owns.
    pub async fn rebalance(self: &Arc<Self>) -> Result<()> {
        let lost: Vec<DeviceId> = self
            .sessions
            .iter()
            .filter(|entry| !self.balancer.is_owned_by_this_instance(entry.key()))
            .map(|entry| *entry.key())
            .collect();
        for device_id in lost {
            self.destroy_session(&device_id);
        }

        let page_size = self.config.device_page_size;
        let mut page = 0;
        loop {
            let devices = self
                .directory
                .list_devices_for_this_transport(page, page_size)
                .await?;
            for device_id in devices.devices {
                if self.sessions.contains_key(&device_id)
                    || !self.balancer.is_owned_by_this_instance(&device_id)
                {
                    continue;
                }
                if let Err(err) = self.establish_session(device_id).await {
                    warn!(device_id = %device_id, "Failed to establish SNMP session: {}", err);
                }
            }
            if !devices.has_next {
                break;
            }
            page += 1;
        }

        info!(sessions = self.sessions.len(), "SNMP sessions rebalanced");
        Ok(())
    }

    /// Create (or recreate) the session of a device and start its
    /// recurring queries. Devices without access-token credentials are
    /// skipped and `Ok(false)` is returned.
    pub async fn establish_session(self: &Arc<Self>, device_id: DeviceId) -> Result<bool> {
        let credentials = self.directory.get_device_credentials(device_id).await?;
        if !credentials.is_some_and(|c| c.is_access_token()) {
            debug!(device_id = %device_id, "Device has no access token credentials, skipping");
            return Ok(false);
        }
        let device = self
            .directory
            .get_device(device_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Device {}", device_id)))?;
        device.profile.validate()?;

        // the old session has to release its USM user before the new target
        // registers one under the same key
        if let Some((_, previous)) = self.sessions.remove(&device_id) {
            self.deactivate_session(&previous);
        }

        let target = self
            .auth
            .build_target(&device.profile, &device.transport)
            .await?;
        let session = Arc::new(DeviceSession::new(device, target));
        session.set_active(true);
        self.sessions.insert(device_id, session.clone());
        self.create_querying_tasks(&session);

        info!(
            device_id = %device_id,
            device_name = %session.info().device_name,
            target = %session.target().address,
            "SNMP session established"
        );
        self.event_bus
            .publish(TransportEvent::SessionEstablished { device_id });
        Ok(true)
    }

    /// Tear down the session of a device. Returns `false` if there was none.
    pub fn destroy_session(&self, device_id: &DeviceId) -> bool {
        let Some((_, session)) = self.sessions.remove(device_id) else {
            return false;
        };
        self.deactivate_session(&session);
        info!(device_id = %device_id, "SNMP session destroyed");
        true
    }

    fn deactivate_session(&self, session: &DeviceSession) {
        session.set_active(false);
        self.cancel_querying_tasks(session);
        self.auth.release_security_context(session);
        self.client.release(&session.device_id());
        self.event_bus.publish(TransportEvent::SessionClosed {
            device_id: session.device_id(),
        });
    }

    /// Device config or credentials changed.
    pub async fn on_device_updated(self: &Arc<Self>, device_id: DeviceId) -> Result<()> {
        if !self.balancer.is_owned_by_this_instance(&device_id) {
            self.destroy_session(&device_id);
            return Ok(());
        }
        match self.establish_session(device_id).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.destroy_session(&device_id);
                Ok(())
            }
            Err(err) => {
                self.destroy_session(&device_id);
                Err(err)
            }
        }
    }

    pub fn on_device_deleted(&self, device_id: &DeviceId) {
        self.destroy_session(device_id);
    }

    /// Re-establish every session whose profile in the directory differs
    /// from the one it runs with. A failed lookup leaves that session as it
    /// is and moves on to the next one.
    pub async fn on_device_profile_updated(self: &Arc<Self>) -> Result<()> {
        let sessions: Vec<Arc<DeviceSession>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        for session in sessions {
            let device_id = session.device_id();
            let device = match self.directory.get_device(device_id).await {
                Ok(device) => device,
                Err(err) => {
                    warn!(device_id = %device_id, "Failed to look up device after profile update: {}", err);
                    continue;
                }
            };
            match device {
                Some(device) if device.profile != *session.profile() => {
                    debug!(device_id = %device_id, "Device profile changed, re-establishing session");
                    if let Err(err) = self.on_device_updated(device_id).await {
                        warn!(device_id = %device_id, "Failed to re-establish SNMP session: {}", err);
                    }
                }
                Some(_) => {}
                None => {
                    self.destroy_session(&device_id);
                }
            }
        }
        Ok(())
    }

    /// Deactivate every session, stop both pools and close the client.
    pub async fn shutdown(&self) -> Result<()> {
        let device_ids: Vec<DeviceId> = self.sessions.iter().map(|e| *e.key()).collect();
        for device_id in &device_ids {
            self.destroy_session(device_id);
        }
        self.scheduler.shutdown();
        self.executor.shutdown();
        let background = std::mem::take(&mut *self.background.lock());
        for handle in background {
            handle.abort();
        }
        self.client.close().await?;
        info!(sessions = device_ids.len(), "SNMP transport stopped");
        Ok(())
    }
}

async fn client_event_loop(service: Weak<SnmpTransportService>, mut events: mpsc::Receiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        let Some(service) = service.upgrade() else {
            break;
        };
        match event {
            ClientEvent::Response(response) => service.on_response(response),
            ClientEvent::Trap(trap) => service.on_trap(trap),
        }
    }
    debug!("SNMP client event loop stopped");
}

async fn rebalance_loop(service: Weak<SnmpTransportService>, mut events: EventBusReceiver) {
    while let Some(event) = events.recv().await {
        if !matches!(event, TransportEvent::TransportListChanged { .. }) {
            continue;
        }
        let Some(service) = service.upgrade() else {
            break;
        };
        if let Err(err) = service.rebalance().await {
            warn!("Failed to rebalance SNMP sessions: {}", err);
        }
    }
}
