use crate::error::DiscoveryError;
use crate::event::RawAnnouncement;
use crate::peer::LocalPeer;
use crate::service::{foreign, EventSender, Inbound};
use local_ip_address::local_ip;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio_util::sync::CancellationToken;

pub const SERVICE_TYPE: &str = "_peerlist._tcp.local.";

pub struct Discovery {
    daemon: ServiceDaemon,
    registered_service: Option<String>, // fullname of our own service
}

impl Discovery {
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()?;
        Ok(Self {
            daemon,
            registered_service: None,
        })
    }

    pub fn register(&mut self, local: &LocalPeer) -> Result<(), DiscoveryError> {
        if let Some(fullname) = &self.registered_service {
            tracing::info!("Unregistering old service: {}", fullname);
            let _ = self.daemon.unregister(fullname);
        }

        let ip = local_ip()?;

        // Instance and host names are both derived from the peer id, so a
        // removal can be mapped back to the id from the fullname alone.
        let m_hostname = format!("{}.local.", local.id);

        let system_hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "Unknown Device".to_string());

        let properties = [
            ("version", env!("CARGO_PKG_VERSION")),
            ("id", local.id.as_str()),
            ("alias", local.alias.as_str()),
            ("h", system_hostname.as_str()),
        ];

        let service_info = ServiceInfo::new(
            SERVICE_TYPE,
            local.id.as_str(),
            &m_hostname,
            &ip.to_string(),
            local.port,
            &properties[..],
        )?;

        let fullname = service_info.get_fullname().to_string();

        self.daemon.register(service_info)?;
        tracing::info!(
            "Registered service: {} ({}) on {}:{}",
            local.id,
            fullname,
            ip,
            local.port
        );

        self.registered_service = Some(fullname);

        Ok(())
    }

    pub fn browse(&self) -> Result<mdns_sd::Receiver<ServiceEvent>, DiscoveryError> {
        let receiver = self.daemon.browse(SERVICE_TYPE)?;
        Ok(receiver)
    }

    /// Register `local`, then forward resolved/removed services as events
    /// until `shutdown` fires or the daemon stops. Our own service is skipped.
    pub async fn run(
        mut self,
        local: LocalPeer,
        events: EventSender,
        shutdown: CancellationToken,
    ) -> Result<(), DiscoveryError> {
        let result = self.forward_events(&local, &events, &shutdown).await;
        // Drop sleeps while the goodbye packet goes out
        let _ = tokio::task::spawn_blocking(move || drop(self)).await;
        result
    }

    async fn forward_events(
        &mut self,
        local: &LocalPeer,
        events: &EventSender,
        shutdown: &CancellationToken,
    ) -> Result<(), DiscoveryError> {
        self.register(local)?;
        let receiver = self.browse()?;

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                event = receiver.recv_async() => match event {
                    Ok(event) => event,
                    Err(_) => return Ok(()),
                },
            };

            if let Some(inbound) = translate(event).and_then(|i| foreign(local, i)) {
                events.forward(inbound, shutdown).await?;
            }
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        if let Some(fullname) = &self.registered_service {
            tracing::info!("Unregistering service: {}", fullname);
            if let Err(e) = self.daemon.unregister(fullname) {
                tracing::error!("Failed to unregister service: {}", e);
            }
            // Give the daemon time to send the goodbye packet before its thread goes away
            std::thread::sleep(std::time::Duration::from_millis(300));
        }
    }
}

fn translate(event: ServiceEvent) -> Option<Inbound> {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let raw = RawAnnouncement {
                id: info.get_property_val_str("id").map(str::to_string),
                alias: info
                    .get_property_val_str("alias")
                    .or_else(|| info.get_property_val_str("h"))
                    .map(str::to_string),
                port: Some(info.get_port()),
                address: info.get_addresses().iter().next().map(|ip| ip.to_string()),
                leaving: false,
            };
            tracing::debug!(host = %info.get_hostname(), "Resolved service {:?}", raw.id);
            Some(raw.into_event())
        }
        ServiceEvent::ServiceRemoved(_ty, fullname) => Some(removal(&fullname).into_event()),
        _ => None,
    }
}

/// The instance name is the peer id, which may itself contain dots.
fn removal(fullname: &str) -> RawAnnouncement {
    let instance = fullname
        .strip_suffix(SERVICE_TYPE)
        .and_then(|rest| rest.strip_suffix('.'));
    RawAnnouncement {
        id: instance.map(str::to_string),
        leaving: true,
        ..Default::default()
    }
}
