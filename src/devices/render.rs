//! DLNA render device handle for loopcast
//!
//! [`Render`] pairs a UPnP device with its AVTransport service and is the
//! wire-level handle every SOAP action goes through.

use crate::error::{Error, Result};
use http::Uri;
use log::{debug, warn};
use rupnp::ssdp::URN;
use std::time::Duration;

/// UPnP service URN for AVTransport
pub const AV_TRANSPORT: URN = URN::service("schemas-upnp-org", "AVTransport", 1);

/// A DLNA device which is capable of AVTransport actions.
#[derive(Debug, Clone)]
pub struct Render {
    /// The UPnP device
    pub device: rupnp::Device,
    /// The AVTransport service
    pub service: rupnp::Service,
}

impl Render {
    /// Fetches the device description behind `location` and wraps the
    /// device, provided it exposes an AVTransport service.
    ///
    /// The fetch runs under `timeout`; a slow or malformed description is a
    /// [`Error::BadDescription`], which discovery drops silently.
    pub async fn from_location(location: &str, timeout: Duration) -> Result<Self> {
        debug!("Fetching device description from {location}");
        let uri: Uri = location.parse().map_err(|e| Error::BadDescription {
            location: location.to_string(),
            reason: format!("invalid LOCATION URL: {e}"),
        })?;

        let device = tokio::time::timeout(timeout, rupnp::Device::from_url(uri))
            .await
            .map_err(|_| Error::BadDescription {
                location: location.to_string(),
                reason: format!("description fetch exceeded {timeout:?}"),
            })?
            .map_err(|err| Error::BadDescription {
                location: location.to_string(),
                reason: err.to_string(),
            })?;

        Self::from_device(device).ok_or_else(|| Error::BadDescription {
            location: location.to_string(),
            reason: "no AVTransport service in device description".to_string(),
        })
    }

    /// Wraps a UPnP device if it has an AVTransport service.
    pub fn from_device(device: rupnp::Device) -> Option<Self> {
        match device.find_service(&AV_TRANSPORT) {
            Some(service) => Some(Self {
                service: service.clone(),
                device,
            }),
            None => {
                warn!("No AVTransport service found on {}", device.friendly_name());
                None
            }
        }
    }

    /// Stable renderer id: the uuid part of the device UDN.
    pub fn renderer_id(&self) -> String {
        renderer_id_from_usn(self.device.udn())
    }

    /// Returns the host of the render
    pub fn host(&self) -> String {
        self.device
            .url()
            .authority()
            .map(|authority| authority.host().to_string())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Render {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} @ {}",
            self.device.device_type(),
            self.device.friendly_name(),
            self.device.url()
        )
    }
}

/// Extracts the stable renderer id from an SSDP USN or a device UDN.
///
/// `uuid:abc-123::urn:schemas-upnp-org:service:AVTransport:1` and
/// `uuid:abc-123` both map to `abc-123`.
pub fn renderer_id_from_usn(usn: &str) -> String {
    let head = usn.split("::").next().unwrap_or(usn);
    head.strip_prefix("uuid:").unwrap_or(head).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use std::time::Duration;

    const DESCRIPTION_WITHOUT_AVTRANSPORT: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion>
    <major>1</major>
    <minor>0</minor>
  </specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
    <friendlyName>shelf</friendlyName>
    <manufacturer>loopcast</manufacturer>
    <modelName>Mock Server</modelName>
    <UDN>uuid:99999999-0000-0000-0000-000000000000</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ConnectionManager:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:ConnectionManager</serviceId>
        <SCPDURL>/ConnectionManager/scpd.xml</SCPDURL>
        <controlURL>/ConnectionManager/control</controlURL>
        <eventSubURL>/ConnectionManager/event</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    #[tokio::test]
    async fn test_description_without_avtransport_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/description.xml");
                then.status(200)
                    .header("Content-Type", "text/xml; charset=\"utf-8\"")
                    .body(DESCRIPTION_WITHOUT_AVTRANSPORT);
            })
            .await;

        let result =
            Render::from_location(&server.url("/description.xml"), Duration::from_secs(2)).await;
        assert!(matches!(result, Err(Error::BadDescription { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_location_is_rejected() {
        let result =
            Render::from_location("http://127.0.0.1:1/description.xml", Duration::from_secs(1))
                .await;
        assert!(matches!(result, Err(Error::BadDescription { .. })));
    }

    #[test]
    fn test_renderer_id_from_full_usn() {
        assert_eq!(
            renderer_id_from_usn(
                "uuid:9ab0c000-f668-11de-9976-000000000000::urn:schemas-upnp-org:service:AVTransport:1"
            ),
            "9ab0c000-f668-11de-9976-000000000000"
        );
    }

    #[test]
    fn test_renderer_id_from_bare_udn() {
        assert_eq!(
            renderer_id_from_usn("uuid:9ab0c000-f668-11de-9976-000000000000"),
            "9ab0c000-f668-11de-9976-000000000000"
        );
    }

    #[test]
    fn test_renderer_id_without_uuid_prefix() {
        assert_eq!(renderer_id_from_usn("some-odd-identifier"), "some-odd-identifier");
    }
}
