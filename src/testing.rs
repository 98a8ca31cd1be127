//! Shared test support: a mock MediaRenderer served by httpmock.

use httpmock::Method::GET;
use httpmock::MockServer;

use crate::devices::Render;

/// Device description of the mock renderer. Control and event URLs are
/// relative, so rupnp resolves them against the mock server address.
pub const DEVICE_DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion>
    <major>1</major>
    <minor>0</minor>
  </specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>test</friendlyName>
    <manufacturer>loopcast</manufacturer>
    <modelName>Mock Renderer</modelName>
    <UDN>uuid:11111111-2222-3333-4444-555555555555</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <SCPDURL>/AVTransport/scpd.xml</SCPDURL>
        <controlURL>/AVTransport/control</controlURL>
        <eventSubURL>/AVTransport/event</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;

/// Renderer id carried in the mock device description UDN.
pub const MOCK_RENDERER_ID: &str = "11111111-2222-3333-4444-555555555555";

/// Mounts the device description on the mock server.
pub async fn mock_description(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/description.xml");
            then.status(200)
                .header("Content-Type", "text/xml; charset=\"utf-8\"")
                .body(DEVICE_DESCRIPTION);
        })
        .await;
}

/// Builds a [`Render`] against the mock server. `mock_description` must have
/// been mounted first.
pub async fn mock_render(server: &MockServer) -> Render {
    let location = server.url("/description.xml");
    let device = rupnp::Device::from_url(location.parse().expect("mock url parses"))
        .await
        .expect("mock description resolves");
    Render::from_device(device).expect("mock device has AVTransport")
}

/// A minimal successful SOAP response for `action`.
pub fn soap_ok(action: &str) -> String {
    format!(
        r#"<s:Envelope s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/" xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
    <s:Body>
        <u:{action}Response xmlns:u="urn:schemas-upnp-org:service:AVTransport:1"/>
    </s:Body>
</s:Envelope>"#
    )
}

/// A SOAP fault envelope carrying a UPnP error code.
pub fn soap_fault(code: u16, description: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
    <s:Body>
        <s:Fault>
            <faultcode>s:Client</faultcode>
            <faultstring>UPnPError</faultstring>
            <detail>
                <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
                    <errorCode>{code}</errorCode>
                    <errorDescription>{description}</errorDescription>
                </UPnPError>
            </detail>
        </s:Fault>
    </s:Body>
</s:Envelope>"#
    )
}

/// A GetTransportInfo response reporting `state`.
pub fn soap_transport_info(state: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
    <s:Body>
        <u:GetTransportInfoResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">
            <CurrentTransportState>{state}</CurrentTransportState>
            <CurrentTransportStatus>OK</CurrentTransportStatus>
            <CurrentSpeed>1</CurrentSpeed>
        </u:GetTransportInfoResponse>
    </s:Body>
</s:Envelope>"#
    )
}

/// A GetPositionInfo response reporting `rel_time` of `duration`.
pub fn soap_position_info(rel_time: &str, duration: &str, uri: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
    <s:Body>
        <u:GetPositionInfoResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">
            <Track>1</Track>
            <TrackDuration>{duration}</TrackDuration>
            <TrackMetaData></TrackMetaData>
            <TrackURI>{uri}</TrackURI>
            <RelTime>{rel_time}</RelTime>
            <AbsTime>NOT_IMPLEMENTED</AbsTime>
            <RelCount>0</RelCount>
            <AbsCount>0</AbsCount>
        </u:GetPositionInfoResponse>
    </s:Body>
</s:Envelope>"#
    )
}
