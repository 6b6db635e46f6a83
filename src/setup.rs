//! SETUP packets and standard request decoding

use usb_device::{
    control::{Recipient, Request, RequestType},
    endpoint::EndpointAddress,
    UsbDirection,
};

/// SETUP packet length
pub const SETUP_LEN: usize = 8;

/// One control transfer request, as captured from the bus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupPacket {
    /// `bmRequestType`
    pub request_type: u8,
    /// `bRequest`
    pub request: u8,
    /// `wValue`
    pub value: u16,
    /// `wIndex`
    pub index: u16,
    /// `wLength`
    pub length: u16,
}

impl SetupPacket {
    /// Decode the little-endian wire image
    pub fn parse(buf: &[u8; SETUP_LEN]) -> Self {
        SetupPacket {
            request_type: buf[0],
            request: buf[1],
            value: u16::from_le_bytes([buf[2], buf[3]]),
            index: u16::from_le_bytes([buf[4], buf[5]]),
            length: u16::from_le_bytes([buf[6], buf[7]]),
        }
    }

    /// Encode into the little-endian wire image
    pub fn to_bytes(&self) -> [u8; SETUP_LEN] {
        let mut buf = [0; SETUP_LEN];
        buf[0] = self.request_type;
        buf[1] = self.request;
        buf[2..4].copy_from_slice(&self.value.to_le_bytes());
        buf[4..6].copy_from_slice(&self.index.to_le_bytes());
        buf[6..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Direction of the data stage
    pub fn direction(&self) -> UsbDirection {
        UsbDirection::from(self.request_type & 0x80)
    }

    /// `bmRequestType` bits 6:5
    pub fn kind(&self) -> RequestType {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    /// `bmRequestType` bits 4:0
    pub fn recipient(&self) -> Recipient {
        match self.request_type & 0b1_1111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }

    /// Decode a standard request
    ///
    /// Returns `None` for class, vendor, and reserved requests.
    pub fn standard(&self) -> Option<StandardRequest> {
        if self.kind() != RequestType::Standard {
            return None;
        }
        Some(match self.request {
            Request::GET_STATUS => StandardRequest::GetStatus(self.recipient()),
            Request::CLEAR_FEATURE => match (self.recipient(), self.value) {
                (Recipient::Endpoint, Request::FEATURE_ENDPOINT_HALT) => {
                    StandardRequest::ClearEndpointHalt(EndpointAddress::from(self.index as u8))
                }
                _ => StandardRequest::ClearFeature,
            },
            Request::SET_FEATURE => StandardRequest::SetFeature,
            Request::SET_ADDRESS => StandardRequest::SetAddress(self.value),
            Request::GET_DESCRIPTOR => StandardRequest::GetDescriptor {
                descriptor_type: (self.value >> 8) as u8,
                descriptor_index: self.value as u8,
                length: self.length,
            },
            Request::SET_DESCRIPTOR => StandardRequest::SetDescriptor,
            Request::GET_CONFIGURATION => StandardRequest::GetConfiguration,
            Request::SET_CONFIGURATION => StandardRequest::SetConfiguration(self.value),
            Request::GET_INTERFACE => StandardRequest::GetInterface,
            Request::SET_INTERFACE => StandardRequest::SetInterface,
            Request::SYNCH_FRAME => StandardRequest::SynchFrame,
            _ => StandardRequest::Unknown(self.request),
        })
    }
}

/// A decoded standard request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StandardRequest {
    GetStatus(Recipient),
    ClearEndpointHalt(EndpointAddress),
    /// Any `CLEAR_FEATURE` other than an endpoint halt
    ClearFeature,
    SetFeature,
    /// The raw `wValue`; not yet range checked
    SetAddress(u16),
    GetDescriptor {
        descriptor_type: u8,
        descriptor_index: u8,
        length: u16,
    },
    SetDescriptor,
    GetConfiguration,
    /// The raw `wValue`
    SetConfiguration(u16),
    GetInterface,
    SetInterface,
    SynchFrame,
    Unknown(u8),
}

#[cfg(test)]
mod tests {
    use super::{SetupPacket, StandardRequest};
    use usb_device::{
        control::{Recipient, RequestType},
        endpoint::EndpointAddress,
        UsbDirection,
    };

    #[test]
    fn parse_get_device_descriptor() {
        let setup = SetupPacket::parse(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
        assert_eq!(setup.direction(), UsbDirection::In);
        assert_eq!(setup.kind(), RequestType::Standard);
        assert_eq!(setup.recipient(), Recipient::Device);
        assert_eq!(
            setup.standard(),
            Some(StandardRequest::GetDescriptor {
                descriptor_type: 1,
                descriptor_index: 0,
                length: 18
            })
        );
    }

    #[test]
    fn wire_image_is_little_endian() {
        let setup = SetupPacket {
            request_type: 0x41,
            request: 0xA5,
            value: 0x1234,
            index: 0x5678,
            length: 0x9ABC,
        };
        let bytes = setup.to_bytes();
        assert_eq!(bytes, [0x41, 0xA5, 0x34, 0x12, 0x78, 0x56, 0xBC, 0x9A]);
        assert_eq!(SetupPacket::parse(&bytes), setup);
        assert_eq!(setup.kind(), RequestType::Vendor);
        assert_eq!(setup.recipient(), Recipient::Interface);
        assert_eq!(setup.standard(), None);
    }

    #[test]
    fn class_request_is_not_standard() {
        let setup = SetupPacket::parse(&[0x21, 0x09, 0, 0, 0, 0, 0, 0]);
        assert_eq!(setup.kind(), RequestType::Class);
        assert_eq!(setup.direction(), UsbDirection::Out);
        assert_eq!(setup.standard(), None);
    }

    #[test]
    fn clear_endpoint_halt() {
        let setup = SetupPacket::parse(&[0x02, 0x01, 0x00, 0x00, 0x81, 0x00, 0x00, 0x00]);
        assert_eq!(
            setup.standard(),
            Some(StandardRequest::ClearEndpointHalt(EndpointAddress::from(
                0x81
            )))
        );

        let remote_wakeup = SetupPacket::parse(&[0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(remote_wakeup.standard(), Some(StandardRequest::ClearFeature));
    }

    #[test]
    fn set_configuration_keeps_raw_value() {
        let setup = SetupPacket::parse(&[0x00, 0x09, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            setup.standard(),
            Some(StandardRequest::SetConfiguration(0x0102))
        );
    }
}
