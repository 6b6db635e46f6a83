//! USB chapter 9 descriptors
//!
//! The firmware describes its device with a tree of `'static` descriptor
//! tables: one device, one configuration, one interface, and up to four
//! endpoints. The driver never copies the tree; it serializes the pieces it
//! needs into byte images when the host asks for them.

use crate::{Error, MAX_ENDPOINTS};
use usb_device::{descriptor::descriptor_type, endpoint::EndpointAddress, UsbDirection};

/// Device descriptor length
pub const DEVICE_LEN: usize = 18;
/// Configuration descriptor length, without its children
pub const CONFIGURATION_LEN: usize = 9;
/// Interface descriptor length
pub const INTERFACE_LEN: usize = 9;
/// Endpoint descriptor length
pub const ENDPOINT_LEN: usize = 7;

/// The largest configuration image this driver can produce
pub const CONFIGURATION_IMAGE_MAX: usize =
    CONFIGURATION_LEN + INTERFACE_LEN + ENDPOINT_LEN * MAX_ENDPOINTS;

/// US English, the only language this driver advertises
pub const LANG_ID_EN_US: u16 = 0x0409;

/// Endpoint transfer types supported by the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferType {
    Bulk = 0x02,
    Interrupt = 0x03,
}

impl TransferType {
    fn from_attributes(attributes: u8) -> Option<Self> {
        match attributes & 0b11 {
            0x02 => Some(TransferType::Bulk),
            0x03 => Some(TransferType::Interrupt),
            _ => None,
        }
    }
}

/// Describes the device
#[derive(Debug)]
pub struct DeviceDescriptor<'a> {
    /// BCD release of the USB spec. Use 0x0200 for USB 2.0.
    pub usb_release: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// Max packet size for endpoint 0. Must be 8, 16, 32, or 64.
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_release: u16,
    /// String index, or 0 for none
    pub manufacturer_string: u8,
    /// String index, or 0 for none
    pub product_string: u8,
    /// String index, or 0 for none
    pub serial_number_string: u8,
    /// The only configuration
    pub configuration: &'a ConfigurationDescriptor<'a>,
}

/// `bConfigurationValue` of the only configuration
pub const CONFIGURATION_VALUE: u8 = 1;

/// Describes the device's only configuration
#[derive(Debug)]
pub struct ConfigurationDescriptor<'a> {
    /// Must be [`CONFIGURATION_VALUE`]
    pub configuration_value: u8,
    pub configuration_string: u8,
    /// `bmAttributes`. Bit 7 is reserved and always set when serialized.
    pub attributes: u8,
    /// Max power in 2 mA units
    pub max_power: u8,
    pub interface: &'a InterfaceDescriptor<'a>,
}

/// Describes the configuration's only interface
#[derive(Debug)]
pub struct InterfaceDescriptor<'a> {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub interface_string: u8,
    /// In the order the endpoints should take FIFOs
    pub endpoints: &'a [EndpointDescriptor],
}

/// Describes one data endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// `bEndpointAddress`: number in the low nibble, bit 7 set for IN
    pub endpoint_address: u8,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
    pub interval: u8,
}

/// The string table
///
/// String index 0 is the language table. Index `n` (starting at 1) is
/// `strings[n - 1]`. Strings may be assembled at runtime, which is how
/// firmware typically supplies a serial number.
#[derive(Debug)]
pub struct StringDescriptors<'a> {
    pub strings: &'a [&'a str],
}

impl DeviceDescriptor<'_> {
    /// Serialize the device descriptor
    pub fn image(&self) -> [u8; DEVICE_LEN] {
        let mut buf = [0; DEVICE_LEN];
        buf[0] = DEVICE_LEN as u8;
        buf[1] = descriptor_type::DEVICE;
        buf[2..4].copy_from_slice(&self.usb_release.to_le_bytes());
        buf[4] = self.class;
        buf[5] = self.subclass;
        buf[6] = self.protocol;
        buf[7] = self.max_packet_size_0;
        buf[8..10].copy_from_slice(&self.vendor_id.to_le_bytes());
        buf[10..12].copy_from_slice(&self.product_id.to_le_bytes());
        buf[12..14].copy_from_slice(&self.device_release.to_le_bytes());
        buf[14] = self.manufacturer_string;
        buf[15] = self.product_string;
        buf[16] = self.serial_number_string;
        buf[17] = 1;
        buf
    }

    /// Check the tree for what the hardware can support
    pub fn validate(&self) -> Result<(), Error> {
        if self.configuration.configuration_value != CONFIGURATION_VALUE {
            return Err(Error::InvalidDescriptor);
        }
        let endpoints = self.configuration.interface.endpoints;
        if endpoints.len() > MAX_ENDPOINTS {
            return Err(Error::TooManyEndpoints);
        }
        for (idx, ep) in endpoints.iter().enumerate() {
            if !(1..=MAX_ENDPOINTS).contains(&ep.address().index()) {
                return Err(Error::InvalidEndpoint);
            }
            let duplicate = endpoints[..idx]
                .iter()
                .any(|other| other.endpoint_address == ep.endpoint_address);
            if duplicate {
                return Err(Error::InvalidEndpoint);
            }
        }
        Ok(())
    }
}

impl ConfigurationDescriptor<'_> {
    /// `wTotalLength` of this configuration
    pub fn total_length(&self) -> usize {
        CONFIGURATION_LEN + INTERFACE_LEN + ENDPOINT_LEN * self.interface.endpoints.len()
    }
}

impl InterfaceDescriptor<'_> {
    fn write_to(&self, buf: &mut [u8]) -> usize {
        buf[0] = INTERFACE_LEN as u8;
        buf[1] = descriptor_type::INTERFACE;
        buf[2] = self.interface_number;
        buf[3] = self.alternate_setting;
        buf[4] = self.endpoints.len() as u8;
        buf[5] = self.class;
        buf[6] = self.subclass;
        buf[7] = self.protocol;
        buf[8] = self.interface_string;
        INTERFACE_LEN
    }
}

impl EndpointDescriptor {
    /// A bulk endpoint
    pub const fn bulk(endpoint_address: u8, max_packet_size: u16) -> Self {
        EndpointDescriptor {
            endpoint_address,
            transfer_type: TransferType::Bulk,
            max_packet_size,
            interval: 0,
        }
    }

    /// An interrupt endpoint, polled every `interval` frames
    pub const fn interrupt(endpoint_address: u8, max_packet_size: u16, interval: u8) -> Self {
        EndpointDescriptor {
            endpoint_address,
            transfer_type: TransferType::Interrupt,
            max_packet_size,
            interval,
        }
    }

    /// Returns the endpoint address
    pub fn address(&self) -> EndpointAddress {
        EndpointAddress::from(self.endpoint_address)
    }

    /// Returns the endpoint direction
    pub fn direction(&self) -> UsbDirection {
        self.address().direction()
    }

    /// Serialize into `buf`, returning the number of bytes written
    pub fn write_to(&self, buf: &mut [u8]) -> usize {
        buf[0] = ENDPOINT_LEN as u8;
        buf[1] = descriptor_type::ENDPOINT;
        buf[2] = self.endpoint_address;
        buf[3] = self.transfer_type as u8;
        buf[4..6].copy_from_slice(&self.max_packet_size.to_le_bytes());
        buf[6] = self.interval;
        ENDPOINT_LEN
    }

    /// Parse an endpoint descriptor from its wire image
    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < ENDPOINT_LEN
            || buf[0] as usize != ENDPOINT_LEN
            || buf[1] != descriptor_type::ENDPOINT
        {
            return Err(Error::InvalidDescriptor);
        }
        let transfer_type = TransferType::from_attributes(buf[3]).ok_or(Error::InvalidDescriptor)?;
        Ok(EndpointDescriptor {
            endpoint_address: buf[2],
            transfer_type,
            max_packet_size: u16::from_le_bytes([buf[4], buf[5]]),
            interval: buf[6],
        })
    }
}

/// A flattened configuration descriptor
///
/// Holds the configuration, interface, and endpoint descriptors back to
/// back, the way `GET_DESCRIPTOR(CONFIGURATION)` returns them.
pub struct ConfigurationImage {
    buf: [u8; CONFIGURATION_IMAGE_MAX],
    len: usize,
}

impl ConfigurationImage {
    /// Flatten `config`
    ///
    /// Returns `TooManyEndpoints` if the interface has more endpoints than
    /// the image can hold.
    pub fn new(config: &ConfigurationDescriptor) -> Result<Self, Error> {
        let interface = config.interface;
        if interface.endpoints.len() > MAX_ENDPOINTS {
            return Err(Error::TooManyEndpoints);
        }

        let mut buf = [0; CONFIGURATION_IMAGE_MAX];
        let total_length = config.total_length();

        buf[0] = CONFIGURATION_LEN as u8;
        buf[1] = descriptor_type::CONFIGURATION;
        buf[2..4].copy_from_slice(&(total_length as u16).to_le_bytes());
        buf[4] = 1;
        buf[5] = config.configuration_value;
        buf[6] = config.configuration_string;
        buf[7] = config.attributes | 0x80;
        buf[8] = config.max_power;

        let mut len = CONFIGURATION_LEN;
        len += interface.write_to(&mut buf[len..]);
        for ep in interface.endpoints {
            len += ep.write_to(&mut buf[len..]);
        }
        debug_assert_eq!(len, total_length);

        Ok(ConfigurationImage { buf, len })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Walks a buffer of back-to-back descriptors
///
/// Yields `(bDescriptorType, descriptor bytes)`. Iteration stops at the
/// first descriptor whose `bLength` is zero or runs past the buffer.
pub struct DescriptorIter<'a> {
    buf: &'a [u8],
}

impl<'a> DescriptorIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        DescriptorIter { buf }
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.buf.first()? as usize;
        if len < 2 || len > self.buf.len() {
            return None;
        }
        let (desc, rest) = self.buf.split_at(len);
        self.buf = rest;
        Some((desc[1], desc))
    }
}

impl StringDescriptors<'_> {
    /// Serialize string descriptor `index` into `buf`
    ///
    /// Index 0 produces the language table. Returns `None` for an index
    /// past the end of the table. Strings that don't fit in one descriptor
    /// (or in `buf`) are truncated.
    pub fn write_to(&self, index: u8, buf: &mut [u8]) -> Option<usize> {
        if index == 0 {
            let lang = LANG_ID_EN_US.to_le_bytes();
            let image = [4, descriptor_type::STRING, lang[0], lang[1]];
            let len = image.len().min(buf.len());
            buf[..len].copy_from_slice(&image[..len]);
            return Some(len);
        }

        let string = self.strings.get(usize::from(index) - 1)?;
        let limit = buf.len().min(u8::MAX as usize) & !1;
        if limit < 2 {
            return Some(0);
        }

        let mut len = 2;
        for unit in string.encode_utf16() {
            if len + 2 > limit {
                break;
            }
            buf[len..len + 2].copy_from_slice(&unit.to_le_bytes());
            len += 2;
        }
        buf[0] = len as u8;
        buf[1] = descriptor_type::STRING;
        Some(len)
    }
}
