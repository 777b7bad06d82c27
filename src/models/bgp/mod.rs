//! BGP message model types.

pub mod aspath;
pub mod attributes;
pub mod capabilities;
pub mod community;

pub use aspath::*;
pub use attributes::*;
pub use capabilities::*;
pub use community::*;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::net::Ipv4Addr;

/// BGP message types (RFC 4271 + RFC 2918).
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum BgpMsgType {
    Open = 1,
    Update = 2,
    Notification = 3,
    KeepAlive = 4,
    RouteRefresh = 5,
}

/// Protocol version carried by every OPEN message.
pub const BGP_VERSION: u8 = 4;

/// Default hold time, in seconds.
pub const BGP_HOLD_SECS: u16 = 180;

/// Fixed fields of an OPEN message body.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///  +-+-+-+-+-+-+-+-+
///  |    Version    |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |     My Autonomous System      |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |           Hold Time           |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |                         BGP Identifier                        |
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BgpOpen {
    pub version: u8,
    pub my_as: u16,
    pub hold_time: u16,
    pub identifier: Ipv4Addr,
}

impl Default for BgpOpen {
    fn default() -> Self {
        BgpOpen {
            version: BGP_VERSION,
            my_as: 0,
            hold_time: BGP_HOLD_SECS,
            identifier: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// NOTIFICATION body: error code, subcode and opaque diagnostic data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BgpNotification {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_type_values() {
        assert_eq!(u8::from(BgpMsgType::Open), 1);
        assert_eq!(u8::from(BgpMsgType::RouteRefresh), 5);
        assert_eq!(BgpMsgType::try_from(2u8).unwrap(), BgpMsgType::Update);
        assert!(BgpMsgType::try_from(6u8).is_err());
    }

    #[test]
    fn test_open_defaults() {
        let open = BgpOpen::default();
        assert_eq!(open.version, 4);
        assert_eq!(open.hold_time, 180);
    }
}
