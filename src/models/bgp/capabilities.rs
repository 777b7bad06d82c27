use crate::error::BgpError;
use crate::models::network::{Afi, Asn, Safi};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};

/// BGP capability codes (RFC 5492).
///
/// <https://www.iana.org/assignments/capability-codes/capability-codes.xhtml>
#[allow(non_camel_case_types)]
#[derive(Debug, FromPrimitive, IntoPrimitive, PartialEq, Eq, Hash, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum BgpCapabilityCode {
    MULTIPROTOCOL = 1,
    ROUTE_REFRESH = 2,
    OUTBOUND_ROUTE_FILTERING = 3,
    EXTENDED_NEXT_HOP = 5,
    EXTENDED_MESSAGE = 6,
    GRACEFUL_RESTART = 64,
    ASN32 = 65,
    ADD_PATH = 69,
    ENHANCED_ROUTE_REFRESH = 70,
    FQDN = 73,

    /// Catch-all for any deprecated, unassigned, or reserved codes.
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// One capability as carried inside an OPEN optional parameter: code plus
/// the undecoded value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub code: BgpCapabilityCode,
    pub data: Bytes,
}

impl Capability {
    pub fn new(code: BgpCapabilityCode, data: Bytes) -> Capability {
        Capability { code, data }
    }

    /// Decodes the typed value for the codes the crate understands; other
    /// codes come back as [`CapabilityValue::Raw`].
    pub fn value(&self) -> Result<CapabilityValue, BgpError> {
        let data = self.data.clone();
        Ok(match self.code {
            BgpCapabilityCode::MULTIPROTOCOL => {
                CapabilityValue::Multiprotocol(MultiprotocolCapability::parse(data)?)
            }
            BgpCapabilityCode::ROUTE_REFRESH => {
                if !data.is_empty() {
                    return Err(BgpError::BadParamLen);
                }
                CapabilityValue::RouteRefresh
            }
            BgpCapabilityCode::GRACEFUL_RESTART => {
                CapabilityValue::GracefulRestart(GracefulRestartCapability::parse(data)?)
            }
            BgpCapabilityCode::ASN32 => CapabilityValue::Asn32(Asn32Capability::parse(data)?),
            BgpCapabilityCode::ADD_PATH => {
                CapabilityValue::AddPath(AddPathCapability::parse(data)?)
            }
            BgpCapabilityCode::FQDN => CapabilityValue::Fqdn(FqdnCapability::parse(data)?),
            _ => CapabilityValue::Raw(data),
        })
    }
}

/// Parsed capability values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityValue {
    /// Undecoded capability data.
    Raw(Bytes),
    /// Multiprotocol Extensions - RFC 4760
    Multiprotocol(MultiprotocolCapability),
    /// Route Refresh - RFC 2918 (no body)
    RouteRefresh,
    /// Graceful Restart - RFC 4724
    GracefulRestart(GracefulRestartCapability),
    /// 4-octet AS number - RFC 6793
    Asn32(Asn32Capability),
    /// ADD-PATH - RFC 7911
    AddPath(AddPathCapability),
    /// Hostname/domain - draft-walton-bgp-hostname-capability
    Fqdn(FqdnCapability),
}

/// Multiprotocol Extensions capability: one `<AFI, reserved, SAFI>` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MultiprotocolCapability {
    pub afi: Afi,
    pub safi: Safi,
}

impl MultiprotocolCapability {
    pub fn new(afi: Afi, safi: Safi) -> Self {
        Self { afi, safi }
    }

    pub fn parse(mut data: Bytes) -> Result<Self, BgpError> {
        if data.len() != 4 {
            return Err(BgpError::BadParamLen);
        }
        let afi = Afi::try_from(data.get_u16()).map_err(|_| BgpError::BadParamLen)?;
        let _reserved = data.get_u8();
        let safi = Safi::try_from(data.get_u8()).map_err(|_| BgpError::BadParamLen)?;
        Ok(Self { afi, safi })
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(4);
        bytes.put_u16(self.afi.into());
        bytes.put_u8(0);
        bytes.put_u8(self.safi.into());
        bytes.freeze()
    }
}

/// 4-octet AS capability value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Asn32Capability {
    pub asn: Asn,
}

impl Asn32Capability {
    pub fn new(asn: Asn) -> Self {
        Self { asn }
    }

    pub fn parse(mut data: Bytes) -> Result<Self, BgpError> {
        if data.len() != 4 {
            return Err(BgpError::BadParamLen);
        }
        Ok(Self {
            asn: Asn::new(data.get_u32()),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(4);
        bytes.put_u32(self.asn.get());
        bytes.freeze()
    }
}

/// Send/Receive mode of one ADD-PATH address family (RFC 7911).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddPathDirection {
    Receive = 1,
    Send = 2,
    SendReceive = 3,
}

impl TryFrom<u8> for AddPathDirection {
    type Error = BgpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AddPathDirection::Receive),
            2 => Ok(AddPathDirection::Send),
            3 => Ok(AddPathDirection::SendReceive),
            _ => Err(BgpError::BadParamLen),
        }
    }
}

/// ADD-PATH capability: a list of 4-byte `<AFI, SAFI, Send/Receive>`
/// entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddPathCapability {
    pub entries: Vec<(Afi, Safi, AddPathDirection)>,
}

impl AddPathCapability {
    pub fn new(entries: Vec<(Afi, Safi, AddPathDirection)>) -> Self {
        Self { entries }
    }

    pub fn parse(mut data: Bytes) -> Result<Self, BgpError> {
        if data.len() % 4 != 0 {
            return Err(BgpError::BadParamLen);
        }
        let mut entries = Vec::with_capacity(data.len() / 4);
        while data.len() >= 4 {
            let afi = Afi::try_from(data.get_u16()).map_err(|_| BgpError::BadParamLen)?;
            let safi = Safi::try_from(data.get_u8()).map_err(|_| BgpError::BadParamLen)?;
            let dir = AddPathDirection::try_from(data.get_u8())?;
            entries.push((afi, safi, dir));
        }
        Ok(Self { entries })
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(self.entries.len() * 4);
        for (afi, safi, dir) in &self.entries {
            bytes.put_u16((*afi).into());
            bytes.put_u8((*safi).into());
            bytes.put_u8(*dir as u8);
        }
        bytes.freeze()
    }
}

/// Graceful Restart capability (RFC 4724): 4-bit flags, 12-bit restart
/// time, then `<AFI, SAFI, flags>` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GracefulRestartCapability {
    pub restart_state: bool,
    pub restart_time: u16,
    pub families: Vec<(Afi, Safi, bool)>,
}

impl GracefulRestartCapability {
    pub fn new(restart_state: bool, restart_time: u16, families: Vec<(Afi, Safi, bool)>) -> Self {
        Self {
            restart_state,
            restart_time,
            families,
        }
    }

    pub fn parse(mut data: Bytes) -> Result<Self, BgpError> {
        if data.len() < 2 || (data.len() - 2) % 4 != 0 {
            return Err(BgpError::BadParamLen);
        }
        let word = data.get_u16();
        let restart_state = word & 0x8000 != 0;
        let restart_time = word & 0x0fff;

        let mut families = Vec::with_capacity(data.len() / 4);
        while data.len() >= 4 {
            let afi = Afi::try_from(data.get_u16()).map_err(|_| BgpError::BadParamLen)?;
            let safi = Safi::try_from(data.get_u8()).map_err(|_| BgpError::BadParamLen)?;
            let forwarding = data.get_u8() & 0x80 != 0;
            families.push((afi, safi, forwarding));
        }
        Ok(Self {
            restart_state,
            restart_time,
            families,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(2 + self.families.len() * 4);
        let mut word = self.restart_time & 0x0fff;
        if self.restart_state {
            word |= 0x8000;
        }
        bytes.put_u16(word);
        for (afi, safi, forwarding) in &self.families {
            bytes.put_u16((*afi).into());
            bytes.put_u8((*safi).into());
            bytes.put_u8(if *forwarding { 0x80 } else { 0 });
        }
        bytes.freeze()
    }
}

/// FQDN capability: length-prefixed hostname and domain name strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FqdnCapability {
    pub hostname: String,
    pub domain: String,
}

impl FqdnCapability {
    pub fn new(hostname: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            domain: domain.into(),
        }
    }

    pub fn parse(mut data: Bytes) -> Result<Self, BgpError> {
        let read_str = |data: &mut Bytes| -> Result<String, BgpError> {
            if data.is_empty() {
                return Err(BgpError::BadParamLen);
            }
            let n = data.get_u8() as usize;
            if data.len() < n {
                return Err(BgpError::BadParamLen);
            }
            let raw = data.split_to(n);
            Ok(raw.iter().map(|&b| b as char).collect())
        };
        let hostname = read_str(&mut data)?;
        let domain = read_str(&mut data)?;
        Ok(Self { hostname, domain })
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(2 + self.hostname.len() + self.domain.len());
        bytes.put_u8(self.hostname.len() as u8);
        bytes.put_slice(self.hostname.as_bytes());
        bytes.put_u8(self.domain.len() as u8);
        bytes.put_slice(self.domain.as_bytes());
        bytes.freeze()
    }
}
