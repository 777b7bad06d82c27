//! OPEN optional-parameter / capability sub-iterator.

use super::{BgpMsg, IterState, MsgState, PARAMS_LENGTH_OFFSET, PARAMS_OFFSET};
use crate::error::BgpError;
use crate::models::bgp::{BgpCapabilityCode, BgpMsgType, Capability};
use bytes::Bytes;
use log::debug;

/// Optional parameter type carrying capabilities (RFC 5492).
const PARAM_CAPABILITY: u8 = 2;

const PARAM_HEADER_SIZE: usize = 2;
const CAP_HEADER_SIZE: usize = 2;

/// Largest value an optional-parameter length octet can carry.
const PARAM_LENGTH_MAX: usize = 0xff;

pub(crate) enum CapsIter {
    Read {
        /// Next capability inside the current capability parameter.
        ptr: usize,
        /// End of the current capability parameter value.
        param_end: usize,
        /// Start of the next unexamined parameter.
        next_param: usize,
        /// End of the whole parameter region.
        limit: usize,
    },
    Write {
        /// Offset of the open capability parameter header, if any.
        param_start: Option<usize>,
    },
}

impl BgpMsg {
    /// Positions the capability iterator to the first entry. Must be called
    /// before reading or writing capabilities.
    pub fn start_caps(&mut self) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::Open)?;
        self.end_pending()?;

        let iter = match self.state {
            MsgState::Reading => {
                let params_len = self.bytes()[PARAMS_LENGTH_OFFSET] as usize;
                let limit = PARAMS_OFFSET + params_len;
                if limit > self.pktlen() {
                    return self.fail(BgpError::BadParamLen);
                }
                CapsIter::Read {
                    ptr: 0,
                    param_end: 0,
                    next_param: PARAMS_OFFSET,
                    limit,
                }
            }
            MsgState::Writing => CapsIter::Write { param_start: None },
            MsgState::Idle => return self.fail(BgpError::InvalidOp),
        };
        self.iter = IterState::Caps(iter);
        Ok(())
    }

    /// Reads the next capability, skipping parameters that do not carry
    /// capabilities.
    pub fn next_cap(&mut self) -> Result<Option<Capability>, BgpError> {
        self.check_state(MsgState::Reading)?;
        let (mut ptr, mut param_end, mut next_param, limit) = match std::mem::take(&mut self.iter)
        {
            IterState::Caps(CapsIter::Read {
                ptr,
                param_end,
                next_param,
                limit,
            }) => (ptr, param_end, next_param, limit),
            other => {
                self.iter = other;
                return self.fail(BgpError::InvalidOp);
            }
        };

        loop {
            if ptr < param_end {
                // one more capability inside the current parameter
                if ptr + CAP_HEADER_SIZE > param_end {
                    return self.fail(BgpError::BadParamLen);
                }
                let b = self.bytes();
                let code = b[ptr];
                let len = b[ptr + 1] as usize;
                let data_start = ptr + CAP_HEADER_SIZE;
                if data_start + len > param_end {
                    return self.fail(BgpError::BadParamLen);
                }
                let data = Bytes::copy_from_slice(&b[data_start..data_start + len]);
                ptr = data_start + len;
                self.iter = IterState::Caps(CapsIter::Read {
                    ptr,
                    param_end,
                    next_param,
                    limit,
                });
                return Ok(Some(Capability::new(BgpCapabilityCode::from(code), data)));
            }

            if next_param >= limit {
                if next_param > limit {
                    return self.fail(BgpError::BadParamLen);
                }
                self.iter = IterState::Caps(CapsIter::Read {
                    ptr,
                    param_end,
                    next_param,
                    limit,
                });
                return Ok(None);
            }

            // examine the next optional parameter
            if next_param + PARAM_HEADER_SIZE > limit {
                return self.fail(BgpError::BadParamLen);
            }
            let b = self.bytes();
            let param_type = b[next_param];
            let param_len = b[next_param + 1] as usize;
            let value_start = next_param + PARAM_HEADER_SIZE;
            if value_start + param_len > limit {
                return self.fail(BgpError::BadParamLen);
            }
            if param_type == PARAM_CAPABILITY {
                ptr = value_start;
                param_end = value_start + param_len;
            } else {
                debug!("skipping optional parameter type {param_type}");
            }
            next_param = value_start + param_len;
        }
    }

    /// Appends one capability to the message, opening a capability
    /// parameter on the first call.
    pub fn put_cap(&mut self, cap: &Capability) -> Result<(), BgpError> {
        self.check_state(MsgState::Writing)?;
        let open_param = match &self.iter {
            IterState::Caps(CapsIter::Write { param_start }) => *param_start,
            _ => return self.fail(BgpError::InvalidOp),
        };
        let param_start = match open_param {
            Some(off) => off,
            None => {
                let off = self.pktlen();
                self.buf_mut().extend_from_slice(&[PARAM_CAPABILITY, 0]); // length patched on end
                self.iter = IterState::Caps(CapsIter::Write {
                    param_start: Some(off),
                });
                off
            }
        };

        if cap.data.len() + CAP_HEADER_SIZE > PARAM_LENGTH_MAX {
            return self.fail(BgpError::InvalidOp);
        }
        let new_value_len = self.pktlen() + CAP_HEADER_SIZE + cap.data.len()
            - (param_start + PARAM_HEADER_SIZE);
        if new_value_len > PARAM_LENGTH_MAX {
            return self.fail(BgpError::InvalidOp);
        }

        let code = u8::from(cap.code);
        let len = cap.data.len() as u8;
        let data = cap.data.clone();
        let buf = self.buf_mut();
        buf.extend_from_slice(&[code, len]);
        buf.extend_from_slice(&data);
        Ok(())
    }

    /// Ends the capability iterator; a writer patches the parameter length
    /// and the outer parameters length.
    pub fn end_caps(&mut self) -> Result<(), BgpError> {
        let iter = std::mem::take(&mut self.iter);
        match iter {
            IterState::Caps(CapsIter::Read { .. }) => self.check_ok(),
            IterState::Caps(CapsIter::Write { param_start }) => {
                self.check_ok()?;
                let end = self.pktlen();
                if let Some(off) = param_start {
                    let value_len = end - off - PARAM_HEADER_SIZE;
                    self.buf_mut()[off + 1] = value_len as u8;
                }
                let params_len = end - PARAMS_OFFSET;
                if params_len > PARAM_LENGTH_MAX {
                    return self.fail(BgpError::InvalidOp);
                }
                self.buf_mut()[PARAMS_LENGTH_OFFSET] = params_len as u8;
                Ok(())
            }
            other => {
                self.iter = other;
                self.fail(BgpError::InvalidOp)
            }
        }
    }

    /// Raw optional-parameter region and its declared length.
    pub fn params_raw(&mut self) -> Result<&[u8], BgpError> {
        self.check_type(BgpMsgType::Open)?;
        let n = self.bytes()[PARAMS_LENGTH_OFFSET] as usize;
        if PARAMS_OFFSET + n > self.pktlen() {
            return self.fail(BgpError::BadParamLen);
        }
        Ok(&self.bytes()[PARAMS_OFFSET..PARAMS_OFFSET + n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::bgp::BgpMsgFlags;
    use crate::models::bgp::{
        AddPathCapability, AddPathDirection, Asn32Capability, FqdnCapability,
        GracefulRestartCapability, MultiprotocolCapability,
    };
    use crate::models::network::{Afi, Asn, Safi};

    #[test]
    fn test_caps_write_read() {
        let mut msg = BgpMsg::new();
        msg.set_write(BgpMsgType::Open, BgpMsgFlags::empty()).unwrap();
        msg.start_caps().unwrap();
        msg.put_cap(&Capability::new(
            BgpCapabilityCode::MULTIPROTOCOL,
            MultiprotocolCapability::new(Afi::Ipv4, Safi::Unicast).encode(),
        ))
        .unwrap();
        msg.put_cap(&Capability::new(
            BgpCapabilityCode::ASN32,
            Asn32Capability::new(Asn::new(65517)).encode(),
        ))
        .unwrap();
        msg.end_caps().unwrap();
        msg.finish().unwrap();

        msg.start_caps().unwrap();
        let first = msg.next_cap().unwrap().unwrap();
        assert_eq!(first.code, BgpCapabilityCode::MULTIPROTOCOL);
        let second = msg.next_cap().unwrap().unwrap();
        assert_eq!(second.code, BgpCapabilityCode::ASN32);
        assert!(msg.next_cap().unwrap().is_none());
        msg.end_caps().unwrap();
        assert_eq!(msg.error(), None);
    }

    #[test]
    fn test_caps_skip_foreign_params() {
        // a parameter of type 1 (deprecated authentication) must be skipped
        let mut msg = BgpMsg::new();
        msg.set_write(BgpMsgType::Open, BgpMsgFlags::empty()).unwrap();
        msg.start_caps().unwrap();
        msg.put_cap(&Capability::new(
            BgpCapabilityCode::ROUTE_REFRESH,
            Bytes::new(),
        ))
        .unwrap();
        msg.end_caps().unwrap();
        msg.finish().unwrap();
        let mut raw = msg.data().unwrap().to_vec();

        // splice an auth parameter ahead of the capability one
        let insert_at = PARAMS_OFFSET;
        for (i, b) in [1u8, 2, 0xaa, 0xbb].iter().enumerate() {
            raw.insert(insert_at + i, *b);
        }
        raw[PARAMS_LENGTH_OFFSET] += 4;
        let total = raw.len() as u16;
        raw[16..18].copy_from_slice(&total.to_be_bytes());

        let mut reader = BgpMsg::new();
        reader.set_read(Bytes::from(raw), BgpMsgFlags::empty()).unwrap();
        reader.start_caps().unwrap();
        let cap = reader.next_cap().unwrap().unwrap();
        assert_eq!(cap.code, BgpCapabilityCode::ROUTE_REFRESH);
        assert!(reader.next_cap().unwrap().is_none());
    }

    #[test]
    fn test_scenario_open_round_trip() {
        // write an OPEN with the full capability set and read it back
        let mut msg = BgpMsg::new();
        msg.set_write(BgpMsgType::Open, BgpMsgFlags::empty()).unwrap();
        msg.set_bgp_open(&crate::models::bgp::BgpOpen {
            version: 4,
            my_as: 65517,
            hold_time: 180,
            identifier: "127.1.1.2".parse().unwrap(),
        })
        .unwrap();

        let caps = vec![
            Capability::new(
                BgpCapabilityCode::MULTIPROTOCOL,
                MultiprotocolCapability::new(Afi::Ipv4, Safi::Unicast).encode(),
            ),
            Capability::new(
                BgpCapabilityCode::ASN32,
                Asn32Capability::new(Asn::new(65517)).encode(),
            ),
            Capability::new(
                BgpCapabilityCode::ADD_PATH,
                AddPathCapability::new(vec![(
                    Afi::Ipv4,
                    Safi::Unicast,
                    AddPathDirection::SendReceive,
                )])
                .encode(),
            ),
            Capability::new(BgpCapabilityCode::FQDN, FqdnCapability::new("bgpd", "").encode()),
            Capability::new(
                BgpCapabilityCode::GRACEFUL_RESTART,
                GracefulRestartCapability::new(false, 120, vec![]).encode(),
            ),
        ];

        msg.start_caps().unwrap();
        for cap in &caps {
            msg.put_cap(cap).unwrap();
        }
        msg.end_caps().unwrap();
        msg.finish().unwrap();

        let open = msg.bgp_open().unwrap();
        assert_eq!(open.my_as, 65517);
        assert_eq!(open.hold_time, 180);
        assert_eq!(open.identifier.octets(), [127, 1, 1, 2]);

        msg.start_caps().unwrap();
        let mut seen = Vec::new();
        while let Some(cap) = msg.next_cap().unwrap() {
            seen.push(cap);
        }
        msg.end_caps().unwrap();
        assert_eq!(seen, caps);
    }
}
