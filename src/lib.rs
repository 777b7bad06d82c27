/*!
bgpsieve is a library for reading, writing and filtering BGP-4 messages and
their MRT archive envelopes, together with an embedded bytecode filter
virtual machine that evaluates boolean predicates over those messages.

The crate has four layers:

- a streaming **BGP codec** ([`BgpMsg`]): incremental encoder/decoder for
  OPEN, UPDATE, NOTIFICATION, KEEPALIVE and ROUTE-REFRESH messages, with
  attribute-aware sub-iterators over withdrawn routes, NLRI, path
  attributes, AS paths, next hops and community families;
- an **MRT envelope codec** ([`MrtMsg`]): TABLE_DUMP, TABLE_DUMPv2 and
  BGP4MP records (extended-timestamp variants included), plus an MRT→BGP
  rebuild ([`rebuild_bgp_from_rib`]) that synthesizes a valid UPDATE from
  the reduced information of a RIB entry;
- a **Patricia trie** ([`PatriciaTrie`]) over IPv4/IPv6 prefixes with
  exact, best-match, subnet, supernet and related queries — the matching
  primitive of the filter VM;
- a **filter VM** ([`FilterVm`]) and a compiler ([`compile_filter`]) from
  an infix predicate language to its bytecode.

# Examples

Writing an UPDATE and reading it back:

```
use bgpsieve::codec::{attrs, BgpMsg, BgpMsgFlags};
use bgpsieve::models::{AsSegmentType, BgpMsgType, NetAddrAp, Origin};

let mut msg = BgpMsg::new();
msg.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
msg.start_attribs().unwrap();
msg.put_attrib(&attrs::make_origin(Origin::Igp)).unwrap();
msg.put_attrib(&attrs::make_as_path_16(&[(AsSegmentType::Sequence, &[2598, 137, 3356])])).unwrap();
msg.put_attrib(&attrs::make_next_hop("1.2.3.4".parse().unwrap())).unwrap();
msg.end_attribs().unwrap();
msg.start_nlri().unwrap();
msg.put_nlri(&NetAddrAp::from("10.0.0.0/8".parse::<bgpsieve::models::NetAddr>().unwrap())).unwrap();
msg.end_nlri().unwrap();
msg.finish().unwrap();

msg.start_nlri().unwrap();
assert_eq!(msg.next_nlri().unwrap().unwrap().addr.to_string(), "10.0.0.0/8");
```

Compiling and evaluating a filter:

```
use bgpsieve::filter::{compile_filter, FilterVm};
# use bgpsieve::codec::{BgpMsg, BgpMsgFlags};
# use bgpsieve::models::{BgpMsgType, NetAddr, NetAddrAp};
# let mut msg = BgpMsg::new();
# msg.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
# msg.start_withdrawn().unwrap();
# msg.put_withdrawn(&NetAddrAp::from("127.0.0.0/20".parse::<NetAddr>().unwrap())).unwrap();
# msg.end_withdrawn().unwrap();
# msg.finish().unwrap();

let mut vm = FilterVm::new();
compile_filter(&mut vm, "NOT packet.withdrawn EXACT 127.0.0.1/22", &[]).unwrap();
assert!(vm.filter_bgp(&mut msg).unwrap());
```
*/

pub mod codec;
pub mod error;
pub mod filter;
pub mod models;
pub mod trie;

pub use codec::{rebuild_bgp_from_rib, BgpMsg, BgpMsgFlags, MrtMsg};
pub use error::{BgpError, FilterError, MrtError, VmError};
pub use filter::{compile_filter, FilterVm};
pub use trie::PatriciaTrie;
