//! Streaming codecs over raw message bytes.

pub mod attrs;
pub mod bgp;
pub mod mrt;

pub use bgp::{Attr, BgpMsg, BgpMsgFlags, CommunityItem, FinishMode};
pub use mrt::{
    clear_peer_index_table, current_peer_index_table, rebuild_bgp_from_rib, MrtMsg, PeerEntry,
    PeerIndexTable, RibAfiEntries, RibEntry, TableDumpEntry,
};
