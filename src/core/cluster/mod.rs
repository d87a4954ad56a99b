// src/core/cluster/mod.rs

//! Cluster awareness: hash-slot computation, the slot → node mapping,
//! topology discovery, and key-based routing.

pub mod router;
pub mod slot;
pub mod slot_map;
pub mod topology;

pub use router::{ClusterRouter, Route, RoutedNode, StandaloneRouter, router_for};
pub use slot::{NUM_SLOTS, hash_slot};
pub use slot_map::{NodeId, SlotMap, SlotRange};
pub use topology::{ClusterTopology, DiscoveredTopology, NodeHandle, NodeRole, discover};
