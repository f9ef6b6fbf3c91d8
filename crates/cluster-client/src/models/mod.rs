//! Typed documents for every object the controller creates or reads.
//!
//! Desired objects are plain structs. They only become untyped JSON in
//! [`crate::client`], at the point they are sent to the API server.

pub mod cni;
pub mod meta;
pub mod nmstate;
pub mod snapshot;
pub mod storage;
pub mod virtualmachine;

pub use cni::*;
pub use meta::*;
pub use nmstate::{NodeInterfaceIpv4, NodeNetworkPolicy, PolicyOwner};
pub use snapshot::*;
pub use storage::*;
pub use virtualmachine::{InstanceInterface, InstanceObservation, VirtualMachine, VirtualMachineObservation};
