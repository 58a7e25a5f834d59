pub mod netpol;

pub use netpol::NetworkPolicyActionner;
