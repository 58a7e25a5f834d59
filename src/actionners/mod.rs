//! Concrete actionner implementations (C9/C10/C4.9), grouped by the
//! backend they act against.

pub mod aws;
pub mod calico;
pub mod kubernetes;
