pub mod aws;

pub use aws::InstanceMetadataProvider;
