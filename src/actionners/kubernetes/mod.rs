pub mod checks;
pub mod client;
pub mod drain;

pub use drain::DrainActionner;
