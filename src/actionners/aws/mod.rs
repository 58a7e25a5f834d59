pub mod lambda;

pub use lambda::LambdaActionner;
