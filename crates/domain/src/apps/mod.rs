// Application Lifecycle Bounded Context

mod aggregate;

pub use aggregate::*;
