// Streamops Platform - Domain Layer
// Modelo de dominio: aplicaciones, máquina de estados y puertos

pub mod apps;
pub mod cluster;
pub mod event_bus;
pub mod events;
pub mod shared_kernel;

pub use apps::*;
pub use cluster::*;
pub use event_bus::*;
pub use events::*;
pub use shared_kernel::*;
