pub mod setups;
pub mod steps;
pub mod world;

pub use world::InvoiceWorld;
