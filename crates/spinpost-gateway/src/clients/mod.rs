pub mod driver;
pub mod entitlement;
