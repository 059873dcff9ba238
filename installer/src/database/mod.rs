pub mod connection;
pub mod provisioning;
pub mod schema;

#[cfg(test)]
pub(crate) mod testing;
