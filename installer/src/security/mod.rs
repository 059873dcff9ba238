pub mod crypto;
pub mod master_key;
