pub mod install;
pub mod state;
