pub mod local;
#[cfg(test)]
pub mod memory;
pub mod remote;
