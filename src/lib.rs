pub mod memsys;
pub mod sim;
pub mod timeq;
