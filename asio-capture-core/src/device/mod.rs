pub mod binding;
pub mod device;
pub mod messages;
pub(crate) mod reset;
pub(crate) mod stream;
