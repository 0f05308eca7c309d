pub mod buffered_sink;
pub mod host;
pub mod registry;
