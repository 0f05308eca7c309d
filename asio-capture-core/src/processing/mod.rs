pub mod negotiation;
pub mod ring_buffer;
pub mod sample_format;
