pub mod buffers;
pub mod callbacks;
pub mod guard;
pub mod simulated;
