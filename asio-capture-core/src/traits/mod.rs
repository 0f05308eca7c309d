pub mod audio_sink;
pub mod device_delegate;
pub mod driver;
