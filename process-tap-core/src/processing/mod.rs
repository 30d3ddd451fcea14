pub mod mix_buffer;
pub mod signal;
