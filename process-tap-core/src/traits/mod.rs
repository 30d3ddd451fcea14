pub mod backend;
pub mod dsp;
pub mod process_enumerator;
pub mod session_resolver;
