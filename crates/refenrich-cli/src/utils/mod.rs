//! CLI-side helper modules that wrap `refenrich-core` for interactive use.

pub mod logging;
