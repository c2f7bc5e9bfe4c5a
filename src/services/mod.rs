#[cfg(not(target_arch = "wasm32"))]
pub mod console;
pub mod failover;
pub mod gemini;
pub mod mention;
pub mod pipeline;
pub mod studio;
