mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::StewardConfig;
// ReplayConfig is used by tests in commands/replay.rs
#[allow(unused_imports)]
pub use types::ReplayConfig;
