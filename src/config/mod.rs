// Configuration module
// Public interface for configuration loading

pub mod constants;
pub mod loader;
pub mod ownership;
pub mod settings;

pub use loader::load_settings;
pub use ownership::{Ownership, OwnershipRule, OwnershipTable};
pub use settings::{
    BridgeSettings, MemorySettings, RouterSettings, SandboxSettings, ScriptSettings, Settings,
};
