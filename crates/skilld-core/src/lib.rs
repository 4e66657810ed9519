pub mod a2a;
pub mod config;
pub mod events;
pub mod skills;
pub mod tier;

pub use config::Config;
pub use skills::{SkillDescriptor, SkillError, SkillLocation};
pub use tier::ModelTier;
