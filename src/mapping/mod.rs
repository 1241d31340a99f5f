//! Modul für die Umwandlung von Controller-Zuständen in virtuelle Eingaben.
//!
//! Profile ordnen physischen Quellen Aktionen zu. Die Engine wertet pro Tick
//! den Zustand eines Slots gegen dessen aktives Profil aus, der Manager
//! betreibt die Pipeline für alle Slots.

pub mod action;
pub mod autoswitch;
pub mod engine;
pub mod error;
pub mod macros;
pub mod manager;
pub mod parser;
pub mod profile;
pub mod region;
pub mod registry;

// Re-exports für einfacheren Zugriff
pub use action::{Action, ActionSpec, MacroStep};
pub use autoswitch::{AutoswitchRuleConfig, Autoswitcher};
pub use engine::MappingEngine;
pub use error::{ProfileConfigError, RegistryError};
pub use manager::{MappingEngineManager, PipelineCommand, PipelineSettings, TestTarget};
pub use profile::{BindingConfig, InputSource, Profile, ProfileConfig, ResponseCurve, DEFAULT_PROFILE};
pub use registry::ProfileRegistry;
