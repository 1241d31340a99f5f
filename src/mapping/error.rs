//! Fehlerdefinitionen für das Mapping-Modul

use thiserror::Error;

/// Fehler beim Laden eines Profils. Das zuvor aktive Profil bleibt bestehen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileConfigError {
    #[error("Profile '{profile}': bindings #{first} and #{second} overlap on {input} ({layer})")]
    OverlappingBindings {
        profile: String,
        input: String,
        layer: String,
        first: usize,
        second: usize,
    },

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Unknown code '{0}'")]
    UnknownCode(String),

    #[error("Bad argument: {0}")]
    BadArgument(String),

    #[error("Unknown profile '{0}'")]
    UnknownProfile(String),
}

/// Fehler bei der Profilaktivierung über die Registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("\"{0}\"")]
    ProfileNotFound(String),

    #[error("slot {0} has no controller")]
    SlotNotFound(u8),
}
