use crate::ecs::{CompIdx, NetId};
use thiserror::Error;

/// Errors that can occur while building the component registry.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("type '{type_name}' is already registered as '{existing}'")]
    DuplicateType {
        type_name: &'static str,
        existing: String,
    },

    #[error("component name '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("network id {net_id} already belongs to '{existing}' (requested by '{requested}')")]
    DuplicateNetId {
        net_id: NetId,
        existing: String,
        requested: String,
    },

    #[error("component '{name}' references unknown index {reference}")]
    UnknownReference { name: String, reference: CompIdx },

    #[error("component '{name}' references '{reference}', which is a concrete type, not a reference tag")]
    NotATag { name: String, reference: String },

    #[error("registry is full ({limit} indices)")]
    Full { limit: usize },
}
