pub mod capability;
pub mod identity;
pub mod session;

pub use capability::{has_required_role, rank_of, AssignedCapability, CapabilityLevel};
pub use identity::{Identity, IdentityPatch, ProfileUpdate};
pub use session::{
    ProviderUser, Session, SessionChange, SessionEvent, SignUpMetadata, SignUpOutcome,
};
