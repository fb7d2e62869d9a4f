//! Services layer: the session store and the collaborators it talks to.

pub mod error;
mod mock;
mod provider;
mod records;
mod session_store;
pub mod supabase;

pub use error::{AuthError, ProviderError, RecordError};
pub use mock::{MockIdentityProvider, MockIdentityRecords};
pub use provider::{
    IdentityProvider, SessionBroadcaster, SessionSignal, SessionSubscription,
    SUBSCRIPTION_CAPACITY,
};
pub use records::IdentityRecordStore;
pub use session_store::{
    AuthSnapshot, Registration, SessionConfig, SessionStore, SignInCredentials, SignUpRequest,
    DEFAULT_RESET_PATH, MIN_PASSWORD_LENGTH,
};
pub use supabase::SupabaseClient;
