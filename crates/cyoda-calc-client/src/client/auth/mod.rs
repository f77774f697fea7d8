pub mod channel;
pub mod credentials;

pub use channel::{AuthLayer, AuthService, AuthenticatedChannel, ChannelFactory};
pub use credentials::{BearerTokens, CredentialError, CredentialProvider, TokenSource};
