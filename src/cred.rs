use std::fmt::Display;

/// What acquired credentials may be used for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CredentialUsage {
    /// Only initiate security contexts
    Initiate,
    /// Only accept security contexts
    #[default]
    Accept,
    /// Initiate and accept security contexts
    Both,
}
impl CredentialUsage {
    /// The `gss_cred_usage_t` value
    pub fn to_c(self) -> i32 {
        match self {
            Self::Both => 0,
            Self::Initiate => 1,
            Self::Accept => 2,
        }
    }
    pub fn can_initiate(self) -> bool {
        matches!(self, Self::Initiate | Self::Both)
    }
    pub fn can_accept(self) -> bool {
        matches!(self, Self::Accept | Self::Both)
    }
}
impl Display for CredentialUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiate => write!(f, "initiate"),
            Self::Accept => write!(f, "accept"),
            Self::Both => write!(f, "both"),
        }
    }
}
