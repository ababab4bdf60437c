use std::time::Duration;

use crate::{flags::ContextFlags, oid::Oid};

/// What an initiator asks for when negotiating
#[derive(Clone, Debug)]
pub struct InitSettings {
    pub flags: ContextFlags,
    /// `None` asks for the mechanism's default lifetime
    pub lifetime: Option<Duration>,
    /// `None` lets the library choose
    pub mech: Option<Oid>,
}
impl InitSettings {
    /// Replaces the requested flags
    #[must_use]
    pub fn flags(self, flags: ContextFlags) -> Self {
        Self { flags, ..self }
    }
    #[must_use]
    pub fn request(self, flags: impl Into<ContextFlags>) -> Self {
        Self {
            flags: self.flags | flags.into(),
            ..self
        }
    }
    #[must_use]
    pub fn lifetime(self, lifetime: Duration) -> Self {
        Self {
            lifetime: Some(lifetime),
            ..self
        }
    }
    /// Negotiates this mechanism instead of the library default
    #[must_use]
    pub fn mech(self, mech: Oid) -> Self {
        Self {
            mech: Some(mech),
            ..self
        }
    }
}
impl Default for InitSettings {
    fn default() -> Self {
        Self {
            flags: ContextFlags::MUTUAL | ContextFlags::REPLAY,
            lifetime: None,
            mech: None,
        }
    }
}
impl From<ContextFlags> for InitSettings {
    fn from(flags: ContextFlags) -> Self {
        Self::default().flags(flags)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TransportSettings {
    pub max_token_len: usize,
}
impl TransportSettings {
    #[must_use]
    pub fn max_token_len(self, max_token_len: usize) -> Self {
        Self { max_token_len }
    }
}
impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_token_len: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::ContextFlag;

    #[test]
    fn default_requests_mutual_and_replay() {
        let settings = InitSettings::default();
        assert_eq!(settings.flags, ContextFlags::MUTUAL | ContextFlags::REPLAY);
        assert!(settings.lifetime.is_none() && settings.mech.is_none());
    }

    #[test]
    fn request_adds_to_defaults() {
        let settings = InitSettings::default()
            .request(ContextFlag::Confidential)
            .lifetime(Duration::from_secs(60));
        assert!(settings.flags.contains(ContextFlags::CONFIDENTIAL | ContextFlags::MUTUAL));
        assert_eq!(settings.lifetime, Some(Duration::from_secs(60)));
        assert_eq!(InitSettings::from(ContextFlags::empty()).flags, ContextFlags::empty());
    }
}
