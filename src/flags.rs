use std::fmt::Display;

bitflags::bitflags! {
    /// Context flags as requested by an initiator and granted by the mechanism.
    ///
    /// Bit values are the ones from RFC 2744, so the raw bits can be handed to a GSSAPI library unchanged.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ContextFlags: u32 {
        const DELEGATE = 1;
        const MUTUAL = 2;
        const REPLAY = 4;
        const SEQUENCE = 8;
        const CONFIDENTIAL = 16;
        const INTEGRITY = 32;
        const ANONYMOUS = 64;
        const PROTECTION_READY = 128;
        const TRANSFER = 256;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextFlag {
    /// Delegated credentials are available
    Delegate,
    /// The peers authenticated each other
    Mutual,
    /// Replayed protected messages will be detected
    Replay,
    /// Out of sequence protected messages will be detected
    Sequence,
    /// Messages can be sealed
    Confidential,
    /// Messages can be signed
    Integrity,
    /// The initiator did not authenticate
    Anonymous,
    /// Protection services are usable before the context is complete
    Protection,
    /// The context may be exported to another process
    Transfer,
}
impl ContextFlag {
    pub const ALL: [ContextFlag; 9] = [
        Self::Delegate,
        Self::Mutual,
        Self::Replay,
        Self::Sequence,
        Self::Confidential,
        Self::Integrity,
        Self::Anonymous,
        Self::Protection,
        Self::Transfer,
    ];
    pub fn bits(self) -> ContextFlags {
        match self {
            Self::Delegate => ContextFlags::DELEGATE,
            Self::Mutual => ContextFlags::MUTUAL,
            Self::Replay => ContextFlags::REPLAY,
            Self::Sequence => ContextFlags::SEQUENCE,
            Self::Confidential => ContextFlags::CONFIDENTIAL,
            Self::Integrity => ContextFlags::INTEGRITY,
            Self::Anonymous => ContextFlags::ANONYMOUS,
            Self::Protection => ContextFlags::PROTECTION_READY,
            Self::Transfer => ContextFlags::TRANSFER,
        }
    }
    pub fn from_bits(bits: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|flag| flag.bits().bits() == bits)
    }
    pub fn name(self) -> &'static str {
        match self {
            Self::Delegate => "delegate",
            Self::Mutual => "mutual",
            Self::Replay => "replay",
            Self::Sequence => "sequence",
            Self::Confidential => "confidential",
            Self::Integrity => "integrity",
            Self::Anonymous => "anonymous",
            Self::Protection => "protection",
            Self::Transfer => "transfer",
        }
    }
}
impl Display for ContextFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
impl From<ContextFlag> for ContextFlags {
    fn from(value: ContextFlag) -> Self {
        value.bits()
    }
}

/// Label of a single flag value, `"unknown"` for anything that is not exactly one defined flag
pub fn flag_name(bits: u32) -> &'static str {
    ContextFlag::from_bits(bits).map_or("unknown", ContextFlag::name)
}

/// Splits a flag set into its defined flags, highest bit first
pub fn export_flags(flags: ContextFlags) -> Vec<ContextFlag> {
    ContextFlag::ALL
        .into_iter()
        .rev()
        .filter(|flag| flags.contains(flag.bits()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_flag_has_a_name() {
        for flag in ContextFlag::ALL {
            assert_ne!(flag_name(flag.bits().bits()), "unknown");
            assert_eq!(flag_name(flag.bits().bits()), flag.name());
        }
    }

    #[test]
    fn undefined_values_are_unknown() {
        assert_eq!(flag_name(0), "unknown");
        assert_eq!(flag_name(512), "unknown");
        assert_eq!(flag_name(2 | 4), "unknown");
        assert_eq!(flag_name(u32::MAX), "unknown");
    }

    #[test]
    fn export_contains_exactly_the_set_bits() {
        let subset = [ContextFlag::Mutual, ContextFlag::Confidential, ContextFlag::Transfer];
        let bits = subset.iter().fold(ContextFlags::empty(), |acc, f| acc | f.bits());
        let mut exported = export_flags(bits);
        exported.sort_by_key(|f| f.bits().bits());
        assert_eq!(exported, subset);
    }

    #[test]
    fn export_order_is_reverse_enumeration() {
        let exported = export_flags(ContextFlags::all());
        let mut expected = ContextFlag::ALL.to_vec();
        expected.reverse();
        assert_eq!(exported, expected);
    }

    #[test]
    fn unknown_bits_are_ignored() {
        let exported = export_flags(ContextFlags::from_bits_retain(0x1000 | 2));
        assert_eq!(exported, [ContextFlag::Mutual]);
        assert!(export_flags(ContextFlags::empty()).is_empty());
    }
}
