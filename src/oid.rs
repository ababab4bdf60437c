use std::{borrow::Cow, fmt::Display};

/// An object identifier, held in its DER content encoding (the form GSSAPI passes around)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Oid(Cow<'static, [u8]>);
impl Oid {
    pub const fn from_static(der: &'static [u8]) -> Self {
        Self(Cow::Borrowed(der))
    }
    pub fn from_der(der: &[u8]) -> Self {
        Self(Cow::Owned(der.to_vec()))
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
    /// Decodes the arcs, `None` on a truncated or overflowing encoding
    pub fn arcs(&self) -> Option<Vec<u64>> {
        let (&first, rest) = self.0.split_first()?;
        let mut arcs = vec![u64::from(first / 40), u64::from(first % 40)];
        let mut acc: u64 = 0;
        let mut pending = false;
        for &byte in rest {
            acc = acc.checked_mul(128)?.checked_add(u64::from(byte & 0x7f))?;
            pending = byte & 0x80 != 0;
            if !pending {
                arcs.push(acc);
                acc = 0;
            }
        }
        (!pending).then_some(arcs)
    }
}
impl Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(arcs) = self.arcs() else {
            return write!(f, "<malformed oid>");
        };
        for (i, arc) in arcs.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
        }
        Ok(())
    }
}
impl AsRef<[u8]> for Oid {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// 1.2.840.113554.1.2.1.1
pub const NT_USER_NAME: Oid = Oid::from_static(&[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x01, 0x01]);
/// 1.2.840.113554.1.2.1.2
pub const NT_MACHINE_UID_NAME: Oid = Oid::from_static(&[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x01, 0x02]);
/// 1.2.840.113554.1.2.1.3
pub const NT_STRING_UID_NAME: Oid = Oid::from_static(&[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x01, 0x03]);
/// 1.2.840.113554.1.2.1.4
pub const NT_HOSTBASED_SERVICE: Oid = Oid::from_static(&[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x01, 0x04]);
/// 1.3.6.1.5.6.3
pub const NT_ANONYMOUS: Oid = Oid::from_static(&[0x2b, 0x06, 0x01, 0x05, 0x06, 0x03]);
/// 1.3.6.1.5.6.4
pub const NT_EXPORT_NAME: Oid = Oid::from_static(&[0x2b, 0x06, 0x01, 0x05, 0x06, 0x04]);
/// 1.2.840.113554.1.2.2
pub const MECH_KRB5: Oid = Oid::from_static(&[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_dotted_form() {
        assert_eq!(MECH_KRB5.to_string(), "1.2.840.113554.1.2.2");
        assert_eq!(NT_HOSTBASED_SERVICE.to_string(), "1.2.840.113554.1.2.1.4");
        assert_eq!(NT_EXPORT_NAME.to_string(), "1.3.6.1.5.6.4");
    }

    #[test]
    fn truncated_encoding_is_malformed() {
        let oid = Oid::from_der(&[0x2a, 0x86]);
        assert_eq!(oid.arcs(), None);
        assert_eq!(oid.to_string(), "<malformed oid>");
        assert_eq!(Oid::from_der(&[]).arcs(), None);
    }

    #[test]
    fn owned_and_static_compare_equal() {
        assert_eq!(Oid::from_der(NT_USER_NAME.as_bytes()), NT_USER_NAME);
    }
}
