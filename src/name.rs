use crate::{
    error::StatusCodes,
    mech::Mechanism,
    oid::{self, Oid},
};

/// The kind of a textual identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NameType {
    NoName,
    NoOid,
    Anonymous,
    ExportName,
    /// `service@host`, or just `service` for the local host
    HostBasedService,
    MachineUid,
    StringUid,
    UserName,
}
impl NameType {
    /// The name type tag, `None` leaves the interpretation to the mechanism
    pub fn oid(self) -> Option<Oid> {
        match self {
            Self::NoName | Self::NoOid => None,
            Self::Anonymous => Some(oid::NT_ANONYMOUS),
            Self::ExportName => Some(oid::NT_EXPORT_NAME),
            Self::HostBasedService => Some(oid::NT_HOSTBASED_SERVICE),
            Self::MachineUid => Some(oid::NT_MACHINE_UID_NAME),
            Self::StringUid => Some(oid::NT_STRING_UID_NAME),
            Self::UserName => Some(oid::NT_USER_NAME),
        }
    }
    pub fn from_oid(oid: Option<&Oid>) -> Option<Self> {
        let Some(oid) = oid else {
            return Some(Self::NoOid);
        };
        [
            Self::Anonymous,
            Self::ExportName,
            Self::HostBasedService,
            Self::MachineUid,
            Self::StringUid,
            Self::UserName,
        ]
        .into_iter()
        .find(|t| t.oid().as_ref() == Some(oid))
    }
}

/// Turns a textual identity into a mechanism name. A name the mechanism half-built is gone by the time this returns.
pub fn import_name<M: Mechanism + ?Sized>(mech: &M, name: &str, name_type: NameType) -> Result<M::Name, StatusCodes> {
    let oid = name_type.oid();
    mech.import_name(name.as_bytes(), oid.as_ref())
}

pub fn export_name<M: Mechanism + ?Sized>(mech: &M, name: &M::Name) -> Result<String, StatusCodes> {
    mech.display_name(name)
}

pub fn export_oid<M: Mechanism + ?Sized>(mech: &M, oid: &Oid) -> Result<String, StatusCodes> {
    mech.oid_to_string(oid)
}
