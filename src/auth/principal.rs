use std::fmt;

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use sqlx::FromRow;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// The two disjoint identity namespaces. Everything that differs between
/// students and teachers hangs off this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Student,
    Teacher,
}

impl PrincipalKind {
    pub const ALL: [PrincipalKind; 2] = [PrincipalKind::Student, PrincipalKind::Teacher];

    /// URL segment and token `role` value.
    pub fn as_str(self) -> &'static str {
        match self {
            PrincipalKind::Student => "student",
            PrincipalKind::Teacher => "teacher",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            PrincipalKind::Student => "students",
            PrincipalKind::Teacher => "teachers",
        }
    }

    /// Column name in the table and field name on the wire.
    pub fn id_field(self) -> &'static str {
        match self {
            PrincipalKind::Student => "roll_no",
            PrincipalKind::Teacher => "emp_id",
        }
    }

    pub fn duplicate_message(self) -> &'static str {
        match self {
            PrincipalKind::Student => "Student already exists",
            PrincipalKind::Teacher => "Teacher already exists",
        }
    }

    pub fn login_required_message(self) -> &'static str {
        match self {
            PrincipalKind::Student => "Roll number and password are required",
            PrincipalKind::Teacher => "Employee ID and password are required",
        }
    }

    pub fn invalid_credentials_message(self) -> &'static str {
        match self {
            PrincipalKind::Student => "Invalid roll number or password",
            PrincipalKind::Teacher => "Invalid employee ID or password",
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row in `students` / `teachers`. The identifier column is aliased to
/// `identifier` in every query so one struct serves both tables.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Principal {
    pub identifier: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}

/// Fields needed to create a principal; `created_at` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub identifier: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

/// What the client gets back after registration. Never carries the hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicPrincipal {
    pub kind: PrincipalKind,
    pub identifier: String,
    pub name: String,
    pub email: String,
    pub created_at: OffsetDateTime,
}

impl PublicPrincipal {
    pub fn from_principal(kind: PrincipalKind, principal: Principal) -> Self {
        Self {
            kind,
            identifier: principal.identifier,
            name: principal.name,
            email: principal.email,
            created_at: principal.created_at,
        }
    }
}

impl Serialize for PublicPrincipal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let created_at = self
            .created_at
            .format(&Rfc3339)
            .map_err(<S::Error as serde::ser::Error>::custom)?;
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry(self.kind.id_field(), &self.identifier)?;
        map.serialize_entry("name", &self.name)?;
        map.serialize_entry("email", &self.email)?;
        map.serialize_entry("created_at", &created_at)?;
        map.end()
    }
}
