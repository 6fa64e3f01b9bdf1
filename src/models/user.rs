use serde::{Deserialize, Serialize};
use std::fmt;

/// Who is checking in. The schedule algorithm is shared; the role only picks
/// its configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, Default)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Student,
    Expert,
    Peer,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserRole::Student => "student",
            UserRole::Expert => "expert",
            UserRole::Peer => "peer",
        };
        f.write_str(name)
    }
}
