//! Token claims

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role encoded in the token, ordered by increasing privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Role {
    Guest,
    Student,
    Teacher,
    Admin,
    /// A value outside the known set. Never granted anything.
    Unrecognized(i32),
}

impl Role {
    pub fn code(self) -> i32 {
        match self {
            Role::Guest => -1,
            Role::Student => 0,
            Role::Teacher => 1,
            Role::Admin => 2,
            Role::Unrecognized(code) => code,
        }
    }

    /// Parse a role name or numeric code (CLI input)
    pub fn parse(s: &str) -> Option<Role> {
        match s.to_lowercase().as_str() {
            "guest" => Some(Role::Guest),
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            other => other.parse::<i32>().ok().map(Role::from),
        }
    }
}

impl From<i32> for Role {
    fn from(code: i32) -> Self {
        match code {
            -1 => Role::Guest,
            0 => Role::Student,
            1 => Role::Teacher,
            2 => Role::Admin,
            other => Role::Unrecognized(other),
        }
    }
}

impl From<Role> for i32 {
    fn from(role: Role) -> Self {
        role.code()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Guest => write!(f, "guest"),
            Role::Student => write!(f, "student"),
            Role::Teacher => write!(f, "teacher"),
            Role::Admin => write!(f, "admin"),
            Role::Unrecognized(code) => write!(f, "unrecognized({})", code),
        }
    }
}

/// Decoded, verified token payload
///
/// The issuer writes `UserId`, `ContestId` and `Role`; the snake_case names
/// are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    #[serde(rename = "UserId", alias = "subject_id")]
    pub subject_id: i32,
    #[serde(rename = "ContestId", alias = "scope_id")]
    pub scope_id: i32,
    #[serde(rename = "Role", alias = "role")]
    pub role: Role,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl ClaimSet {
    /// Claims without registered metadata
    pub fn new(subject_id: i32, scope_id: i32, role: Role) -> Self {
        Self {
            subject_id,
            scope_id,
            role,
            iss: None,
            sub: None,
            iat: None,
            nbf: None,
            exp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_codes() {
        assert_eq!(Role::from(-1), Role::Guest);
        assert_eq!(Role::from(0), Role::Student);
        assert_eq!(Role::from(1), Role::Teacher);
        assert_eq!(Role::from(2), Role::Admin);
        assert_eq!(Role::from(7), Role::Unrecognized(7));
        assert_eq!(i32::from(Role::Unrecognized(-5)), -5);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("Teacher"), Some(Role::Teacher));
        assert_eq!(Role::parse("-1"), Some(Role::Guest));
        assert_eq!(Role::parse("42"), Some(Role::Unrecognized(42)));
        assert_eq!(Role::parse("janitor"), None);
    }

    #[test]
    fn test_claims_issuer_field_names() {
        let json = r#"{"UserId":5,"ContestId":7,"Role":0,"exp":2000000000}"#;
        let claims: ClaimSet = serde_json::from_str(json).unwrap();
        assert_eq!(claims.subject_id, 5);
        assert_eq!(claims.scope_id, 7);
        assert_eq!(claims.role, Role::Student);
        assert_eq!(claims.exp, Some(2_000_000_000));
    }

    #[test]
    fn test_claims_alias_field_names() {
        let json = r#"{"subject_id":3,"scope_id":1,"role":99}"#;
        let claims: ClaimSet = serde_json::from_str(json).unwrap();
        assert_eq!(claims.role, Role::Unrecognized(99));
    }

    #[test]
    fn test_claims_missing_scope_rejected() {
        let json = r#"{"UserId":5,"Role":0}"#;
        assert!(serde_json::from_str::<ClaimSet>(json).is_err());
    }
}
