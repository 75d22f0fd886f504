//! Authentication and authorization
//!
//! Clients present an HMAC-signed JWT minted by the contest service. The
//! token's claims fix the contest (scope) the connection may watch and the
//! role that decides which solution updates inside that contest are visible:
//! - `Student`: only their own solutions
//! - `Teacher`, `Admin`: every solution in the contest
//! - `Guest` and unknown roles: nothing

mod claims;
mod policy;
mod tokens;

pub use claims::{ClaimSet, Role};
pub use policy::permits;
pub use tokens::{issue, verify, AuthError, VerificationSecret};
