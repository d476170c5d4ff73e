//! Operator authentication

pub mod ldap;
pub mod session;
