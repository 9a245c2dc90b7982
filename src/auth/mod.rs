mod claims;
pub mod jwt;

pub use jwt::AuthUser;
#[cfg(test)]
pub use claims::TokenKind;
