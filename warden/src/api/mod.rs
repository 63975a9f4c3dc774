pub mod basic_auth;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod router;

#[cfg(test)]
pub mod test_utils;
