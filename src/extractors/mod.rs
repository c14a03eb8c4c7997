pub mod user;

pub use user::{header_auth, user_from_headers, AuthUser, USER_ID_HEADER, USER_ROLES_HEADER};
