//! JSON API for throne.
//!
//! Serves matches with the prediction visibility rule applied per viewer,
//! prediction submission, match administration, users, teams and stages.
//! Sessions are the `Login` and `Password` (digest) cookies.

mod error;
mod routes;

pub use error::WebError;
pub use routes::{
    ApiStatus, AppState, LOGIN_COOKIE, PASSWORD_COOKIE, SESSION_MAX_AGE_SECS, create_router,
};
