//! Session cookie handling and the login requirement

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::Redirect;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::debug;

use crate::authn::session::SESSION_COOKIE;
use crate::server::state::ServerState;

/// Name of the one-shot flash message cookie
pub const FLASH_COOKIE: &str = "deployer_flash";

/// The logged-in operator. Extracting it from a request without a valid
/// session redirects to the login page.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub username: String,
}

impl FromRequestParts<Arc<ServerState>> for CurrentUser {
    type Rejection = Redirect;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServerState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let claims = jar
            .get(SESSION_COOKIE)
            .and_then(|cookie| state.session_keys.verify(cookie.value()));

        match claims {
            Some(claims) => Ok(CurrentUser {
                username: claims.username().to_string(),
            }),
            None => {
                debug!("No valid session for {}, redirecting to login", parts.uri.path());
                Err(Redirect::to("/login"))
            }
        }
    }
}

/// One-shot messages shown on the next page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flash {
    LoginOk,
    LoginFailed,
    LoggedOut,
}

impl Flash {
    pub fn code(&self) -> &'static str {
        match self {
            Flash::LoginOk => "login_ok",
            Flash::LoginFailed => "login_failed",
            Flash::LoggedOut => "logged_out",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "login_ok" => Some(Flash::LoginOk),
            "login_failed" => Some(Flash::LoginFailed),
            "logged_out" => Some(Flash::LoggedOut),
            _ => None,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Flash::LoginOk => "Logged in successfully.",
            Flash::LoginFailed => "Invalid username or password.",
            Flash::LoggedOut => "You have been logged out.",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Flash::LoginFailed)
    }
}

/// Attach the session cookie
pub fn with_session(jar: CookieJar, token: String, secure: bool) -> CookieJar {
    jar.add(
        Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(secure),
    )
}

/// Drop the session cookie
pub fn without_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

/// Queue a flash message for the next page
pub fn with_flash(jar: CookieJar, flash: Flash, secure: bool) -> CookieJar {
    jar.add(
        Cookie::build((FLASH_COOKIE, flash.code()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(secure),
    )
}

/// Pop the pending flash message, if any
pub fn take_flash(jar: CookieJar) -> (CookieJar, Option<Flash>) {
    let flash = jar
        .get(FLASH_COOKIE)
        .and_then(|cookie| Flash::from_code(cookie.value()));

    match flash {
        Some(_) => (jar.remove(Cookie::build(FLASH_COOKIE).path("/")), flash),
        None => (jar, None),
    }
}
