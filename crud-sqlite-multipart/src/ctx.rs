use axum::{
    extract::{Extension, FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde::Serialize;

use crate::{
    db::DB,
    users::{self, UserId, UserRole},
    Error, Result,
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
    pub role: UserRole,
}

/// Caller identity as asserted by the authenticating proxy in front of the
/// service. Values are trusted verbatim.
#[derive(Clone, Debug, Default)]
pub struct Ctx {
    pub user: Option<User>,
}

impl Ctx {
    pub fn new(user: Option<User>) -> Self {
        Self { user }
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let Some(id) = header(USER_ID_HEADER) else {
            return Ok(Self::default());
        };

        let role = header(USER_ROLE_HEADER)
            .map(str::parse::<UserRole>)
            .transpose()?
            .unwrap_or_default();

        Ok(Self::new(Some(User {
            id: id.to_owned(),
            email: header(USER_EMAIL_HEADER).map(str::to_owned),
            role,
        })))
    }

    pub fn require_user(&self) -> Result<&User> {
        self.user.as_ref().ok_or(Error::Unauthorized)
    }
}

impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        if let Some(ctx) = parts.extensions.get::<Ctx>() {
            return Ok(ctx.clone());
        }
        Ctx::from_headers(&parts.headers)
    }
}

/// Resolves the caller once per request and keeps the users table in step
/// with the identities seen.
pub async fn with_ctx(Extension(db): Extension<DB>, ctx: Ctx, mut request: Request, next: Next) -> Result<Response> {
    if let Some(user) = &ctx.user {
        users::register(&db, user).await?;
    }

    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

pub async fn protected(ctx: Ctx, request: Request, next: Next) -> Result<Response> {
    ctx.require_user()?;
    Ok(next.run(request).await)
}

pub async fn admin_only(ctx: Ctx, request: Request, next: Next) -> Result<Response> {
    if ctx.require_user()?.role != UserRole::Admin {
        return Err(Error::Forbidden);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(values: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in values {
            headers.insert(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn anonymous_without_user_header() {
        let ctx = Ctx::from_headers(&headers(&[(USER_EMAIL_HEADER, "a@mail.com")])).unwrap();
        assert!(ctx.user.is_none());
        assert!(matches!(ctx.require_user(), Err(Error::Unauthorized)));

        let ctx = Ctx::from_headers(&headers(&[(USER_ID_HEADER, "  ")])).unwrap();
        assert!(ctx.user.is_none());
    }

    #[test]
    fn reads_identity_headers() {
        let ctx = Ctx::from_headers(&headers(&[
            (USER_ID_HEADER, "user1"),
            (USER_EMAIL_HEADER, "a@mail.com"),
            (USER_ROLE_HEADER, "admin"),
        ]))
        .unwrap();

        let user = ctx.require_user().unwrap();
        assert_eq!(user.id, "user1");
        assert_eq!(user.email.as_deref(), Some("a@mail.com"));
        assert_eq!(user.role, UserRole::Admin);
    }

    #[test]
    fn role_defaults_to_member() {
        let ctx = Ctx::from_headers(&headers(&[(USER_ID_HEADER, "user1")])).unwrap();
        assert_eq!(ctx.require_user().unwrap().role, UserRole::Member);

        assert!(Ctx::from_headers(&headers(&[(USER_ID_HEADER, "user1"), (USER_ROLE_HEADER, "root")])).is_err());
    }
}
