use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use rxledger_core::{Actor, Role, UserId};

use crate::context::ActorContext;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Resolve the caller from the identity headers. There is no fallback user:
/// a missing or malformed identity is rejected before any handler runs.
pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let actor = extract_actor(req.headers())?;
    req.extensions_mut().insert(ActorContext::new(actor));
    Ok(next.run(req).await)
}

fn extract_actor(headers: &HeaderMap) -> Result<Actor, StatusCode> {
    let user_id: UserId = header(headers, ACTOR_ID_HEADER)?
        .parse()
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let role: Role = header(headers, ACTOR_ROLE_HEADER)?
        .parse()
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    Actor::user(user_id, role).map_err(|_| StatusCode::UNAUTHORIZED)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, StatusCode> {
    let value = headers
        .get(name)
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_str()
        .map_err(|_| StatusCode::UNAUTHORIZED)?
        .trim();
    if value.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(id: &str, role: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(ACTOR_ID_HEADER, HeaderValue::from_str(id).unwrap());
        h.insert(ACTOR_ROLE_HEADER, HeaderValue::from_str(role).unwrap());
        h
    }

    #[test]
    fn staff_headers_resolve_to_an_actor() {
        let id = UserId::new();
        let actor = extract_actor(&headers(&id.to_string(), "Manager")).unwrap();
        assert_eq!(actor.user_id(), id);
        assert_eq!(actor.role(), Role::Manager);
    }

    #[test]
    fn missing_or_system_identities_are_rejected() {
        assert_eq!(extract_actor(&HeaderMap::new()), Err(StatusCode::UNAUTHORIZED));
        assert_eq!(
            extract_actor(&headers(&UserId::new().to_string(), "system")),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            extract_actor(&headers("not-a-uuid", "cashier")),
            Err(StatusCode::UNAUTHORIZED)
        );
    }
}
