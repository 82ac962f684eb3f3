use axum::http::{header, HeaderMap, HeaderValue};

use crate::auth::jwt::JwtKeys;
use crate::auth::services::SessionTokens;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Same-site, http-only, secure cookies mirroring the JSON token pair.
pub fn session_cookies(keys: &JwtKeys, tokens: &SessionTokens) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.append(
        header::SET_COOKIE,
        cookie(ACCESS_COOKIE, &tokens.access_token, keys.access_ttl.as_secs()),
    );
    headers.append(
        header::SET_COOKIE,
        cookie(
            REFRESH_COOKIE,
            &tokens.refresh_token,
            keys.refresh_ttl.as_secs(),
        ),
    );
    headers
}

pub fn clear_session_cookies() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.append(header::SET_COOKIE, cookie(ACCESS_COOKIE, "", 0));
    headers.append(header::SET_COOKIE, cookie(REFRESH_COOKIE, "", 0));
    headers
}

fn cookie(name: &str, value: &str, max_age_secs: u64) -> HeaderValue {
    // JWTs are base64url, always a valid header value.
    format!("{name}={value}; Max-Age={max_age_secs}; Path=/; HttpOnly; Secure; SameSite=Strict")
        .parse()
        .expect("cookie value is ASCII")
}

/// Pull the refresh token out of the Cookie header, if present.
pub fn refresh_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';')
        .map(str::trim)
        .find_map(|pair| {
            pair.strip_prefix(REFRESH_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use axum::extract::FromRef;

    #[tokio::test]
    async fn session_cookies_set_both_tokens_with_attributes() {
        let keys = JwtKeys::from_ref(&AppState::fake());
        let tokens = SessionTokens {
            access_token: "acc.jwt.value".into(),
            refresh_token: "ref.jwt.value".into(),
        };
        let headers = session_cookies(&keys, &tokens);
        let values: Vec<&str> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values[0].starts_with("access_token=acc.jwt.value;"));
        assert!(values[1].starts_with("refresh_token=ref.jwt.value;"));
        for v in values {
            assert!(v.contains("HttpOnly"));
            assert!(v.contains("Secure"));
            assert!(v.contains("SameSite=Strict"));
            assert!(v.contains("Path=/"));
        }
    }

    #[test]
    fn clear_session_cookies_expire_immediately() {
        let headers = clear_session_cookies();
        for v in headers.get_all(header::SET_COOKIE).iter() {
            assert!(v.to_str().unwrap().contains("Max-Age=0"));
        }
    }

    #[test]
    fn refresh_token_is_read_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "access_token=abc; refresh_token=the-token; theme=dark"
                .parse()
                .unwrap(),
        );
        assert_eq!(
            refresh_token_from_headers(&headers),
            Some("the-token".to_string())
        );
    }

    #[test]
    fn missing_or_empty_refresh_cookie_yields_none() {
        assert_eq!(refresh_token_from_headers(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "refresh_token=".parse().unwrap());
        assert_eq!(refresh_token_from_headers(&headers), None);
    }
}
