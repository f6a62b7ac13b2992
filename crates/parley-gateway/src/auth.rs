use jsonwebtoken::{DecodingKey, Validation, decode};

use parley_types::api::Claims;

/// Verify a bearer token's signature and expiry and resolve the caller's
/// identity. This is the whole connection gate: it runs before the WebSocket
/// upgrade completes and has no side effects — registration happens later in
/// the connection handler.
pub fn verify_token(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    fn token_for(user_id: Uuid, exp: i64, secret: &str) -> String {
        let claims = Claims {
            sub: user_id,
            username: "alice".into(),
            exp: exp as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_resolves_identity() {
        let user_id = Uuid::new_v4();
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
        let token = token_for(user_id, exp, "secret");

        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn wrong_secret_and_expired_tokens_are_rejected() {
        let user_id = Uuid::new_v4();
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
        let token = token_for(user_id, exp, "secret");
        assert!(verify_token(&token, "other-secret").is_none());

        let stale = (chrono::Utc::now() - chrono::Duration::hours(1)).timestamp();
        let token = token_for(user_id, stale, "secret");
        assert!(verify_token(&token, "secret").is_none());

        assert!(verify_token("not-a-jwt", "secret").is_none());
    }
}
