use crate::config::SecretString;
use url::Url;

pub const SECRET_QUERY_PARAM: &str = "secret";

pub fn parse_public_url(input: &str) -> Option<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("://") {
        Url::parse(trimmed).ok()
    } else {
        Url::parse(&format!("https://{trimmed}")).ok()
    }
}

/// Address handed to the webhook subscription. The shared secret, when set,
/// rides along as a query parameter.
pub fn callback_url(public_url: &Url, secret: Option<&SecretString>) -> Url {
    let mut url = public_url.clone();
    if let Some(secret) = secret {
        url.query_pairs_mut()
            .append_pair(SECRET_QUERY_PARAM, secret.expose());
    }
    url
}

/// Pulls the shared secret out of a raw query string, if present.
pub fn presented_secret(raw_query: Option<&str>) -> Option<String> {
    let query = raw_query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == SECRET_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
}
