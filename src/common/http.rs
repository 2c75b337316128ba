//! Helpers shared by the REST clients.

use std::time::Duration;

use url::Url;

use crate::common::error::{PlatformError, PlatformResult};

/// Build the reqwest client used for platform API calls.
pub fn build_http_client() -> PlatformResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    Ok(client)
}

/// Append path segments to a base URL.
///
/// Each segment is percent-encoded on its own, so ids containing `/`, `:`
/// or `!` stay a single path component.
pub fn endpoint<'a>(base: &Url, segments: impl IntoIterator<Item = &'a str>) -> PlatformResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| PlatformError::decode(format!("'{}' cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
