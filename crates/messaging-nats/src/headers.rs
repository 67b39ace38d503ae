use async_nats::HeaderMap;
use relay_messaging::Headers;

/// Converts message headers to the NATS representation.
pub fn to_nats(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();

    for (name, value) in headers {
        map.insert(name.as_str(), value.as_str());
    }

    map
}

/// Converts NATS headers back, keeping the first value of repeated headers.
pub fn from_nats(map: Option<&HeaderMap>) -> Option<Headers> {
    let map = map?;

    let headers: Headers = map
        .iter()
        .filter_map(|(name, values)| {
            values
                .first()
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect();

    if headers.is_empty() {
        None
    } else {
        Some(headers)
    }
}
