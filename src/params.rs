//! Route and query parameter storage.

use percent_encoding::percent_decode_str;

/// Ordered name→value map. Route parameters hold decoded values in
/// pattern order; query parameters keep source order and may repeat.
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Params {
        Params { entries: Vec::new() }
    }

    pub fn insert<N, V>(&mut self, name: N, value: V)
        where N: Into<String>, V: Into<String>
    {
        self.entries.push((name.into(), value.into()));
    }

    /// First value registered under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// All values registered under `name`, in source order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Percent-decode a captured path segment or query component. Invalid
/// sequences are passed through lossily rather than rejected.
pub fn uri_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Parse a raw query string into ordered pairs, `+` treated as space.
pub fn parse_query(query: &str) -> Params {
    let mut params = Params::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (name, value) = match pair.find('=') {
            Some(eq) => (&pair[..eq], &pair[eq + 1..]),
            None => (pair, ""),
        };
        params.insert(
            uri_decode(&name.replace('+', " ")),
            uri_decode(&value.replace('+', " ")),
        );
    }
    params
}

#[cfg(test)]
mod test {
    use super::{parse_query, uri_decode};

    #[test]
    fn decode_basics() {
        assert_eq!(uri_decode("a%20b"), "a b");
        assert_eq!(uri_decode("caf%C3%A9"), "café");
        assert_eq!(uri_decode("plain"), "plain");
    }

    #[test]
    fn query_pairs_keep_order_and_repeats() {
        let q = parse_query("a=1&b=two+words&a=3&flag");
        assert_eq!(q.get("a"), Some("1"));
        assert_eq!(q.get_all("a"), ["1", "3"]);
        assert_eq!(q.get("b"), Some("two words"));
        assert_eq!(q.get("flag"), Some(""));
        assert_eq!(q.get_or("missing", "default"), "default");
    }
}
