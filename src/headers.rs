//! Header storage and single-value parsing utilities.
//!
//! Values are kept in insertion order per name and names are compared
//! case-insensitively. Multi-valued headers are preserved as ordered
//! lists.

/// Content codings recognized in `Accept-Encoding`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EncodingKind {
    Unsupported,
    Gzip,
    Deflate,
    Star,
}

/// One parsed element of an `Accept-Encoding` header.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptEncoding {
    pub kind: EncodingKind,
    pub weight: f32,
}

/// One parsed element of an `Accept-Language` header.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptLanguage {
    pub tag: String,
    pub weight: f32,
}

/// Ordered, case-insensitive multimap of header names to values.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, Vec<String>)>,
}

impl HeaderMap {
    pub fn new() -> HeaderMap {
        HeaderMap { entries: Vec::new() }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// First value registered under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entry(name)
            .and_then(|(_, vals)| vals.first())
            .map(|s| s.as_str())
    }

    /// View over the first value, for attribute/flag parsing.
    pub fn header<'a>(&'a self, name: &'a str) -> Option<Header<'a>> {
        self.get(name).map(|value| Header { name, value })
    }

    /// All values registered under `name`, in insertion order.
    pub fn list(&self, name: &str) -> &[String] {
        self.entry(name).map(|(_, vals)| &vals[..]).unwrap_or(&[])
    }

    /// Replace any existing values of `name` with `value`.
    pub fn set<N, V>(&mut self, name: N, value: V) -> &mut HeaderMap
        where N: Into<String>, V: Into<String>
    {
        let name = name.into();
        let value = value.into();
        match self.entry_mut(&name) {
            Some((_, vals)) => {
                vals.clear();
                vals.push(value);
            }
            None => self.entries.push((name, vec![value])),
        }
        self
    }

    /// Append `value` without touching existing values of `name`.
    pub fn add<N, V>(&mut self, name: N, value: V) -> &mut HeaderMap
        where N: Into<String>, V: Into<String>
    {
        let name = name.into();
        let value = value.into();
        match self.entry_mut(&name) {
            Some((_, vals)) => vals.push(value),
            None => self.entries.push((name, vec![value])),
        }
        self
    }

    pub fn remove(&mut self, name: &str) -> &mut HeaderMap {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self
    }

    /// Case-insensitive comparison against the first value.
    pub fn value_is(&self, name: &str, value: &str) -> bool {
        self.get(name)
            .map(|v| v.eq_ignore_ascii_case(value))
            .unwrap_or(false)
    }

    /// Iterate `(name, value)` pairs in insertion order, multi-valued
    /// names expanded.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(name, vals)| {
            vals.iter().map(move |v| (name.as_str(), v.as_str()))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, vals)| vals.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, name: &str) -> Option<&(String, Vec<String>)> {
        self.entries.iter().find(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut (String, Vec<String>)> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

/// A borrowed view over one header value.
#[derive(Debug, Copy, Clone)]
pub struct Header<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> Header<'a> {
    pub fn new(name: &'a str, value: &'a str) -> Header<'a> {
        Header { name, value }
    }

    pub fn value_is(&self, value: &str) -> bool {
        self.value.eq_ignore_ascii_case(value)
    }

    /// Value of a `key=value` attribute inside the header value.
    ///
    /// Given `"a; k1=v1; k2=v2"`, `attr("k1", ...)` returns `"v1"`.
    /// Whitespace around keys and values is trimmed; both separators
    /// are configurable (`;` and `=` by default).
    pub fn attr(&self, key: &str, default: &str) -> String {
        self.attr_sep(key, default, ';', '=')
    }

    pub fn attr_sep(&self, key: &str, default: &str,
                    attr_sep: char, val_sep: char)
        -> String
    {
        for part in self.value.split(attr_sep) {
            match part.find(val_sep) {
                Some(eq) => {
                    if part[..eq].trim().eq_ignore_ascii_case(key) {
                        return part[eq + 1..].trim().to_string();
                    }
                }
                None => {
                    if part.trim().eq_ignore_ascii_case(key) {
                        return default.to_string();
                    }
                }
            }
        }
        default.to_string()
    }

    /// Whether a bare token is present among the attributes.
    pub fn flag(&self, name: &str) -> bool {
        self.value
            .split(|c| c == ';' || c == ',' || c == '=')
            .any(|part| part.trim().eq_ignore_ascii_case(name))
    }

    /// Parse as `Accept-Encoding`, sorted by weight descending.
    ///
    /// Elements without an explicit `q=` get an implicit weight of
    /// `100 - index`, so the stable sort preserves source order among
    /// unweighted entries.
    pub fn accept_encodings(&self) -> Vec<AcceptEncoding> {
        let mut encs: Vec<AcceptEncoding> = split_weighted(self.value)
            .into_iter()
            .map(|(name, weight)| AcceptEncoding {
                kind: match name.as_str() {
                    "gzip" => EncodingKind::Gzip,
                    "deflate" => EncodingKind::Deflate,
                    "*" => EncodingKind::Star,
                    _ => EncodingKind::Unsupported,
                },
                weight,
            })
            .collect();
        encs.sort_by(|a, b| {
            b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal)
        });
        encs
    }

    /// Parse as `Accept-Language`, sorted by weight descending. Tags
    /// are preserved as given.
    pub fn accept_languages(&self) -> Vec<AcceptLanguage> {
        let mut langs: Vec<AcceptLanguage> = split_weighted(self.value)
            .into_iter()
            .map(|(tag, weight)| AcceptLanguage { tag, weight })
            .collect();
        langs.sort_by(|a, b| {
            b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal)
        });
        langs
    }
}

/// Split a `,`-separated list with optional `;q=<float>` weights.
fn split_weighted(value: &str) -> Vec<(String, f32)> {
    let mut out = Vec::new();
    for (idx, ele) in value.split(',').enumerate() {
        let ele = ele.trim();
        if ele.is_empty() {
            continue;
        }
        let implicit = 100.0 - idx as f32;
        match ele.find(';') {
            None => out.push((ele.to_string(), implicit)),
            Some(semi) => {
                let name = ele[..semi].trim().to_string();
                let params = &ele[semi + 1..];
                let q = params
                    .find('=')
                    .and_then(|eq| params[eq + 1..].trim().parse::<f32>().ok())
                    .unwrap_or(implicit);
                out.push((name, q));
            }
        }
    }
    out
}
