//! URL query string splitting with pluggable collectors.

use crate::http::types::Params;
use memchr::memchr;

/// Query string splitter.
///
/// Splits on `&`, then on the first `=` of each pair. There is **no
/// percent-decoding**: values are handed out exactly as they appeared on the
/// request line.
///
/// # Examples
/// ```rust
/// use hipshot::query::Query;
///
/// let pairs: Vec<(&str, &str)> = Query::parse("name=john&age=25&city");
/// assert_eq!(pairs, [("name", "john"), ("age", "25"), ("city", "")]);
/// ```
/// All possible formats:
/// ```rust
/// use hipshot::query::Query;
///
/// let pairs: Vec<(&str, &str)> = Query::parse("?debug&name=&=Qwe&key=a=b&&");
/// assert_eq!(
///     pairs,
///     [("debug", ""), ("name", ""), ("", "Qwe"), ("key", "a=b")]
/// );
/// ```
pub struct Query;

impl Query {
    /// Parses a query string into a new collection. A leading `?` is skipped.
    #[inline(always)]
    pub fn parse<'a, C: QueryCollector<'a>>(query: &'a str) -> C {
        let mut result = C::default();
        Self::parse_into(&mut result, query);
        result
    }

    /// Parses a query string, appending to an existing collection.
    ///
    /// A pair without `=` gets an empty value; empty pairs (`&&`) are skipped.
    pub fn parse_into<'a, C: QueryCollector<'a>>(result: &mut C, query: &'a str) {
        let data = query.strip_prefix('?').unwrap_or(query);
        let bytes = data.as_bytes();

        let mut start = 0;
        while start < bytes.len() {
            let end = memchr(b'&', &bytes[start..])
                .map(|pos| start + pos)
                .unwrap_or(bytes.len());

            if start < end {
                // '&' and '=' are ASCII, so every split lands on a char boundary
                let pair = &data[start..end];
                let (key, value) = match memchr(b'=', pair.as_bytes()) {
                    Some(eq) => (&pair[..eq], &pair[eq + 1..]),
                    None => (pair, ""),
                };

                result.add_param(key, value);
            }

            start = end + 1;
        }
    }
}

/// A collection that receives parsed query pairs.
///
/// # Examples
/// ```rust
/// use hipshot::query::{Query, QueryCollector};
///
/// #[derive(Default)]
/// struct Keys(Vec<String>);
///
/// impl<'a> QueryCollector<'a> for Keys {
///     fn add_param(&mut self, key: &'a str, _: &'a str) {
///         self.0.push(key.to_owned());
///     }
/// }
///
/// let keys: Keys = Query::parse("a=1&b=2");
/// assert_eq!(keys.0, ["a", "b"]);
/// ```
pub trait QueryCollector<'a>
where
    Self: Default,
{
    fn add_param(&mut self, key: &'a str, value: &'a str);
}

// Borrowed pairs in arrival order
impl<'a> QueryCollector<'a> for Vec<(&'a str, &'a str)> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: &'a str) {
        self.push((key, value));
    }
}

// Owned multimap, repeated keys append
impl<'a> QueryCollector<'a> for Params {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: &'a str) {
        self.append(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic() {
        let cases = ["a=1&b=2", "?a=1&b=2"];

        for line in cases {
            let params: Vec<(&str, &str)> = Query::parse(line);
            assert_eq!(params, [("a", "1"), ("b", "2")]);
        }
    }

    #[test]
    fn full() {
        let params: Vec<(&str, &str)> = Query::parse("flag&empty=&=val&&key=value&");

        assert_eq!(
            params,
            [("flag", ""), ("empty", ""), ("", "val"), ("key", "value")]
        );
    }

    #[test]
    fn empty() {
        for line in ["", "?", "&", "&&&"] {
            let params: Vec<(&str, &str)> = Query::parse(line);
            assert!(params.is_empty(), "{line:?}");
        }
    }

    #[test]
    fn into_params() {
        let mut params = Params::query();
        Query::parse_into(&mut params, "a=1&b=2&a=3");
        Query::parse_into(&mut params, "c=привет");

        assert_eq!(params.get_all("a"), ["1", "3"]);
        assert_eq!(params.get("b"), Some("2"));
        assert_eq!(params.get("c"), Some("привет"));
    }
}
