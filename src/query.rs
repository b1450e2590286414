//! Minimal query-string parsing for the request handlers.

/// Iterates over the `key=value` pairs of a query string.
///
/// Pairs are separated by `&` or `;`. A segment without `=` yields the
/// whole segment as key with an empty value.
pub struct QueryIter<'a> {
    rest: &'a str,
}

impl<'a> QueryIter<'a> {
    /// Constructs an iterator over the given query string.
    pub fn new(query: &'a str) -> QueryIter<'a> {
        QueryIter { rest: query }
    }
}

impl<'a> Iterator for QueryIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.rest.is_empty() {
            let segment = match self.rest.find(|c| c == '&' || c == ';') {
                Some(i) => {
                    let segment = &self.rest[..i];
                    self.rest = &self.rest[i + 1..];
                    segment
                }
                None => {
                    let segment = self.rest;
                    self.rest = "";
                    segment
                }
            };
            if segment.is_empty() {
                continue;
            }
            return Some(match segment.find('=') {
                Some(i) => (&segment[..i], &segment[i + 1..]),
                None => (segment, ""),
            });
        }

        None
    }
}

/// Returns the value of the given attribute, if present.
pub fn find<'a>(query: &'a str, attr: &str) -> Option<&'a str> {
    QueryIter::new(query)
        .find(|(key, _)| *key == attr)
        .map(|(_, value)| value)
}
