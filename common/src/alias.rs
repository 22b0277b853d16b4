use url::form_urlencoded;

pub const ALIAS_TEMPERATURE: &str = "temperature";
pub const ALIAS_HUMIDITY: &str = "humidity";
pub const ALIAS_UPTIME: &str = "uptime";
pub const ALIAS_STATE: &str = "state";

/// Ordered `key=value` pairs exchanged with the alias endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasValues {
    pairs: Vec<(String, String)>,
}

impl AliasValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets `key`, replacing an earlier value for the same key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.pairs.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.pairs {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    /// Decodes a response body. Segments without `=` become keys with an
    /// empty value, empty segments are skipped.
    pub fn parse(body: &str) -> Self {
        let mut values = Self::new();
        for (key, value) in form_urlencoded::parse(body.trim().as_bytes()) {
            if key.is_empty() {
                continue;
            }
            values.insert(key.into_owned(), value.into_owned());
        }
        values
    }
}

/// Query string naming the aliases to read, e.g. `state&uptime`.
pub fn read_query(targets: &[&str]) -> String {
    targets
        .iter()
        .map(|target| form_urlencoded::byte_serialize(target.as_bytes()).collect::<String>())
        .collect::<Vec<_>>()
        .join("&")
}
