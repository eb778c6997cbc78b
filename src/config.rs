use crate::s11n::FCGI_MPXS_CONNS;

use std::collections::HashMap;

/// Settings shared by the listener and every connection it accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How many bytes each socket read asks for.
    pub read_buffer_size: usize,

    /// Connections served at once. Further connections wait in the OS accept backlog until a
    /// slot frees up.
    pub max_connections: usize,

    values: HashMap<String, String>,
}

impl Config {
    pub const DEFAULT_READ_BUFFER_SIZE: usize = 0xFFFF;
    pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

    pub fn new() -> Config {
        let mut values = HashMap::new();
        values.insert(FCGI_MPXS_CONNS.to_owned(), "1".to_owned());
        Config {
            read_buffer_size: Self::DEFAULT_READ_BUFFER_SIZE,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            values,
        }
    }

    /// Sets a variable reported to GET-VALUES queries (`FCGI_MAX_CONNS`, `FCGI_MAX_REQS`, ...).
    /// Connections copy the values when they are created, so this only affects connections
    /// accepted afterwards.
    pub fn set_value<K: Into<String>, V: ToString>(&mut self, name: K, value: V) -> &mut Config {
        self.values.insert(name.into(), value.to_string());
        self
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }

    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}
