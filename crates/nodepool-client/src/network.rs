/// A ledger network and its bootstrap addresses.
///
/// `static_nodes` are `host:port` addresses added to the registry when a
/// pool is built. `static_hostnames` are queried for hint records during
/// discovery.
///
/// # Example
///
/// ```rust
/// use nodepool_client::Network;
///
/// let network = Network::new("devnet")
///     .with_static_nodes(["10.0.0.1:2130", "10.0.0.2:2130"])
///     .with_static_hostnames(["nodes.devnet.example"]);
/// assert_eq!(network.static_nodes.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub static_nodes: Vec<String>,
    pub static_hostnames: Vec<String>,
}

impl Network {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Production network. Ships without bootstrap addresses; supply seeds.
    pub fn livenet() -> Self {
        Self::new("livenet")
    }

    /// Test network. Ships without bootstrap addresses; supply seeds.
    pub fn testnet() -> Self {
        Self::new("testnet")
    }

    pub fn with_static_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_nodes.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn with_static_hostnames<I, S>(mut self, hostnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_hostnames
            .extend(hostnames.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(Network::livenet().name, "livenet");
        assert_eq!(Network::testnet().name, "testnet");
        assert!(Network::testnet().static_nodes.is_empty());
    }

    #[test]
    fn test_builder_appends() {
        let network = Network::new("x")
            .with_static_nodes(vec!["a:1"])
            .with_static_nodes(vec!["b:2".to_string()])
            .with_static_hostnames(["h"]);
        assert_eq!(network.static_nodes, vec!["a:1", "b:2"]);
        assert_eq!(network.static_hostnames, vec!["h"]);
    }
}
