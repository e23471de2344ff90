use crate::backend::Backend;
use crate::config::Config;
use crate::errors::RelayError;
use std::sync::Arc;

/// The configured backends, in priority order. Never reordered after startup.
#[derive(Debug, Clone)]
pub struct Upstreams {
    backends: Arc<[Arc<Backend>]>,
}

impl Upstreams {
    pub fn try_new(config: &Config) -> Result<Self, RelayError> {
        config.validate()?;

        let connect_timeout = config.connect_timeout();
        let write_timeout = config.write_timeout();
        let backends = config
            .servers
            .iter()
            .enumerate()
            .map(|(rank, address)| {
                Arc::new(Backend::new(
                    address.clone(),
                    rank,
                    connect_timeout,
                    write_timeout,
                ))
            })
            .collect();

        Ok(Upstreams { backends })
    }

    pub fn get(&self, rank: usize) -> Option<&Arc<Backend>> {
        self.backends.get(rank)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.backends.iter()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Lowest-ranked backend currently holding a connection.
    pub fn first_connected(&self) -> Option<usize> {
        self.iter().find(|b| b.is_connected()).map(|b| b.rank())
    }

    pub async fn disconnect_all(&self) {
        for backend in self.iter() {
            backend.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_upstreams() {
        let config = Config {
            servers: vec!["10.0.0.1:8125".into(), "10.0.0.2:8125".into()],
            ..Default::default()
        };
        let upstreams = Upstreams::try_new(&config).expect("valid upstreams");
        assert_eq!(upstreams.len(), 2);
        assert_eq!(upstreams.get(0).unwrap().address(), "10.0.0.1:8125");
        assert_eq!(upstreams.get(1).unwrap().rank(), 1);
        assert!(upstreams.get(2).is_none());

        let invalid = Config {
            servers: vec![],
            ..Default::default()
        };
        assert!(Upstreams::try_new(&invalid).is_err());
    }

    #[tokio::test]
    async fn first_connected_prefers_lowest_rank() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap().to_string();
        let config = Config {
            servers: vec!["127.0.0.1:1".into(), live],
            ..Default::default()
        };
        let upstreams = Upstreams::try_new(&config).unwrap();
        assert_eq!(upstreams.first_connected(), None);

        upstreams.get(1).unwrap().connect().await.unwrap();
        assert_eq!(upstreams.first_connected(), Some(1));

        upstreams.disconnect_all().await;
        assert_eq!(upstreams.first_connected(), None);
    }
}
