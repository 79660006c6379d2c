use {
    crate::error::Error,
    rand::seq::SliceRandom,
    tracing::{info, trace},
};

///
/// One connected etcd client per configured host.
///
/// Every top-level operation calls [`EndpointPool::pick`] once and sticks to that client,
/// there is no affinity between operations and no retry across hosts.
///
#[derive(Clone)]
pub struct EndpointPool {
    endpoints: Vec<(String, etcd_client::Client)>,
}

impl EndpointPool {
    ///
    /// Connects to every host, failing on the first host that cannot be reached.
    ///
    pub async fn connect<I, S>(
        hosts: I,
        options: Option<etcd_client::ConnectOptions>,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut endpoints = vec![];
        for host in hosts {
            let host = host.as_ref().to_string();
            let client = etcd_client::Client::connect([host.as_str()], options.clone())
                .await
                .map_err(|source| Error::Connect {
                    host: host.clone(),
                    source,
                })?;
            info!("connected to etcd endpoint {host}");
            endpoints.push((host, client));
        }
        Self::from_clients(endpoints)
    }

    ///
    /// Builds a pool out of already connected clients.
    ///
    pub fn from_clients(endpoints: Vec<(String, etcd_client::Client)>) -> Result<Self, Error> {
        if endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }
        Ok(Self { endpoints })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|(host, _)| host.as_str())
    }

    ///
    /// Picks one endpoint uniformly at random.
    ///
    pub fn pick(&self) -> etcd_client::Client {
        let (host, client) = self
            .endpoints
            .choose(&mut rand::thread_rng())
            .unwrap_or_else(|| &self.endpoints[0]);
        trace!("picked etcd endpoint {host}");
        client.clone()
    }
}
