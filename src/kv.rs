use {
    crate::{
        endpoint::EndpointPool,
        error::{Error, RemoteCall},
    },
    etcd_client::DeleteOptions,
    serde::{de::DeserializeOwned, Serialize},
    tracing::trace,
};

///
/// Decodes a value coming from etcd. Invalid sequences are replaced rather than rejected.
///
pub(crate) fn decode_value(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

///
/// Single-key put, get and delete with string values.
///
#[derive(Clone)]
pub struct KvClient {
    endpoints: EndpointPool,
}

impl KvClient {
    pub fn new(endpoints: EndpointPool) -> Self {
        Self { endpoints }
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<(), Error> {
        trace!("put {key}");
        self.endpoints
            .pick()
            .put(key, value, None)
            .await
            .map_err(Error::remote(RemoteCall::Put))?;
        Ok(())
    }

    ///
    /// Returns the value stored under `key`, or `None` if there is none.
    ///
    pub async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.get_raw(key).await?.as_deref().map(decode_value))
    }

    ///
    /// Deletes `key` and returns the value it held. Deleting a missing key is not an error.
    ///
    pub async fn delete(&self, key: &str) -> Result<Option<String>, Error> {
        trace!("delete {key}");
        let resp = self
            .endpoints
            .pick()
            .delete(key, Some(DeleteOptions::new().with_prev_key()))
            .await
            .map_err(Error::remote(RemoteCall::DeleteRange))?;
        Ok(resp.prev_kvs().first().map(|kv| decode_value(kv.value())))
    }

    pub async fn put_json<T>(&self, key: &str, value: &T) -> Result<(), Error>
    where
        T: Serialize,
    {
        let value = serde_json::to_string(value)?;
        self.put(key, &value).await
    }

    pub async fn get_json<T>(&self, key: &str) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        self.get_raw(key)
            .await?
            .map(|raw| serde_json::from_slice(&raw))
            .transpose()
            .map_err(Error::from)
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        trace!("range {key}");
        let resp = self
            .endpoints
            .pick()
            .get(key, None)
            .await
            .map_err(Error::remote(RemoteCall::Range))?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }
}
