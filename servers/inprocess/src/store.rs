//! The in-memory block store. Content-addressed: a block's reference is
//! the BLAKE3 hex of its bytes, though clients treat it as opaque text.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use upspin_core::{
    Endpoint, Error, Fetched, Kind, Reference, Result, StoreServer,
};

#[derive(Debug)]
pub struct InprocessStore {
    endpoint: Endpoint,
    blocks: DashMap<String, Bytes>,
}

impl InprocessStore {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        InprocessStore {
            endpoint,
            blocks: DashMap::new(),
        }
    }

    /// Direct fetch for sibling servers (the directory server reading
    /// Access and Group file blocks).
    pub(crate) fn get_local(&self, reference: &Reference) -> Option<Bytes> {
        self.blocks.get(reference.as_str()).map(|b| b.clone())
    }
}

#[async_trait]
impl StoreServer for InprocessStore {
    async fn get(&self, reference: &Reference) -> Result<Fetched> {
        match self.blocks.get(reference.as_str()) {
            Some(bytes) => Ok(Fetched::Bytes(bytes.clone())),
            None => Err(Error::new(Kind::NotExist)
                .op("Get")
                .msg(format!("no such block {reference}"))),
        }
    }

    async fn put(&self, ciphertext: Bytes) -> Result<Reference> {
        let reference = blake3::hash(&ciphertext).to_hex().to_string();
        self.blocks.insert(reference.clone(), ciphertext);
        Ok(Reference::from(reference))
    }

    async fn delete(&self, reference: &Reference) -> Result<()> {
        match self.blocks.remove(reference.as_str()) {
            Some(_) => Ok(()),
            None => Err(Error::new(Kind::NotExist)
                .op("Delete")
                .msg(format!("no such block {reference}"))),
        }
    }

    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let store = InprocessStore::new(Endpoint::inprocess("t"));
        let r = store.put(Bytes::from_static(b"block")).await.unwrap();
        match store.get(&r).await.unwrap() {
            Fetched::Bytes(b) => assert_eq!(b.as_ref(), b"block"),
            other => panic!("unexpected {other:?}"),
        }
        // Content addressing: identical content, identical reference.
        let r2 = store.put(Bytes::from_static(b"block")).await.unwrap();
        assert_eq!(r, r2);
        store.delete(&r).await.unwrap();
        assert!(store.get(&r).await.is_err());
    }
}
