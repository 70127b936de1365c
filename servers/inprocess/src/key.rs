//! The in-memory key server: user records and their public keys.
//!
//! The first put for an unknown user is accepted without authentication;
//! the signup handshake lives outside this build. Every later update must
//! be signed with the key the server currently holds, which is what lets a
//! rotating user authenticate with the old key.

use async_trait::async_trait;
use dashmap::DashMap;

use upspin_core::{
    Endpoint, Error, Kind, KeyServer, Result, Signature, UserName, UserRecord,
};
use upspin_factotum::PublicKey;

#[derive(Debug)]
pub struct InprocessKey {
    endpoint: Endpoint,
    users: DashMap<String, UserRecord>,
}

impl InprocessKey {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        InprocessKey {
            endpoint,
            users: DashMap::new(),
        }
    }
}

#[async_trait]
impl KeyServer for InprocessKey {
    async fn lookup(&self, user: &UserName) -> Result<UserRecord> {
        match self.users.get(user.as_str()) {
            Some(record) => Ok(record.clone()),
            None => Err(Error::new(Kind::NotExist)
                .op("key.Lookup")
                .msg(format!("no such user {user}"))),
        }
    }

    async fn put(&self, record: &UserRecord, sig: &Signature) -> Result<()> {
        if let Some(existing) = self.users.get(record.name.as_str()) {
            let held = PublicKey::parse(&existing.public_key)
                .map_err(|e| e.op("key.Put").msg("stored key is unparseable"))?;
            held.verify(&record.canonical_bytes(), sig).map_err(|_| {
                Error::new(Kind::Permission)
                    .op("key.Put")
                    .msg(format!("record for {} not signed by held key", record.name))
            })?;
        }
        self.users
            .insert(record.name.as_str().to_string(), record.clone());
        Ok(())
    }

    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upspin_factotum::{Curve, Factotum, keygen};

    fn factotum(seed: u8) -> Factotum {
        let g = keygen::from_seed(Curve::P256, &[seed; 16]).unwrap();
        Factotum::from_keys(g.pair.public().text(), &g.pair.secret_decimal()).unwrap()
    }

    fn record(f: &Factotum) -> UserRecord {
        UserRecord {
            name: "ann@example.com".into(),
            public_key: f.public_key().text().to_string(),
            dirs: vec![Endpoint::inprocess("t")],
            stores: vec![Endpoint::inprocess("t")],
        }
    }

    #[tokio::test]
    async fn bootstrap_then_authenticated_updates() {
        let server = InprocessKey::new(Endpoint::inprocess("t"));
        let old = factotum(1);
        let new = factotum(2);

        // Bootstrap put needs no valid signature.
        let first = record(&old);
        server
            .put(&first, &Signature { r: vec![], s: vec![] })
            .await
            .unwrap();
        assert_eq!(
            server.lookup(&"ann@example.com".into()).await.unwrap(),
            first
        );

        // Rotation: the new record must be signed by the held (old) key.
        let mut rotated = record(&new);
        rotated.public_key = new.public_key().text().to_string();
        let bad_sig = new.sign(&rotated.canonical_bytes()).unwrap();
        assert!(server.put(&rotated, &bad_sig).await.is_err());

        let good_sig = old.sign(&rotated.canonical_bytes()).unwrap();
        server.put(&rotated, &good_sig).await.unwrap();
        let held = server.lookup(&"ann@example.com".into()).await.unwrap();
        assert_eq!(held.public_key, new.public_key().text());
    }
}
