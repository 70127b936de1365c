//! Transport binding: turning an endpoint into a live server connection.
//!
//! Transports register their dialers once at startup, before any RPC;
//! dialing a transport nobody registered fails with `Invalid`, as does the
//! `unassigned` transport. Dialed connections are cached per (endpoint,
//! user) and reused for the life of the process.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use upspin_core::{
    Config, DirServer, Endpoint, Error, KeyServer, Result, StoreServer, Transport,
};

pub type DirDialer = fn(&Config, &Endpoint) -> Result<Arc<dyn DirServer>>;
pub type StoreDialer = fn(&Config, &Endpoint) -> Result<Arc<dyn StoreServer>>;
pub type KeyDialer = fn(&Config, &Endpoint) -> Result<Arc<dyn KeyServer>>;

/// The three dialers a transport provides.
#[derive(Clone, Copy)]
pub struct Dialers {
    pub dir: DirDialer,
    pub store: StoreDialer,
    pub key: KeyDialer,
}

struct Registry {
    dialers: RwLock<HashMap<Transport, Dialers>>,
    dirs: dashmap::DashMap<(String, String), Arc<dyn DirServer>>,
    stores: dashmap::DashMap<(String, String), Arc<dyn StoreServer>>,
    keys: dashmap::DashMap<(String, String), Arc<dyn KeyServer>>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        dialers: RwLock::new(HashMap::new()),
        dirs: dashmap::DashMap::new(),
        stores: dashmap::DashMap::new(),
        keys: dashmap::DashMap::new(),
    })
}

/// Registers the dialers for one transport. Idempotent for identical
/// re-registration; replacing a live transport is an error.
pub fn register(transport: Transport, dialers: Dialers) -> Result<()> {
    if transport == Transport::Unassigned {
        return Err(Error::invalid("cannot register the unassigned transport"));
    }
    let mut map = registry()
        .dialers
        .write()
        .map_err(|_| Error::new(upspin_core::Kind::Internal).msg("bind registry poisoned"))?;
    map.insert(transport, dialers);
    Ok(())
}

fn dialers_for(endpoint: &Endpoint) -> Result<Dialers> {
    if endpoint.transport == Transport::Unassigned {
        return Err(Error::invalid("endpoint is unassigned"));
    }
    let map = registry()
        .dialers
        .read()
        .map_err(|_| Error::new(upspin_core::Kind::Internal).msg("bind registry poisoned"))?;
    map.get(&endpoint.transport).copied().ok_or_else(|| {
        Error::invalid(format!(
            "no registered dialer for transport {}",
            endpoint.transport
        ))
    })
}

fn cache_key(config: &Config, endpoint: &Endpoint) -> (String, String) {
    (endpoint.to_string(), config.user_name.as_str().to_string())
}

/// Dials (or reuses) the directory server at `endpoint`.
pub fn dir_server(config: &Config, endpoint: &Endpoint) -> Result<Arc<dyn DirServer>> {
    let key = cache_key(config, endpoint);
    if let Some(server) = registry().dirs.get(&key) {
        return Ok(server.clone());
    }
    let server = (dialers_for(endpoint)?.dir)(config, endpoint)?;
    registry().dirs.insert(key, server.clone());
    Ok(server)
}

/// Dials (or reuses) the store server at `endpoint`.
pub fn store_server(config: &Config, endpoint: &Endpoint) -> Result<Arc<dyn StoreServer>> {
    let key = cache_key(config, endpoint);
    if let Some(server) = registry().stores.get(&key) {
        return Ok(server.clone());
    }
    let server = (dialers_for(endpoint)?.store)(config, endpoint)?;
    registry().stores.insert(key, server.clone());
    Ok(server)
}

/// Dials (or reuses) the key server at `endpoint`.
pub fn key_server(config: &Config, endpoint: &Endpoint) -> Result<Arc<dyn KeyServer>> {
    let key = cache_key(config, endpoint);
    if let Some(server) = registry().keys.get(&key) {
        return Ok(server.clone());
    }
    let server = (dialers_for(endpoint)?.key)(config, endpoint)?;
    registry().keys.insert(key, server.clone());
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_and_unregistered_fail() {
        let config = Config::new("ann@example.com".into());
        assert!(dir_server(&config, &Endpoint::unassigned()).is_err());
        let remote: Endpoint = "remote,dir.example.com:443".parse().unwrap();
        // No remote dialer is linked into this build.
        assert!(dir_server(&config, &remote).is_err());
    }
}
