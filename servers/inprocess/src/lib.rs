//! In-memory servers for the `inprocess` transport.
//!
//! Dialing `inprocess,<ns>` for the directory, store, and key services
//! reaches one shared world named `<ns>` inside this process: the
//! directory server reads Access and Group blocks from its sibling store,
//! and every session against the same netaddr sees the same state. Worlds
//! are created on first dial and live for the life of the process.
//!
//! The dial functions match the client's transport-dialer signatures;
//! callers register them with the bind layer at startup.

mod dir;
mod key;
mod store;

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use upspin_core::{
    Config, DirServer, Endpoint, Error, KeyServer, Result, StoreServer, Transport,
};

pub use dir::InprocessDir;
pub use key::InprocessKey;
pub use store::InprocessStore;

struct World {
    dir: Arc<dir::DirInner>,
    store: Arc<InprocessStore>,
    key: Arc<InprocessKey>,
}

fn worlds() -> &'static DashMap<String, Arc<World>> {
    static WORLDS: OnceLock<DashMap<String, Arc<World>>> = OnceLock::new();
    WORLDS.get_or_init(DashMap::new)
}

fn world(net_addr: &str) -> Arc<World> {
    worlds()
        .entry(net_addr.to_string())
        .or_insert_with(|| {
            let endpoint = Endpoint::inprocess(net_addr);
            let store = Arc::new(InprocessStore::new(endpoint.clone()));
            Arc::new(World {
                dir: Arc::new(dir::DirInner::new(endpoint.clone(), store.clone())),
                store,
                key: Arc::new(InprocessKey::new(endpoint)),
            })
        })
        .clone()
}

fn check_transport(endpoint: &Endpoint) -> Result<()> {
    if endpoint.transport != Transport::InProcess {
        return Err(Error::invalid(format!(
            "inprocess dialer handed endpoint {endpoint}"
        )));
    }
    Ok(())
}

/// Dials the directory service of a world as the config's user.
pub fn dial_dir(config: &Config, endpoint: &Endpoint) -> Result<Arc<dyn DirServer>> {
    check_transport(endpoint)?;
    let world = world(&endpoint.net_addr);
    Ok(Arc::new(InprocessDir::new(
        world.dir.clone(),
        config.user_name.clone(),
    )))
}

/// Dials the store service of a world.
pub fn dial_store(_config: &Config, endpoint: &Endpoint) -> Result<Arc<dyn StoreServer>> {
    check_transport(endpoint)?;
    Ok(world(&endpoint.net_addr).store.clone())
}

/// Dials the key service of a world.
pub fn dial_key(_config: &Config, endpoint: &Endpoint) -> Result<Arc<dyn KeyServer>> {
    check_transport(endpoint)?;
    Ok(world(&endpoint.net_addr).key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worlds_are_shared_by_netaddr() {
        let config = Config::new("ann@example.com".into());
        let a = dial_store(&config, &Endpoint::inprocess("w1")).unwrap();
        let b = dial_store(&config, &Endpoint::inprocess("w1")).unwrap();
        let c = dial_store(&config, &Endpoint::inprocess("w2")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn wrong_transport_rejected() {
        let config = Config::new("ann@example.com".into());
        assert!(dial_dir(&config, &Endpoint::unassigned()).is_err());
    }
}
