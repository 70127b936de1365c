//! Shared setup for client integration tests: one inprocess world per
//! test, users with deterministic keys, registered records, and ready
//! clients.

use upspin_client::{Client, bind};
use upspin_core::{Config, Endpoint, Signature, Transport, UserName, UserRecord};
use upspin_factotum::{Curve, Factotum, keygen};

pub fn factotum_for_seed(seed: u8) -> Factotum {
    let g = keygen::from_seed(Curve::P256, &[seed; 16]).unwrap();
    Factotum::from_keys(g.pair.public().text(), &g.pair.secret_decimal()).unwrap()
}

pub fn register_transport() {
    bind::register(
        Transport::InProcess,
        bind::Dialers {
            dir: upspin_inprocess::dial_dir,
            store: upspin_inprocess::dial_store,
            key: upspin_inprocess::dial_key,
        },
    )
    .unwrap();
}

pub fn config_for(user: &str, world: &str) -> Config {
    let mut config = Config::new(UserName::from(user));
    let endpoint = Endpoint::inprocess(world);
    config.key_endpoint = endpoint.clone();
    config.store_endpoint = endpoint.clone();
    config.dir_endpoint = endpoint;
    config
}

/// Creates a user in `world`: deterministic keys from `seed`, a key
/// server record, and a client. The root is not created.
pub async fn new_user(user: &str, world: &str, seed: u8) -> Client {
    register_transport();
    let factotum = factotum_for_seed(seed);
    let config = config_for(user, world);
    let client = Client::new(config.clone(), factotum.clone());

    let record = UserRecord {
        name: UserName::from(user),
        public_key: factotum.public_key().text().to_string(),
        dirs: vec![config.dir_endpoint.clone()],
        stores: vec![config.store_endpoint.clone()],
    };
    // Bootstrap registration; the signup flow lives outside this build.
    client
        .key_server()
        .unwrap()
        .put(&record, &Signature { r: vec![], s: vec![] })
        .await
        .unwrap();
    client
}
