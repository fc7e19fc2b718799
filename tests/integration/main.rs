mod account_store;
mod inspect_store;
#[cfg(feature = "integration-tests")]
mod pebble_issuance;
mod test_utils;
