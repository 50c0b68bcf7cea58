#![allow(dead_code)]

use std::time::Duration;

use argus::probes::{MonitoredModel, ProviderAccount};
use argus::provider::{MockProviderClient, MockResponse, ProviderCredentials};

pub fn account(name: &str, provider: &str) -> ProviderAccount {
    ProviderAccount::new(name, ProviderCredentials::new(provider).with_api_key("sk-test"))
}

/// One model per name, all offered by `account`.
pub fn models(account: &ProviderAccount, names: &[&str]) -> Vec<MonitoredModel> {
    names.iter().map(|name| MonitoredModel::new(account, *name)).collect()
}

/// Every model answers with a short successful stream.
pub fn healthy(mock: &MockProviderClient, names: &[&str], delay: Duration) {
    for name in names {
        mock.set_fallback(name, MockResponse::text(&["Hello", ", ", "world"], delay, Some((12, 3))));
    }
}
