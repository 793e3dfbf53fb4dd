#![no_main]

use libfuzzer_sys::fuzz_target;
use warden::secrets::{extract, merge};

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let (mut redacted, secrets_tree) = extract(&value);
    merge(&mut redacted, &secrets_tree);
});
