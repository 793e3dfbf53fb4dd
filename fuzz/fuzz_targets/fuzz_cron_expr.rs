#![no_main]

use libfuzzer_sys::fuzz_target;
use warden::fuzz_api::validate_cron_expr;

fuzz_target!(|data: &str| {
    let _ = validate_cron_expr(data);
});
