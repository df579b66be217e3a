// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Shared test helpers. Currently just [`subscribe`], which installs a
//! `tracing` subscriber once per process so tests can run with `RUST_LOG`
//! set without fighting over the global default.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a `tracing-subscriber` writer to the test harness's own output,
/// honoring `RUST_LOG`. Safe to call from every test; only the first call
/// does anything.
pub fn subscribe() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
